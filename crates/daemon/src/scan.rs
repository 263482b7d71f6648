//! Scanner module for discovering photos on a storage volume.
//!
//! Only the top level of the volume is considered; hidden files are skipped and
//! the remaining files are filtered by extension.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Photo file extensions accepted by the scanner (case-insensitive matching).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".bmp", ".gif", ".tiff", ".tif", ".webp",
];

/// Returns true for names starting with `.` (dotfiles, macOS `._` sidecars).
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Checks if a file has a supported photo extension (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Lists the source photos directly inside `volume`, sorted by file name.
///
/// Fails only if the volume itself cannot be listed; unreadable entries are
/// dropped.
pub fn scan_source_images(volume: &Path) -> io::Result<Vec<PathBuf>> {
    // Surface a missing or unreadable volume as an error instead of an empty list.
    std::fs::read_dir(volume)?;

    let images: Vec<PathBuf> = WalkDir::new(volume)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| !is_hidden(path) && is_image_file(path))
        .collect();

    Ok(images)
}

/// Lists the regular, non-hidden files in a flat directory by file name, sorted.
///
/// Used for the processed-image directory, which only ever holds converter output.
pub fn list_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("/media/pi/card/photo.jpg")));
        assert!(is_image_file(Path::new("/media/pi/card/photo.JPEG"))); // case-insensitive
        assert!(is_image_file(Path::new("/media/pi/card/photo.Tiff")));
        assert!(!is_image_file(Path::new("/media/pi/card/notes.txt")));
        assert!(!is_image_file(Path::new("/media/pi/card/refresh_time.txt")));
        assert!(!is_image_file(Path::new("/media/pi/card/photo"))); // no extension
    }

    #[test]
    fn test_scan_skips_hidden_dirs_and_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        File::create(root.join("b.png")).unwrap();
        File::create(root.join("a.JPG")).unwrap();
        File::create(root.join(".hidden.jpg")).unwrap();
        File::create(root.join("._a.JPG")).unwrap();
        File::create(root.join("refresh_time.txt")).unwrap();
        fs::create_dir(root.join("nested.jpg")).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        File::create(root.join("sub").join("deep.jpg")).unwrap();

        let images = scan_source_images(root).unwrap();
        assert_eq!(images, vec![root.join("a.JPG"), root.join("b.png")]);
    }

    #[test]
    fn test_scan_missing_volume_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(scan_source_images(&temp_dir.path().join("gone")).is_err());
    }

    #[test]
    fn test_list_file_names() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        File::create(dir.join("z.jpg")).unwrap();
        File::create(dir.join("a.png")).unwrap();
        File::create(dir.join(".partial")).unwrap();
        fs::create_dir(dir.join("sub")).unwrap();

        assert_eq!(list_file_names(dir).unwrap(), vec!["a.png", "z.jpg"]);
    }

    // Property: a file is accepted if and only if its lower-cased extension is
    // on the allowlist.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_image_extension_filtering(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                Just("jpg"), Just("JPG"), Just("Jpg"),
                Just("jpeg"), Just("JPEG"),
                Just("png"), Just("PNG"),
                Just("bmp"), Just("BMP"),
                Just("gif"), Just("GIF"),
                Just("tiff"), Just("TIFF"), Just("tif"),
                Just("webp"), Just("WebP"),
                Just("txt"), Just("mkv"), Just("pdf"), Just("heic"),
                Just("raw"), Just("cr2"), Just("zip"),
            ],
        ) {
            let path = PathBuf::from(format!("/media/pi/card/{}.{}", basename, ext));
            let expected = matches!(
                ext.to_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "bmp" | "gif" | "tiff" | "tif" | "webp"
            );
            prop_assert_eq!(is_image_file(&path), expected);
        }

        #[test]
        fn prop_dotfiles_never_scanned(name in "\\.[a-zA-Z0-9]{1,10}") {
            let temp_dir = TempDir::new().unwrap();
            let hidden = temp_dir.path().join(format!("{}.jpg", name));
            File::create(&hidden).unwrap();

            let images = scan_source_images(temp_dir.path()).unwrap();
            prop_assert!(images.is_empty(), "hidden file was scanned: {:?}", images);
        }
    }
}
