use std::path::Path;

/// Detects the image MIME type of a path from its extension.
/// Only formats the library catalogs are recognized.
pub fn from_path(path: &Path) -> Option<MimeType> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(from_extension)
}

pub fn is_supported_image(path: &Path) -> bool {
    from_path(path).is_some()
}

fn from_extension(ext: &str) -> Option<MimeType> {
    let ext_lower = ext.to_lowercase();
    match ext_lower.as_str() {
        "jpg" | "jpeg" => Some(MimeType::new("image", "jpeg")),
        "png" => Some(MimeType::new("image", "png")),
        "gif" => Some(MimeType::new("image", "gif")),
        "webp" => Some(MimeType::new("image", "webp")),
        "heic" => Some(MimeType::new("image", "heic")),
        "heif" => Some(MimeType::new("image", "heif")),
        "bmp" => Some(MimeType::new("image", "bmp")),
        "tiff" | "tif" => Some(MimeType::new("image", "tiff")),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    type_: String,
    subtype: String,
}

impl MimeType {
    fn new(type_: &str, subtype: &str) -> Self {
        Self {
            type_: type_.to_string(),
            subtype: subtype.to_string(),
        }
    }

    /// Catalog format name, e.g. `jpeg` for both `.jpg` and `.jpeg`.
    pub fn format_name(&self) -> &str {
        &self.subtype
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_image_types() {
        assert_eq!(
            from_path(&PathBuf::from("photo.JPG")).unwrap().to_string(),
            "image/jpeg"
        );
        assert_eq!(
            from_path(&PathBuf::from("photo.heif")).unwrap().format_name(),
            "heif"
        );
        assert_eq!(
            from_path(&PathBuf::from("scan.tif")).unwrap().format_name(),
            "tiff"
        );
    }

    #[test]
    fn test_videos_and_sidecars_are_not_cataloged() {
        assert!(!is_supported_image(&PathBuf::from("clip.mp4")));
        assert!(!is_supported_image(&PathBuf::from("photo.xmp")));
        assert!(!is_supported_image(&PathBuf::from("README")));
    }
}
