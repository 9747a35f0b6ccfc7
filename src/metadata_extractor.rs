use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag};
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Best-effort metadata; every field may be absent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PhotoMetadata {
    pub taken_at: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Never fails: undecodable headers and missing EXIF just leave fields empty.
    pub fn extract(path: &Path) -> PhotoMetadata {
        let mut metadata = PhotoMetadata::default();

        match image::image_dimensions(path) {
            Ok((width, height)) => {
                metadata.width = Some(width);
                metadata.height = Some(height);
            }
            Err(e) => debug!("No dimensions for {}: {}", path.display(), e),
        }

        if let Ok(file) = File::open(path) {
            let mut reader = BufReader::new(file);
            match Reader::new().read_from_container(&mut reader) {
                Ok(exif_reader) => {
                    metadata.taken_at = Self::capture_time(&exif_reader);
                    if metadata.width.is_none() {
                        Self::fill_dimensions(&exif_reader, &mut metadata);
                    }
                }
                Err(e) => debug!("Failed to read EXIF data for {}: {}", path.display(), e),
            }
        }

        metadata
    }

    fn capture_time(reader: &exif::Exif) -> Option<DateTime<Utc>> {
        [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
            .iter()
            .filter_map(|tag| reader.get_field(*tag, In::PRIMARY))
            .filter_map(|field| Self::parse_exif_datetime(&field.display_value().to_string()))
            .next()
    }

    // Formats the image crate cannot decode (HEIC) may still carry sizes in EXIF.
    fn fill_dimensions(reader: &exif::Exif, metadata: &mut PhotoMetadata) {
        let width = reader
            .get_field(Tag::PixelXDimension, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0));
        let height = reader
            .get_field(Tag::PixelYDimension, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0));
        if let (Some(width), Some(height)) = (width, height) {
            metadata.width = Some(width);
            metadata.height = Some(height);
        }
    }

    pub fn parse_exif_datetime(datetime_str: &str) -> Option<DateTime<Utc>> {
        let cleaned = datetime_str.replace('"', "");

        // EXIF format: "2023:01:15 10:30:00"
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
        }

        // Some software normalizes to "2023-01-15 10:30:00"
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&cleaned, "%F %T") {
            return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use tempfile::TempDir;

    #[test]
    fn test_parse_exif_datetime_formats() {
        let dt = MetadataExtractor::parse_exif_datetime("2023:01:15 10:30:00").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 1, 15));
        assert_eq!(dt.hour(), 10);

        assert!(MetadataExtractor::parse_exif_datetime("\"2023-01-15 10:30:00\"").is_some());
        assert!(MetadataExtractor::parse_exif_datetime("not a date").is_none());
    }

    #[test]
    fn test_undecodable_file_yields_empty_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        assert_eq!(MetadataExtractor::extract(&path), PhotoMetadata::default());
    }

    #[test]
    fn test_png_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pixel.png");
        image::RgbImage::new(3, 2).save(&path).unwrap();

        let metadata = MetadataExtractor::extract(&path);
        assert_eq!(metadata.width, Some(3));
        assert_eq!(metadata.height, Some(2));
        assert_eq!(metadata.taken_at, None);
    }
}
