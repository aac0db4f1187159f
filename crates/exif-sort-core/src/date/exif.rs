use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context};
use exif::{In, Reader, Tag};

use super::{parse_exif_datetime, CaptureTimestamp, MetadataReader};

/// Capture tags in priority order. `DateTime` records the last edit, not the
/// capture, and is not consulted.
const CAPTURE_TAGS: [Tag; 2] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized];

/// Reads EXIF in-process; needs no external tool.
#[derive(Debug, Default, Clone)]
pub struct BuiltinExifReader;

impl MetadataReader for BuiltinExifReader {
    fn name(&self) -> &str {
        "builtin"
    }

    fn capture_timestamp(&self, path: &Path) -> anyhow::Result<Option<CaptureTimestamp>> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let reader = match Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(reader) => reader,
            // No EXIF block at all is the ordinary "no metadata" case
            Err(exif::Error::NotFound(_)) => return Ok(None),
            Err(e) => bail!("reading EXIF from {}: {}", path.display(), e),
        };

        for tag in CAPTURE_TAGS {
            if let Some(field) = reader.get_field(tag, In::PRIMARY) {
                let val = field.display_value().to_string();
                if let Some(ts) = parse_exif_datetime(&val) {
                    return Ok(Some(ts));
                }
            }
        }

        Ok(None)
    }
}
