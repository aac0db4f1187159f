pub mod exif;
pub mod exiftool;
pub mod fallback;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use self::exif::BuiltinExifReader;
pub use exiftool::ExifToolReader;
pub use fallback::{FsModifiedTime, ModifiedTimeReader};

use crate::error::SortError;

/// Capture time read from image metadata, precise to the second.
///
/// Two captures are the same moment only if every component matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaptureTimestamp(NaiveDateTime);

impl CaptureTimestamp {
    pub fn new(datetime: NaiveDateTime) -> Self {
        // Sub-second precision never takes part in duplicate detection
        Self(datetime.with_nanosecond(0).unwrap_or(datetime))
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::of(&self.0)
    }
}

impl fmt::Display for CaptureTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d_%H-%M-%S"))
    }
}

/// Year/month pair naming the directory a file lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub year: i32,
    pub month: u32,
}

impl Bucket {
    /// Everything finer than the month is discarded.
    pub fn of<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// `YYYY/MM`, relative to an output root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(format!("{:04}", self.year)).join(format!("{:02}", self.month))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}/{:02}", self.year, self.month)
    }
}

/// Source of capture timestamps.
///
/// `Ok(None)` means the file carries no usable capture time. `Err` means the
/// read itself failed; callers treat both the same way and fall back to the
/// filesystem timestamp.
pub trait MetadataReader: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Verify external prerequisites before any file is processed.
    fn check_available(&self) -> Result<(), SortError> {
        Ok(())
    }

    fn capture_timestamp(&self, path: &Path) -> anyhow::Result<Option<CaptureTimestamp>>;
}

static EXIF_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{4})[:\-/.](\d{2})[:\-/.](\d{2})[ T](\d{2})[:\-.](\d{2})[:\-.](\d{2})").unwrap()
});

/// Parse an EXIF-style datetime (`2023:05:10 14:30:00`).
///
/// Separator variants written by odd firmware are accepted; trailing
/// sub-seconds or zone offsets are ignored. Zeroed or impossible dates yield
/// `None`.
pub fn parse_exif_datetime(s: &str) -> Option<CaptureTimestamp> {
    let caps = EXIF_DATETIME_RE.captures(s)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = i32::try_from(num(1)?).ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?;
    let datetime = date.and_hms_opt(num(4)?, num(5)?, num(6)?)?;
    Some(CaptureTimestamp::new(datetime))
}
