use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};

/// Source of the filesystem date used when a file has no capture metadata.
pub trait ModifiedTimeReader: Send + Sync {
    fn modified(&self, path: &Path) -> io::Result<NaiveDateTime>;
}

/// File modification time, in local calendar time.
#[derive(Debug, Default, Clone)]
pub struct FsModifiedTime;

impl ModifiedTimeReader for FsModifiedTime {
    fn modified(&self, path: &Path) -> io::Result<NaiveDateTime> {
        let mtime = fs::metadata(path)?.modified()?;
        Ok(DateTime::<Local>::from(mtime).naive_local())
    }
}
