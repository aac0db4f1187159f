use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use filetime::FileTime;
use sha2::{Digest, Sha256};

use crate::cancel::CancellationToken;
use crate::error::FileError;

const STAGING_PREFIX: &str = ".exif-sort-";
const STAGING_SUFFIX: &str = ".part";

/// Copy `source` to `dest` without ever exposing a half-written file.
///
/// Bytes are staged in a temporary file next to `dest`, synced, stamped with
/// the source's modification time, then renamed into place. The rename fails
/// if `dest` already exists. A cancelled or failed copy leaves nothing behind.
pub fn copy_atomic(
    source: &Path,
    dest: &Path,
    cancel_token: Option<&CancellationToken>,
) -> Result<u64, FileError> {
    let copy_err = |source: io::Error| FileError::Copy {
        to: dest.to_path_buf(),
        source,
    };
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));

    let mut input = File::open(source).map_err(copy_err)?;
    let mtime = FileTime::from_last_modification_time(&input.metadata().map_err(copy_err)?);

    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
        .map_err(copy_err)?;
    let bytes = io::copy(&mut input, staged.as_file_mut()).map_err(copy_err)?;
    staged.as_file().sync_all().map_err(copy_err)?;
    filetime::set_file_handle_times(staged.as_file(), None, Some(mtime)).map_err(copy_err)?;

    if let Some(token) = cancel_token {
        // Dropping `staged` removes the temporary file
        token.check()?;
    }

    staged.persist_noclobber(dest).map_err(|e| copy_err(e.error))?;
    Ok(bytes)
}

/// Whether two files hold the same bytes: sizes first, SHA-256 only when they match.
pub fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(compute_hash(a)? == compute_hash(b)?)
}

fn compute_hash(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
