use std::io;
use std::path::PathBuf;

use crate::cancel::CancelledError;

/// Errors that abort the whole run before or while files are processed.
#[derive(Debug, thiserror::Error)]
pub enum SortError {
    /// The metadata extraction tool is not installed.
    #[error(
        "{tool} is not installed or not found in PATH.\n\
         Please install it to use this program:\n\
         - On Ubuntu/Debian: sudo apt install libimage-exiftool-perl\n\
         - On macOS: brew install exiftool\n\
         - On other systems: https://exiftool.org/install.html\n\
         Or rerun with --reader builtin."
    )]
    PrereqMissing { tool: String },
    /// The input directory does not exist.
    #[error("Source directory {0} does not exist")]
    SourceMissing(PathBuf),
    /// One of the three output roots could not be created.
    #[error("Failed to prepare output directory {path}: {source}")]
    OutputRoot { path: PathBuf, source: io::Error },
    /// The input directory could not be listed.
    #[error("Failed to list {path}: {source}")]
    Scan { path: PathBuf, source: io::Error },
    #[error("Failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}

/// Errors that abandon a single file; the run carries on with the next one.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("cannot create directory {path}: {source}")]
    DirectoryCreate { path: PathBuf, source: io::Error },
    #[error("cannot read modification time of {path}: {source}")]
    ModifiedTime { path: PathBuf, source: io::Error },
    #[error("cannot probe {directory} for a free name: {source}")]
    NameGeneration { directory: PathBuf, source: io::Error },
    #[error("cannot compare with existing {path}: {source}")]
    ExistingCheck { path: PathBuf, source: io::Error },
    #[error("cannot copy to {to}: {source}")]
    Copy { to: PathBuf, source: io::Error },
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}
