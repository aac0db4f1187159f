use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::SortError;
use crate::media::ImageFile;

/// List candidate images in `source`, sorted by path.
///
/// Sorting pins the order in which files are classified, so which copy of a
/// duplicated capture counts as the original does not depend on how the
/// platform happens to order directory entries.
pub fn scan_source(source: &Path, recursive: bool) -> Result<Vec<ImageFile>, SortError> {
    let mut files = if recursive {
        scan_recursive(source)?
    } else {
        scan_flat(source)?
    };
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn scan_flat(source: &Path) -> Result<Vec<ImageFile>, SortError> {
    let entries = fs::read_dir(source).map_err(|source_err| SortError::Scan {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", source.display(), e);
                continue;
            }
        };
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || is_hidden(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if let Some(file) = ImageFile::from_path(&entry.path()) {
            push_candidate(&mut files, file);
        }
    }
    Ok(files)
}

fn scan_recursive(source: &Path) -> Result<Vec<ImageFile>, SortError> {
    // Surface an unreadable root as a listing failure rather than an empty run
    fs::read_dir(source).map_err(|source_err| SortError::Scan {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    let mut files = Vec::new();
    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", source.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(file) = ImageFile::from_path(entry.path()) {
            push_candidate(&mut files, file);
        }
    }
    Ok(files)
}

fn push_candidate(files: &mut Vec<ImageFile>, file: ImageFile) {
    if file.has_lossy_name() {
        tracing::warn!(
            "{} is not a valid UTF-8 name; it will be written as {}",
            file.path.display(),
            file.filename
        );
    }
    files.push(file);
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
