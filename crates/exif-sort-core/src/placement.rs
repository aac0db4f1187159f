use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::date::{Bucket, CaptureTimestamp, ModifiedTimeReader};
use crate::dedup::{DuplicateIndex, Registration};
use crate::error::FileError;
use crate::media::ImageFile;
use crate::naming::NameReserver;
use crate::writer;

/// The three output trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRoots {
    /// Dated originals: `Dest/YYYY/MM/<filename>`
    pub dest: PathBuf,
    /// Later captures of an already-seen timestamp: `Duplicates/YYYY/MM/<original>_NN.<ext>`
    pub duplicates: PathBuf,
    /// Files without capture metadata, bucketed by modification date: `No_Exif/YYYY/MM/<filename>`
    pub no_exif: PathBuf,
}

impl OutputRoots {
    pub fn all(&self) -> [&Path; 3] {
        [&self.dest, &self.duplicates, &self.no_exif]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Primary,
    Duplicate,
    NoMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Copy the source to the decided path.
    Copy,
    /// An identical file already sits at the decided path.
    AlreadyPresent,
}

/// Where one file goes and why. Decided once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub source: PathBuf,
    pub directory: PathBuf,
    pub filename: String,
    pub classification: Classification,
    pub bucket: Bucket,
    pub capture: Option<CaptureTimestamp>,
    /// Base name of the canonical file, for duplicates
    pub duplicate_of: Option<String>,
    /// The file's own name was taken by different content
    pub renamed: bool,
    pub disposition: Disposition,
}

impl Placement {
    pub fn dest(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

/// Decides the destination of each file, in the order files are offered.
///
/// Owns the run's [`DuplicateIndex`] and [`NameReserver`], so the first file
/// offered for a capture time becomes its canonical copy, and no two files
/// are ever handed the same destination.
pub struct PlacementEngine<'a> {
    roots: OutputRoots,
    modified: &'a dyn ModifiedTimeReader,
    index: DuplicateIndex,
    names: NameReserver,
    ensured: HashSet<PathBuf>,
    dry_run: bool,
}

impl<'a> PlacementEngine<'a> {
    pub fn new(roots: OutputRoots, modified: &'a dyn ModifiedTimeReader, dry_run: bool) -> Self {
        Self {
            roots,
            modified,
            index: DuplicateIndex::new(),
            names: NameReserver::new(),
            ensured: HashSet::new(),
            dry_run,
        }
    }

    pub fn duplicate_index(&self) -> &DuplicateIndex {
        &self.index
    }

    pub fn place(
        &mut self,
        file: &ImageFile,
        capture: Option<CaptureTimestamp>,
    ) -> Result<Placement, FileError> {
        match capture {
            Some(timestamp) => self.place_dated(file, timestamp),
            None => self.place_undated(file),
        }
    }

    fn place_dated(
        &mut self,
        file: &ImageFile,
        timestamp: CaptureTimestamp,
    ) -> Result<Placement, FileError> {
        let bucket = timestamp.bucket();
        let dated_dir = self.roots.dest.join(bucket.relative_path());
        self.ensure_dir(&dated_dir)?;

        match self.index.check_and_register(timestamp, &file.base_name) {
            Registration::First => {
                let (filename, renamed, disposition) = self.claim_own_name(&dated_dir, file)?;
                Ok(Placement {
                    source: file.path.clone(),
                    directory: dated_dir,
                    filename,
                    classification: Classification::Primary,
                    bucket,
                    capture: Some(timestamp),
                    duplicate_of: None,
                    renamed,
                    disposition,
                })
            }
            Registration::DuplicateOf(original) => {
                let dup_dir = self.roots.duplicates.join(bucket.relative_path());
                self.ensure_dir(&dup_dir)?;
                let filename = self.free_name(&dup_dir, &original, &file.extension)?;
                tracing::debug!(
                    "{} shares capture time {} with {}",
                    file.path.display(),
                    timestamp,
                    original
                );
                Ok(Placement {
                    source: file.path.clone(),
                    directory: dup_dir,
                    filename,
                    classification: Classification::Duplicate,
                    bucket,
                    capture: Some(timestamp),
                    duplicate_of: Some(original),
                    renamed: false,
                    disposition: Disposition::Copy,
                })
            }
        }
    }

    fn place_undated(&mut self, file: &ImageFile) -> Result<Placement, FileError> {
        let modified = self
            .modified
            .modified(&file.path)
            .map_err(|source| FileError::ModifiedTime {
                path: file.path.clone(),
                source,
            })?;
        let bucket = Bucket::of(&modified);
        let undated_dir = self.roots.no_exif.join(bucket.relative_path());
        self.ensure_dir(&undated_dir)?;

        let (filename, renamed, disposition) = self.claim_own_name(&undated_dir, file)?;
        Ok(Placement {
            source: file.path.clone(),
            directory: undated_dir,
            filename,
            classification: Classification::NoMetadata,
            bucket,
            capture: None,
            duplicate_of: None,
            renamed,
            disposition,
        })
    }

    /// Claim `dir/<filename>`. An identical file already there means nothing
    /// to copy; a different one, or an earlier claim in this run, pushes the
    /// file to the next free suffixed name. Existing files are never replaced.
    fn claim_own_name(
        &mut self,
        dir: &Path,
        file: &ImageFile,
    ) -> Result<(String, bool, Disposition), FileError> {
        let target = dir.join(&file.filename);
        if !self.names.is_reserved(&target) {
            let exists = target.try_exists().map_err(|source| FileError::ExistingCheck {
                path: target.clone(),
                source,
            })?;
            if !exists {
                self.names.reserve(target);
                return Ok((file.filename.clone(), false, Disposition::Copy));
            }
            let identical =
                writer::same_content(&file.path, &target).map_err(|source| FileError::ExistingCheck {
                    path: target.clone(),
                    source,
                })?;
            if identical {
                self.names.reserve(target);
                return Ok((file.filename.clone(), false, Disposition::AlreadyPresent));
            }
        }

        let filename = self.free_name(dir, &file.base_name, &file.extension)?;
        Ok((filename, true, Disposition::Copy))
    }

    fn free_name(&mut self, dir: &Path, base_name: &str, extension: &str) -> Result<String, FileError> {
        self.names
            .next_free_name(dir, base_name, extension)
            .map_err(|source| FileError::NameGeneration {
                directory: dir.to_path_buf(),
                source,
            })
    }

    /// Create-if-absent, once per directory per run.
    fn ensure_dir(&mut self, dir: &Path) -> Result<(), FileError> {
        if self.ensured.contains(dir) {
            return Ok(());
        }
        let existed = dir.is_dir();
        if self.dry_run {
            if !existed {
                tracing::info!("Would create directory {}", dir.display());
            }
        } else {
            fs::create_dir_all(dir).map_err(|source| FileError::DirectoryCreate {
                path: dir.to_path_buf(),
                source,
            })?;
            if !existed {
                tracing::info!("Created directory {}", dir.display());
            }
        }
        self.ensured.insert(dir.to_path_buf());
        Ok(())
    }
}
