pub mod cancel;
pub mod date;
pub mod dedup;
pub mod error;
pub mod media;
pub mod naming;
pub mod placement;
pub mod scan;
pub mod writer;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::date::{CaptureTimestamp, FsModifiedTime, MetadataReader, ModifiedTimeReader};
use crate::media::ImageFile;
use crate::placement::{Classification, Disposition, OutputRoots, Placement, PlacementEngine};

pub use cancel::{CancellationToken, CancelledError};
pub use error::{FileError, SortError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub duplicates: PathBuf,
    pub no_exif: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Worker threads for metadata reads and copies; rayon's default when unset
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::from("Source"),
            dest: PathBuf::from("Dest"),
            duplicates: PathBuf::from("Duplicates"),
            no_exif: PathBuf::from("No_Exif"),
            recursive: false,
            dry_run: false,
            jobs: None,
        }
    }
}

impl ProcessOptions {
    pub fn roots(&self) -> OutputRoots {
        OutputRoots {
            dest: self.dest.clone(),
            duplicates: self.duplicates.clone(),
            no_exif: self.no_exif.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub total: u64,
    pub primary: u64,
    pub duplicates: u64,
    pub no_metadata: u64,
    pub already_present: u64,
    pub failed: u64,
    #[serde(default)]
    pub failures: Vec<String>,
}

impl ProcessResult {
    fn record(&mut self, placement: &Placement) {
        match (placement.disposition, placement.classification) {
            (Disposition::AlreadyPresent, _) => self.already_present += 1,
            (Disposition::Copy, Classification::Primary) => self.primary += 1,
            (Disposition::Copy, Classification::Duplicate) => self.duplicates += 1,
            (Disposition::Copy, Classification::NoMetadata) => self.no_metadata += 1,
        }
    }

    fn record_failure(&mut self, file: &ImageFile, err: &FileError) {
        tracing::warn!("Skipping {}: {}", file.path.display(), err);
        self.failed += 1;
        self.failures.push(format!("{}: {}", file.path.display(), err));
    }
}

/// Run-time controls that are not part of the sorting options themselves.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Checked between stages and before each copy is committed
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    /// No cancellation: the run always goes to completion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the run once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn check(&self) -> Result<(), SortError> {
        match &self.cancel_token {
            Some(token) => token.check().map_err(SortError::from),
            None => Ok(()),
        }
    }
}

/// Progress sink: `(stage, current, total, filename)`. Stages are
/// `"metadata"` and `"copy"`; `current` counts from zero.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Forwards progress from worker threads to a [`ProgressCallback`], dropping
/// reports that arrive within [`PROGRESS_INTERVAL`] of the last one. The
/// final report of a stage always gets through.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, filename: &str) {
        let last_of_stage = current + 1 >= total;
        if !last_of_stage {
            let mut last = self.last_emit.lock().unwrap_or_else(|p| p.into_inner());
            if last.is_some_and(|at| at.elapsed() < PROGRESS_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, filename);
    }
}

/// Sort `options.source` with the default filesystem date fallback.
pub fn process(
    options: &ProcessOptions,
    reader: &dyn MetadataReader,
    progress_callback: &ProgressCallback,
) -> Result<ProcessResult, SortError> {
    process_with_control(
        options,
        reader,
        &FsModifiedTime,
        &ProcessControl::default(),
        progress_callback,
    )
}

/// Run the full pipeline: check prerequisites, enumerate, read metadata,
/// decide placements, copy.
///
/// Only prerequisite, source, output-root and cancellation problems abort the
/// run. Anything that goes wrong with one file is logged, counted in
/// [`ProcessResult::failures`], and the run moves on.
pub fn process_with_control(
    options: &ProcessOptions,
    reader: &dyn MetadataReader,
    modified: &dyn ModifiedTimeReader,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> Result<ProcessResult, SortError> {
    let tp = ThrottledProgress::new(progress_callback);
    control.check()?;

    reader.check_available()?;
    if !options.source.is_dir() {
        return Err(SortError::SourceMissing(options.source.clone()));
    }

    let roots = options.roots();
    if !options.dry_run {
        for root in roots.all() {
            fs::create_dir_all(root).map_err(|source| SortError::OutputRoot {
                path: root.to_path_buf(),
                source,
            })?;
        }
    }

    // Stage 1: Enumerate
    let files = scan::scan_source(&options.source, options.recursive)?;
    let mut result = ProcessResult {
        total: files.len() as u64,
        ..Default::default()
    };
    if files.is_empty() {
        tracing::info!("No image files found in {}", options.source.display());
        return Ok(result);
    }
    tracing::debug!(
        "Found {} image files in {}, reading dates with {}",
        files.len(),
        options.source.display(),
        reader.name()
    );

    let pool = match options.jobs {
        Some(n) => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()?),
        None => None,
    };
    let total = files.len() as u64;

    // Stage 2: Read capture times (parallel)
    let counter = AtomicU64::new(0);
    let captures: Vec<Option<CaptureTimestamp>> = in_pool(pool.as_ref(), || {
        files
            .par_iter()
            .map(|file| {
                if control.is_cancelled() {
                    return None;
                }
                let capture = read_capture(reader, file);
                let current = counter.fetch_add(1, Ordering::Relaxed);
                tp.report("metadata", current, total, &file.filename);
                capture
            })
            .collect()
    });
    control.check()?;

    // Stage 3: Decide placements (sequential, in enumeration order)
    let mut engine = PlacementEngine::new(roots, modified, options.dry_run);
    let mut planned: Vec<(&ImageFile, Placement)> = Vec::with_capacity(files.len());
    for (file, capture) in files.iter().zip(captures) {
        match engine.place(file, capture) {
            Ok(placement) => planned.push((file, placement)),
            Err(e) => result.record_failure(file, &e),
        }
    }
    control.check()?;

    // Stage 4: Copy (parallel)
    let copy_total = planned.len() as u64;
    let counter = AtomicU64::new(0);
    let outcomes: Vec<Result<(), FileError>> = in_pool(pool.as_ref(), || {
        planned
            .par_iter()
            .map(|(_, placement)| {
                let outcome = execute(placement, options.dry_run, control.cancel_token.as_ref());
                let current = counter.fetch_add(1, Ordering::Relaxed);
                tp.report("copy", current, copy_total, &placement.filename);
                outcome
            })
            .collect()
    });

    let mut cancelled = false;
    for ((file, placement), outcome) in planned.iter().zip(outcomes) {
        match outcome {
            Ok(()) => result.record(placement),
            Err(FileError::Cancelled(_)) => cancelled = true,
            Err(e) => result.record_failure(file, &e),
        }
    }
    if cancelled {
        return Err(CancelledError.into());
    }

    Ok(result)
}

fn in_pool<R: Send>(pool: Option<&rayon::ThreadPool>, op: impl FnOnce() -> R + Send) -> R {
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// A failed read is logged and treated as "no metadata".
fn read_capture(reader: &dyn MetadataReader, file: &ImageFile) -> Option<CaptureTimestamp> {
    match reader.capture_timestamp(&file.path) {
        Ok(capture) => capture,
        Err(e) => {
            tracing::warn!(
                "Could not read metadata from {} ({:#}); using file modification date",
                file.path.display(),
                e
            );
            None
        }
    }
}

fn execute(
    placement: &Placement,
    dry_run: bool,
    cancel_token: Option<&CancellationToken>,
) -> Result<(), FileError> {
    let dest = placement.dest();
    let src = placement.source.display();

    if placement.disposition == Disposition::AlreadyPresent {
        tracing::info!("Already present: {} at {}", src, dest.display());
        return Ok(());
    }

    if dry_run {
        if let Some(token) = cancel_token {
            token.check()?;
        }
    } else {
        writer::copy_atomic(&placement.source, &dest, cancel_token)?;
    }

    let verb = if dry_run { "Would copy" } else { "Copied" };
    match placement.classification {
        Classification::Primary if placement.renamed => tracing::info!(
            "{} {} to {} (name already taken by a different file)",
            verb,
            src,
            dest.display()
        ),
        Classification::Primary => tracing::info!("{} {} to {}", verb, src, dest.display()),
        Classification::Duplicate => tracing::info!(
            "{} duplicate {} to {} (same capture time as {})",
            verb,
            src,
            dest.display(),
            placement.duplicate_of.as_deref().unwrap_or_default()
        ),
        Classification::NoMetadata => {
            tracing::info!("{} {} without metadata to {}", verb, src, dest.display())
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, NaiveDate, NaiveDateTime};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    /// Capture times keyed by filename. `Err` entries simulate a failing reader.
    #[derive(Default)]
    struct MockReader {
        captures: HashMap<String, Result<CaptureTimestamp, String>>,
        missing_tool: bool,
    }

    impl MockReader {
        fn with(mut self, name: &str, capture: &str) -> Self {
            let dt = NaiveDateTime::parse_from_str(capture, "%Y-%m-%d %H:%M:%S").unwrap();
            self.captures.insert(name.to_string(), Ok(CaptureTimestamp::new(dt)));
            self
        }

        fn failing(mut self, name: &str) -> Self {
            self.captures.insert(name.to_string(), Err("corrupt maker notes".to_string()));
            self
        }
    }

    impl MetadataReader for MockReader {
        fn name(&self) -> &str {
            "mock"
        }

        fn check_available(&self) -> Result<(), SortError> {
            if self.missing_tool {
                return Err(SortError::PrereqMissing { tool: "mock".into() });
            }
            Ok(())
        }

        fn capture_timestamp(&self, path: &Path) -> anyhow::Result<Option<CaptureTimestamp>> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            match self.captures.get(&name) {
                Some(Ok(ts)) => Ok(Some(*ts)),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg.clone())),
                None => Ok(None),
            }
        }
    }

    fn options(dir: &TempDir) -> ProcessOptions {
        ProcessOptions {
            source: dir.path().join("Source"),
            dest: dir.path().join("Dest"),
            duplicates: dir.path().join("Duplicates"),
            no_exif: dir.path().join("No_Exif"),
            ..Default::default()
        }
    }

    fn add_source(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let source = dir.path().join("Source");
        fs::create_dir_all(&source).unwrap();
        let path = source.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn pin_mtime(path: &Path, y: i32, m: u32, d: u32) {
        let local = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_local_timezone(Local)
            .single()
            .unwrap();
        filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(local.timestamp(), 0)).unwrap();
    }

    fn run(opts: &ProcessOptions, reader: &MockReader) -> Result<ProcessResult, SortError> {
        process(opts, reader, &|_, _, _, _| {})
    }

    fn files_under(root: &Path) -> Vec<String> {
        let mut out: Vec<String> = walkdir::WalkDir::new(root)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        out.sort();
        out
    }

    const SHOT: &str = "2023-05-10 14:30:00";

    #[test]
    fn test_same_capture_time_scenarios() {
        let dir = tempdir().unwrap();
        add_source(&dir, "IMG1.JPG", b"first");
        add_source(&dir, "IMG2.JPG", b"second");
        add_source(&dir, "IMG3.JPG", b"third");
        let reader = MockReader::default()
            .with("IMG1.JPG", SHOT)
            .with("IMG2.JPG", SHOT)
            .with("IMG3.JPG", SHOT);
        let opts = options(&dir);

        let result = run(&opts, &reader).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.primary, 1);
        assert_eq!(result.duplicates, 2);
        assert_eq!(result.failed, 0);

        assert_eq!(files_under(&opts.dest), vec!["2023/05/IMG1.JPG"]);
        assert_eq!(
            files_under(&opts.duplicates),
            vec!["2023/05/IMG1_01.JPG", "2023/05/IMG1_02.JPG"]
        );
        assert_eq!(fs::read(opts.dest.join("2023/05/IMG1.JPG")).unwrap(), b"first");
        assert_eq!(fs::read(opts.duplicates.join("2023/05/IMG1_01.JPG")).unwrap(), b"second");
        assert_eq!(fs::read(opts.duplicates.join("2023/05/IMG1_02.JPG")).unwrap(), b"third");
    }

    #[test]
    fn test_distinct_capture_times_have_no_duplicates() {
        let dir = tempdir().unwrap();
        add_source(&dir, "a.jpg", b"a");
        add_source(&dir, "b.jpg", b"b");
        add_source(&dir, "c.raw", b"c");
        let reader = MockReader::default()
            .with("a.jpg", "2023-05-10 14:30:00")
            .with("b.jpg", "2023-05-10 14:30:01")
            .with("c.raw", "2021-12-31 23:59:59");
        let opts = options(&dir);

        let result = run(&opts, &reader).unwrap();
        assert_eq!(result.primary, 3);
        assert_eq!(result.duplicates, 0);
        assert!(files_under(&opts.duplicates).is_empty());
        assert_eq!(
            files_under(&opts.dest),
            vec!["2021/12/c.raw", "2023/05/a.jpg", "2023/05/b.jpg"]
        );
    }

    #[test]
    fn test_missing_metadata_uses_modification_month() {
        let dir = tempdir().unwrap();
        let path = add_source(&dir, "scan.jpeg", b"scan");
        pin_mtime(&path, 2022, 11, 3);
        let opts = options(&dir);

        let result = run(&opts, &MockReader::default()).unwrap();
        assert_eq!(result.no_metadata, 1);
        assert_eq!(files_under(&opts.no_exif), vec!["2022/11/scan.jpeg"]);
        assert!(files_under(&opts.dest).is_empty());
    }

    #[test]
    fn test_metadata_read_failure_falls_back() {
        let dir = tempdir().unwrap();
        let path = add_source(&dir, "broken.JPG", b"??");
        pin_mtime(&path, 2019, 2, 14);
        let opts = options(&dir);

        let result = run(&opts, &MockReader::default().failing("broken.JPG")).unwrap();
        assert_eq!(result.no_metadata, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(files_under(&opts.no_exif), vec!["2019/02/broken.JPG"]);
    }

    #[test]
    fn test_empty_source_creates_only_roots() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("Source")).unwrap();
        let opts = options(&dir);

        let result = run(&opts, &MockReader::default()).unwrap();
        assert_eq!(result.total, 0);
        for root in opts.roots().all() {
            assert!(root.is_dir());
            assert_eq!(fs::read_dir(root).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempdir().unwrap();
        let opts = options(&dir);
        let err = run(&opts, &MockReader::default()).unwrap_err();
        assert!(matches!(err, SortError::SourceMissing(_)));
        assert!(!opts.dest.exists());
    }

    #[test]
    fn test_missing_prerequisite_is_fatal_before_anything_happens() {
        let dir = tempdir().unwrap();
        add_source(&dir, "IMG1.JPG", b"1");
        let opts = options(&dir);
        let reader = MockReader {
            missing_tool: true,
            ..Default::default()
        };

        let err = run(&opts, &reader).unwrap_err();
        assert!(matches!(err, SortError::PrereqMissing { .. }));
        assert!(!opts.dest.exists());
    }

    #[test]
    fn test_second_run_never_overwrites() {
        let dir = tempdir().unwrap();
        add_source(&dir, "IMG1.JPG", b"first");
        add_source(&dir, "IMG2.JPG", b"second");
        let reader = MockReader::default().with("IMG1.JPG", SHOT).with("IMG2.JPG", SHOT);
        let opts = options(&dir);

        run(&opts, &reader).unwrap();
        let again = run(&opts, &reader).unwrap();
        assert_eq!(again.already_present, 1);
        assert_eq!(again.duplicates, 1);
        assert_eq!(again.failed, 0);

        assert_eq!(files_under(&opts.dest), vec!["2023/05/IMG1.JPG"]);
        assert_eq!(fs::read(opts.dest.join("2023/05/IMG1.JPG")).unwrap(), b"first");
        assert_eq!(
            files_under(&opts.duplicates),
            vec!["2023/05/IMG1_01.JPG", "2023/05/IMG1_02.JPG"]
        );
    }

    #[test]
    fn test_per_file_failure_does_not_stop_the_run() {
        struct NoMtime;
        impl ModifiedTimeReader for NoMtime {
            fn modified(&self, _: &Path) -> std::io::Result<NaiveDateTime> {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
            }
        }

        let dir = tempdir().unwrap();
        add_source(&dir, "dated.jpg", b"d");
        add_source(&dir, "undated.jpg", b"u");
        let reader = MockReader::default().with("dated.jpg", SHOT);
        let opts = options(&dir);

        let result =
            process_with_control(&opts, &reader, &NoMtime, &ProcessControl::new(), &|_, _, _, _| {})
                .unwrap();
        assert_eq!(result.primary, 1);
        assert_eq!(result.failed, 1);
        assert!(result.failures[0].contains("undated.jpg"));
        assert_eq!(files_under(&opts.dest), vec!["2023/05/dated.jpg"]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = tempdir().unwrap();
        add_source(&dir, "IMG1.JPG", b"1");
        add_source(&dir, "IMG2.JPG", b"2");
        let reader = MockReader::default().with("IMG1.JPG", SHOT).with("IMG2.JPG", SHOT);
        let opts = ProcessOptions {
            dry_run: true,
            ..options(&dir)
        };

        let result = run(&opts, &reader).unwrap();
        assert_eq!(result.primary, 1);
        assert_eq!(result.duplicates, 1);
        for root in opts.roots().all() {
            assert!(!root.exists());
        }
    }

    #[test]
    fn test_cancelled_run_copies_nothing() {
        let dir = tempdir().unwrap();
        add_source(&dir, "IMG1.JPG", b"1");
        let reader = MockReader::default().with("IMG1.JPG", SHOT);
        let opts = options(&dir);
        let token = CancellationToken::new();
        token.cancel();
        let control = ProcessControl::new().with_cancel_token(token);

        let err = process_with_control(&opts, &reader, &FsModifiedTime, &control, &|_, _, _, _| {})
            .unwrap_err();
        assert!(matches!(err, SortError::Cancelled(_)));
        assert!(!opts.dest.exists());
    }

    #[test]
    fn test_parallel_run_keeps_enumeration_order_for_first_wins() {
        let dir = tempdir().unwrap();
        let mut reader = MockReader::default();
        for i in 0..40 {
            let name = format!("IMG{:02}.JPG", i);
            add_source(&dir, &name, name.as_bytes());
            reader = reader.with(&name, SHOT);
        }
        let opts = ProcessOptions {
            jobs: Some(4),
            ..options(&dir)
        };

        let result = run(&opts, &reader).unwrap();
        assert_eq!(result.primary, 1);
        assert_eq!(result.duplicates, 39);
        assert_eq!(files_under(&opts.dest), vec!["2023/05/IMG00.JPG"]);
        let dups = files_under(&opts.duplicates);
        assert_eq!(dups.len(), 39);
        assert_eq!(dups[0], "2023/05/IMG00_01.JPG");
        assert_eq!(dups[38], "2023/05/IMG00_39.JPG");
        assert_eq!(fs::read(opts.duplicates.join("2023/05/IMG00_01.JPG")).unwrap(), b"IMG01.JPG");
    }

    #[test]
    fn test_throttled_progress_keeps_first_and_last() {
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let callback = move |_: &str, current: u64, _: u64, _: &str| {
            sink.lock().unwrap().push(current);
        };
        let tp = ThrottledProgress::new(&callback);
        for i in 0..10 {
            tp.report("copy", i, 10, "IMG1.JPG");
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 9]);
    }

    #[test]
    fn test_progress_reports_completion() {
        let dir = tempdir().unwrap();
        add_source(&dir, "IMG1.JPG", b"1");
        let reader = MockReader::default().with("IMG1.JPG", SHOT);
        let seen: Arc<Mutex<Vec<(String, u64, u64)>>> = Arc::default();

        let sink = Arc::clone(&seen);
        process(&options(&dir), &reader, &move |stage, current, total, _| {
            sink.lock().unwrap().push((stage.to_string(), current, total));
        })
        .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.contains(&("metadata".to_string(), 0, 1)));
        assert!(seen.contains(&("copy".to_string(), 0, 1)));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_is_sorted_not_dropped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let path = add_source(&dir, "placeholder.jpg", b"latin-1 name");
        let renamed = path.with_file_name(OsStr::from_bytes(b"caf\xe9.JPG"));
        fs::rename(&path, &renamed).unwrap();
        pin_mtime(&renamed, 2022, 11, 3);
        let opts = options(&dir);

        let result = run(&opts, &MockReader::default()).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.no_metadata, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(files_under(&opts.no_exif), vec!["2022/11/caf\u{FFFD}.JPG"]);
    }
}
