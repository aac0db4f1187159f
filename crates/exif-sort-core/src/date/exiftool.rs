use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use serde_json::Value;

use super::{parse_exif_datetime, CaptureTimestamp, MetadataReader};
use crate::error::SortError;

pub const EXIFTOOL: &str = "exiftool";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// exiftool tag names, in priority order.
const CAPTURE_TAGS: [&str; 2] = ["DateTimeOriginal", "CreateDate"];

/// Reads capture times by running `exiftool -j` once per file.
#[derive(Debug, Clone)]
pub struct ExifToolReader {
    program: PathBuf,
    timeout: Duration,
}

impl Default for ExifToolReader {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ExifToolReader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from(EXIFTOOL),
            timeout,
        }
    }

    /// Use a specific executable instead of looking up `exiftool` on PATH.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .arg("-j")
            .args(CAPTURE_TAGS.iter().map(|t| format!("-{t}")))
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {}", self.program.display()))?;

        // Drain stdout on a side thread so a chatty child can never block on a full pipe
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("exiftool stdout was not captured"))?;
        let drain = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf)?;
            Ok(buf)
        });

        // A timeout too large to represent means no deadline at all
        let deadline = Instant::now().checked_add(self.timeout);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let _ = child.wait();
                bail!("exiftool timed out after {}s", self.timeout.as_secs_f64());
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = drain
            .join()
            .map_err(|_| anyhow!("exiftool output reader panicked"))??;
        if !status.success() {
            bail!("exiftool exited with {}", status);
        }
        Ok(output)
    }
}

impl MetadataReader for ExifToolReader {
    fn name(&self) -> &str {
        EXIFTOOL
    }

    fn check_available(&self) -> Result<(), SortError> {
        which::which(&self.program)
            .map(|_| ())
            .map_err(|_| SortError::PrereqMissing {
                tool: self.program.display().to_string(),
            })
    }

    fn capture_timestamp(&self, path: &Path) -> anyhow::Result<Option<CaptureTimestamp>> {
        let output = self.run(path)?;
        parse_exiftool_json(&output)
    }
}

/// Pick the capture time out of `exiftool -j` output for a single file.
pub fn parse_exiftool_json(output: &[u8]) -> anyhow::Result<Option<CaptureTimestamp>> {
    let json: Vec<Value> = serde_json::from_slice(output).context("parsing exiftool output")?;
    let Some(record) = json.into_iter().next() else {
        return Ok(None);
    };

    Ok(CAPTURE_TAGS
        .iter()
        .filter_map(|tag| record.get(*tag).and_then(Value::as_str))
        .find_map(parse_exif_datetime))
}
