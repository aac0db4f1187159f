use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// `{base}_{NN}.{ext}` with NN zero-padded to two digits.
pub fn suffixed_name(base_name: &str, n: u32, extension: &str) -> String {
    if extension.is_empty() {
        format!("{}_{:02}", base_name, n)
    } else {
        format!("{}_{:02}.{}", base_name, n, extension)
    }
}

/// Lowest-numbered `{base}_{NN}.{ext}` not present in `directory`, starting at 01.
///
/// The name is not reserved. A failure to check existence (for example an
/// unreadable directory) is returned as an error rather than read as "free".
pub fn next_free_name(directory: &Path, base_name: &str, extension: &str) -> io::Result<String> {
    probe(directory, base_name, extension, 1, |_| false).map(|(name, _)| name)
}

fn probe(
    directory: &Path,
    base_name: &str,
    extension: &str,
    start: u32,
    taken: impl Fn(&Path) -> bool,
) -> io::Result<(String, u32)> {
    let mut n = start.max(1);
    loop {
        let name = suffixed_name(base_name, n, extension);
        let candidate = directory.join(&name);
        if !taken(&candidate) && !candidate.try_exists()? {
            return Ok((name, n));
        }
        n += 1;
    }
}

/// Hands out destination paths for one run.
///
/// Every path chosen during planning is recorded here before any copy starts,
/// so two files can never be given the same name even though copies run in
/// parallel later.
///
/// Names are compared ignoring ASCII case, so `IMG1_01.JPG` and `IMG1_01.jpg`
/// never both get handed out, even on a case-sensitive filesystem.
#[derive(Debug, Default)]
pub struct NameReserver {
    reserved: HashSet<PathBuf>,
    // Next suffix to try per (directory, base, ext), so long families are not
    // re-probed from 01 every time
    counters: HashMap<(PathBuf, String, String), u32>,
}

impl NameReserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.contains(&reservation_key(path))
    }

    /// Claim `path`. Returns false if it was already claimed.
    pub fn reserve(&mut self, path: PathBuf) -> bool {
        self.reserved.insert(reservation_key(&path))
    }

    /// Like [`next_free_name`], but also skips names claimed earlier in this
    /// run, and claims the result.
    pub fn next_free_name(
        &mut self,
        directory: &Path,
        base_name: &str,
        extension: &str,
    ) -> io::Result<String> {
        let key = (
            directory.to_path_buf(),
            base_name.to_ascii_lowercase(),
            extension.to_ascii_lowercase(),
        );
        let start = self.counters.get(&key).copied().unwrap_or(1);
        let reserved = &self.reserved;
        let (name, n) = probe(directory, base_name, extension, start, |p| {
            reserved.contains(&reservation_key(p))
        })?;
        self.counters.insert(key, n + 1);
        self.reserve(directory.join(&name));
        Ok(name)
    }
}

fn reservation_key(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(name.to_ascii_lowercase()),
        None => path.to_path_buf(),
    }
}
