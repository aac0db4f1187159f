use std::collections::HashMap;
use std::sync::Mutex;

use crate::date::CaptureTimestamp;

/// Outcome of [`DuplicateIndex::check_and_register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First file seen with this capture time; it is now canonical.
    First,
    /// The capture time is already claimed by the file with this base name.
    DuplicateOf(String),
}

/// Capture time -> base name of the first file placed under it.
///
/// Lives for a single run. Identity is the exact timestamp, not file content:
/// two different photos taken in the same second are duplicates here, and a
/// re-export with edited metadata is not.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    seen: Mutex<HashMap<CaptureTimestamp, String>>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and register as one atomic step. An existing entry is never overwritten.
    pub fn check_and_register(&self, timestamp: CaptureTimestamp, base_name: &str) -> Registration {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match seen.get(&timestamp) {
            Some(original) => Registration::DuplicateOf(original.clone()),
            None => {
                seen.insert(timestamp, base_name.to_string());
                Registration::First
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
