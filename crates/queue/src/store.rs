use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sonos_scrobbler_core::{DedupKey, Submission, SubmissionKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const QUEUE_FILE: &str = "queue.json";
pub const DEAD_LETTER_FILE: &str = "dead_letters.json";
pub const STATUS_FILE: &str = "status.json";

/// A permanently failed scrobble kept for manual inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadLetter {
    pub submission: Submission,
    pub error: String,
    pub attempts: u32,
    pub failed_at: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentKey {
    pub kind: SubmissionKind,
    pub key: DedupKey,
    pub at: SystemTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedQueue {
    pub pending: Vec<Submission>,
    pub recent: Vec<RecentKey>,
}

/// On-disk home of the queue inside the data directory.
#[derive(Debug, Clone)]
pub struct QueueStore {
    queue_path: PathBuf,
    dead_letter_path: PathBuf,
}

impl QueueStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(Self {
            queue_path: dir.join(QUEUE_FILE),
            dead_letter_path: dir.join(DEAD_LETTER_FILE),
        })
    }

    pub fn load_queue(&self) -> Result<PersistedQueue> {
        read_json_or_default(&self.queue_path)
    }

    pub fn load_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        read_json_or_default(&self.dead_letter_path)
    }

    pub fn save_queue(&self, queue: &PersistedQueue) -> Result<()> {
        write_json_atomic(&self.queue_path, queue)
    }

    pub fn save_dead_letters(&self, letters: &[DeadLetter]) -> Result<()> {
        write_json_atomic(&self.dead_letter_path, letters)
    }
}

pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Writes to a sibling temp file and renames it over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{read_json_or_default, write_json_atomic, PersistedQueue, QueueStore};

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = QueueStore::open(&dir.path().join("nested")).expect("store");
        assert!(store.load_queue().expect("queue").pending.is_empty());
        assert!(store.load_dead_letters().expect("dead letters").is_empty());
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("values.json");
        write_json_atomic(&path, &vec![1, 2, 3]).expect("write");
        write_json_atomic(&path, &vec![4]).expect("rewrite");
        let read: Vec<u32> = read_json_or_default(&path).expect("read");
        assert_eq!(read, vec![4]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(read_json_or_default::<PersistedQueue>(&path).is_err());
    }
}
