//! Persistence store for the job table.
//!
//! The whole table is written as one JSON object keyed by job id. Each save
//! goes to a temp file in the same directory and is renamed over the target,
//! so a crash mid-write leaves the previous snapshot intact.

use crate::jobs::CompressionJob;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// The live job table, keyed by job id.
pub type JobTable = HashMap<String, CompressionJob>;

/// Errors that can occur while reading or writing the snapshot file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode job table: {0}")]
    Serialize(serde_json::Error),

    #[error("Failed to parse job file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON snapshot file holding the full job table.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table from disk.
    ///
    /// A missing file is an empty table. If a record's `job_id` disagrees
    /// with its key, the key wins.
    pub fn load(&self) -> Result<JobTable, PersistError> {
        if !self.path.exists() {
            return Ok(JobTable::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })?;

        let raw: HashMap<String, CompressionJob> =
            serde_json::from_str(&content).map_err(|source| PersistError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut table = JobTable::with_capacity(raw.len());
        for (key, mut job) in raw {
            if job.job_id != key {
                warn!(key = %key, job_id = %job.job_id, "job id does not match its key, using key");
                job.job_id = key.clone();
            }
            table.insert(key, job);
        }
        Ok(table)
    }

    /// Write the full table, replacing the previous snapshot atomically.
    pub fn save(&self, table: &JobTable) -> Result<(), PersistError> {
        // Sorted keys keep the file diffable between snapshots
        let ordered: BTreeMap<&str, &CompressionJob> =
            table.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let json = serde_json::to_vec_pretty(&ordered).map_err(PersistError::Serialize)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
            path: dir.clone(),
            source,
        })?;

        let tmp_path = dir.join(self.temp_file_name());
        if let Err(source) = write_synced(&tmp_path, &json) {
            let _ = fs::remove_file(&tmp_path);
            return Err(PersistError::Io {
                path: tmp_path,
                source,
            });
        }

        if let Err(source) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(PersistError::Io {
                path: self.path.clone(),
                source,
            });
        }

        Ok(())
    }

    /// Move an unreadable snapshot out of the way as `<name>.corrupt.<timestamp>`.
    ///
    /// Returns the new path, or `None` if there was no file to move.
    pub fn quarantine(&self) -> Result<Option<PathBuf>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let target = corrupt_path(&self.path);
        fs::rename(&self.path, &target).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(target))
    }

    fn temp_file_name(&self) -> String {
        let base = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jobs.json".to_string());
        format!(".{}.{}.tmp", base, Uuid::new_v4())
    }
}

fn corrupt_path(original: &Path) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut moved = original.as_os_str().to_owned();
    moved.push(format!(".corrupt.{}", timestamp));
    PathBuf::from(moved)
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobPriority, JobStatus};
    use tempfile::TempDir;

    fn make_job(id: &str) -> CompressionJob {
        CompressionJob::new(id, format!("/in/{}.wav", id), format!("/out/{}.mp3", id), 64, "mp3")
    }

    fn table_of(jobs: Vec<CompressionJob>) -> JobTable {
        jobs.into_iter().map(|j| (j.job_id.clone(), j)).collect()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::new(temp_dir.path().join("absent.json"));

        let table = store.load().expect("missing file should load as empty");
        assert!(table.is_empty());
    }

    #[test]
    fn test_save_and_load_table() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::new(temp_dir.path().join("jobs.json"));

        let mut failed = make_job("b").with_priority(JobPriority::Urgent);
        failed.start();
        failed.fail("Compression failed after all retries");
        let table = table_of(vec![make_job("a"), failed.clone()]);

        store.save(&table).expect("save should succeed");
        let loaded = store.load().expect("load should succeed");

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"].status, JobStatus::Pending);
        assert_eq!(loaded["b"], failed);
    }

    #[test]
    fn test_file_is_one_object_keyed_by_job_id() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.json");
        let store = JobStore::new(&path);

        store
            .save(&table_of(vec![make_job("x").with_priority(JobPriority::Low)]))
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let obj = value.as_object().expect("top level should be an object");
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["x"]["status"], "pending");
        assert_eq!(obj["x"]["priority"], 1);
        assert_eq!(obj["x"]["input_path"], "/in/x.wav");
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::new(temp_dir.path().join("jobs.json"));

        store.save(&table_of(vec![make_job("a"), make_job("b")])).unwrap();
        store.save(&table_of(vec![make_job("c")])).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("c"));

        let entries: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["jobs.json".to_string()]);
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/state/jobs.json");
        let store = JobStore::new(&path);

        store.save(&JobTable::new()).expect("should create dirs");
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.json");
        fs::write(&path, "{ not json").unwrap();

        let result = JobStore::new(&path).load();
        assert!(matches!(result, Err(PersistError::Parse { .. })));
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JobStore::new(&path);

        let moved = store.quarantine().unwrap().expect("file should be moved");

        assert!(!path.exists());
        assert_eq!(fs::read_to_string(&moved).unwrap(), "{ not json");
        let name = moved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("jobs.json.corrupt."));
        assert!(store.quarantine().unwrap().is_none());
    }

    #[test]
    fn test_key_wins_over_mismatched_job_id() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.json");
        let job = make_job("inner");
        let mut raw = HashMap::new();
        raw.insert("outer".to_string(), job);
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let loaded = JobStore::new(&path).load().unwrap();
        assert_eq!(loaded["outer"].job_id, "outer");
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        // Parent "directory" is a regular file
        let store = JobStore::new(blocker.join("jobs.json"));
        assert!(matches!(
            store.save(&JobTable::new()),
            Err(PersistError::Io { .. })
        ));
    }
}
