//! Task Store: daily-rotated JSON persistence for Task records.
//!
//! Each `YYYY-MM-DD.json` file under the store root maps `task_id → Task`.
//! Writes are atomic (temp-file then rename); an in-memory index mirrors
//! every loaded task for fast `get`/`list`.

use anyhow::{Context, Result};
use dashmap::DashMap;
use shared::model::Task;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct TaskStore {
    root: PathBuf,
    cache: DashMap<String, Task>,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create task store root {}", root.display()))?;
        Ok(Self {
            root,
            cache: DashMap::new(),
        })
    }

    /// Load every day-bucket file under the store root into the in-memory
    /// cache. Corrupt buckets are quarantined (renamed aside) with a WARN
    /// log; the rest still load.
    pub fn load_all(&self) -> Result<usize> {
        let mut loaded = 0usize;
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read task store directory {}", self.root.display())
                })
            }
        };

        for entry in entries {
            let entry = entry.context("failed to read task store directory entry")?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match self.load_bucket(&path) {
                Ok(bucket) => {
                    for (task_id, task) in bucket {
                        self.cache.insert(task_id, task);
                        loaded += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        bucket = %path.display(),
                        error = %e,
                        "quarantining corrupt day-bucket"
                    );
                    self.quarantine(&path);
                }
            }
        }

        Ok(loaded)
    }

    fn load_bucket(&self, path: &Path) -> Result<BTreeMap<String, Task>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bucket {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse bucket {}", path.display()))
    }

    fn quarantine(&self, path: &Path) {
        let quarantined = path.with_extension("json.corrupt");
        if let Err(e) = std::fs::rename(path, &quarantined) {
            warn!(
                bucket = %path.display(),
                error = %e,
                "failed to quarantine corrupt bucket"
            );
        }
    }

    fn bucket_path(&self, day_bucket_key: &str) -> PathBuf {
        self.root.join(format!("{}.json", day_bucket_key))
    }

    /// Atomic write-through of a single task into its day-bucket: the whole
    /// bucket is rewritten to a temp file in the same directory, then
    /// renamed over the target so a crash mid-write never leaves a partial
    /// bucket visible.
    pub fn put(&self, task: Task) -> Result<()> {
        let bucket_key = task.day_bucket_key();
        let bucket_path = self.bucket_path(&bucket_key);

        self.cache.insert(task.task_id.clone(), task);

        let mut bucket: BTreeMap<String, Task> = if bucket_path.exists() {
            self.load_bucket(&bucket_path).unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        for entry in self.cache.iter() {
            if entry.value().day_bucket_key() == bucket_key {
                bucket.insert(entry.key().clone(), entry.value().clone());
            }
        }

        let serialized = serde_json::to_vec_pretty(&bucket)
            .context("failed to serialize day-bucket to JSON")?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .context("failed to create temp file for atomic bucket write")?;
        use std::io::Write;
        tmp.write_all(&serialized)
            .context("failed to write temp bucket file")?;
        tmp.flush().context("failed to flush temp bucket file")?;
        tmp.persist(&bucket_path)
            .with_context(|| format!("failed to rename temp bucket onto {}", bucket_path.display()))?;

        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.cache.get(task_id).map(|e| e.value().clone())
    }

    /// Filtered, unordered listing over the in-memory cache.
    pub fn list(&self, filter: &TaskListFilter) -> Vec<Task> {
        self.cache
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| filter.matches(t))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub status: Option<shared::model::TaskStatus>,
    pub task_type: Option<String>,
    pub etab_name: Option<String>,
    pub app_name: Option<String>,
    pub created_after: Option<u64>,
    pub created_before: Option<u64>,
}

impl TaskListFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(ref task_type) = self.task_type {
            if &task.task_type != task_type {
                return false;
            }
        }
        if let Some(ref etab_name) = self.etab_name {
            if &task.etab_name != etab_name {
                return false;
            }
        }
        if let Some(ref app_name) = self.app_name {
            if &task.app_name != app_name {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if task.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if task.created_at > before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::TaskStatus;
    use std::collections::BTreeMap as Map;

    fn sample_task(task_id: &str, created_at: u64) -> Task {
        Task {
            task_id: task_id.to_string(),
            etab_name: "example-univ".to_string(),
            app_name: "studio".to_string(),
            app_version: None,
            task_type: "encoding".to_string(),
            source_url: "http://example/a.mp4".to_string(),
            affiliation: None,
            parameters: Map::new(),
            notify_url: None,
            runner_url: None,
            runner_name: None,
            status: TaskStatus::Pending,
            run_id: "run-1".to_string(),
            created_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            script_output: None,
            notify_attempts: 0,
            notify_last_error: None,
            notify_delivered_at: None,
            dispatch_attempts: 0,
        }
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let task = sample_task("t1", 1_700_000_000);
        store.put(task.clone()).unwrap();

        let fetched = store.get("t1").unwrap();
        assert_eq!(fetched.task_id, "t1");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[test]
    fn test_put_then_reload_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TaskStore::new(dir.path()).unwrap();
            store.put(sample_task("t1", 1_700_000_000)).unwrap();
            store.put(sample_task("t2", 1_700_000_000)).unwrap();
        }

        let reloaded = TaskStore::new(dir.path()).unwrap();
        let count = reloaded.load_all().unwrap();
        assert_eq!(count, 2);
        assert_eq!(reloaded.get("t1").unwrap().task_id, "t1");
        assert_eq!(reloaded.get("t2").unwrap().task_id, "t2");
    }

    #[test]
    fn test_tasks_share_a_bucket_by_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let t1 = sample_task("t1", 1_700_000_000);
        let bucket_key = t1.day_bucket_key();
        store.put(t1).unwrap();

        let bucket_path = dir.path().join(format!("{}.json", bucket_key));
        assert!(bucket_path.exists());
    }

    #[test]
    fn test_corrupt_bucket_is_quarantined_others_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        store.put(sample_task("good", 1_700_000_000)).unwrap();

        let corrupt_path = dir.path().join("1900-01-01.json");
        std::fs::write(&corrupt_path, b"{not valid json").unwrap();

        let reloaded = TaskStore::new(dir.path()).unwrap();
        let count = reloaded.load_all().unwrap();
        assert_eq!(count, 1);
        assert!(!corrupt_path.exists());
        assert!(dir.path().join("1900-01-01.json.corrupt").exists());
    }

    #[test]
    fn test_list_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path()).unwrap();
        let mut completed = sample_task("t1", 1_700_000_000);
        completed.status = TaskStatus::Completed;
        store.put(completed).unwrap();
        store.put(sample_task("t2", 1_700_000_000)).unwrap();

        let filter = TaskListFilter {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        let results = store.list(&filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, "t1");
    }
}
