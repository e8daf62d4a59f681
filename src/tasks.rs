//! 任务存储接口（异步 API 层挂载用）。
//!
//! 后端可插拔：trait 只约定 CRUD + 列表 + 清理，内置一个
//! 每任务一个 JSON 文件的参考实现。

use std::{
    collections::BTreeMap,
    path::PathBuf,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub company: String,
    pub status: TaskStatus,
    pub depth: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub result_dir: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(id: &str, company: &str, depth: &str) -> Self {
        let now = now_stamp();
        Self {
            id: id.to_string(),
            company: company.to_string(),
            status: TaskStatus::Queued,
            depth: depth.to_string(),
            created_at: now.clone(),
            updated_at: now,
            result_dir: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    pub companies: Vec<String>,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    pub completed: usize,
    pub blocked: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub company: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &TaskRecord) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;
    async fn update_task(&self, task: &TaskRecord) -> Result<()>;
    async fn delete_task(&self, id: &str) -> Result<bool>;
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;
    async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<usize>;
    async fn save_batch(&self, batch: &BatchRecord) -> Result<()>;
    async fn get_batch(&self, id: &str) -> Result<Option<BatchRecord>>;
    async fn update_batch(&self, batch: &BatchRecord) -> Result<()>;
    /// 清理早于 `older_than_days` 的终态任务，返回删除数量。
    async fn cleanup_old_tasks(&self, older_than_days: i64) -> Result<usize>;
}

// ── File-backed reference implementation ──────────────────────────────────────

pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.dir.join("tasks").join(format!("{id}.json"))
    }

    fn batch_path(&self, id: &str) -> PathBuf {
        self.dir.join("batches").join(format!("{id}.json"))
    }

    fn write_json<T: Serialize>(&self, path: &PathBuf, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path).context("task store rename failed")?;
        Ok(())
    }

    fn all_tasks(&self) -> Vec<TaskRecord> {
        let Ok(entries) = std::fs::read_dir(self.dir.join("tasks")) else {
            return Vec::new();
        };
        let mut map = BTreeMap::new();
        for entry in entries.filter_map(|e| e.ok()) {
            if let Some(task) = std::fs::read_to_string(entry.path())
                .ok()
                .and_then(|t| serde_json::from_str::<TaskRecord>(&t).ok())
            {
                map.insert(task.created_at.clone() + &task.id, task);
            }
        }
        map.into_values().collect()
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn save_task(&self, task: &TaskRecord) -> Result<()> {
        self.write_json(&self.task_path(&task.id), task)
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let Ok(text) = std::fs::read_to_string(self.task_path(id)) else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&text).ok())
    }

    async fn update_task(&self, task: &TaskRecord) -> Result<()> {
        let mut task = task.clone();
        task.updated_at = now_stamp();
        self.write_json(&self.task_path(&task.id), &task)
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        match std::fs::remove_file(self.task_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        Ok(self
            .all_tasks()
            .into_iter()
            .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
            .filter(|t| {
                filter
                    .company
                    .as_deref()
                    .map(|c| t.company.eq_ignore_ascii_case(c))
                    .unwrap_or(true)
            })
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<usize> {
        Ok(self
            .all_tasks()
            .iter()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .count())
    }

    async fn save_batch(&self, batch: &BatchRecord) -> Result<()> {
        self.write_json(&self.batch_path(&batch.id), batch)
    }

    async fn get_batch(&self, id: &str) -> Result<Option<BatchRecord>> {
        let Ok(text) = std::fs::read_to_string(self.batch_path(id)) else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&text).ok())
    }

    async fn update_batch(&self, batch: &BatchRecord) -> Result<()> {
        let mut batch = batch.clone();
        batch.updated_at = now_stamp();
        self.write_json(&self.batch_path(&batch.id), &batch)
    }

    async fn cleanup_old_tasks(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Local::now().naive_local() - chrono::Duration::days(older_than_days);
        let mut removed = 0;
        for task in self.all_tasks() {
            let terminal = matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
            );
            let Ok(created) =
                chrono::NaiveDateTime::parse_from_str(&task.created_at, "%Y-%m-%dT%H:%M:%S")
            else {
                continue;
            };
            if terminal && created < cutoff && self.delete_task(&task.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileTaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = FileTaskStore::new(dir.path().to_path_buf());
        (dir, s)
    }

    #[tokio::test]
    async fn task_crud_round_trip() {
        let (_dir, s) = store();
        let mut task = TaskRecord::new("t-1", "Acme", "standard");
        s.save_task(&task).await.unwrap();
        assert_eq!(s.get_task("t-1").await.unwrap().unwrap().company, "Acme");

        task.status = TaskStatus::Completed;
        s.update_task(&task).await.unwrap();
        assert_eq!(
            s.get_task("t-1").await.unwrap().unwrap().status,
            TaskStatus::Completed
        );

        assert!(s.delete_task("t-1").await.unwrap());
        assert!(!s.delete_task("t-1").await.unwrap());
        assert!(s.get_task("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_status_and_company() {
        let (_dir, s) = store();
        for (id, company, status) in [
            ("a", "Acme", TaskStatus::Queued),
            ("b", "Acme", TaskStatus::Completed),
            ("c", "Beta", TaskStatus::Queued),
        ] {
            let mut t = TaskRecord::new(id, company, "quick");
            t.status = status;
            s.save_task(&t).await.unwrap();
        }
        let queued = s
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Queued),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);

        let acme = s
            .list_tasks(&TaskFilter {
                company: Some("acme".to_string()),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(acme.len(), 2);

        let paged = s
            .list_tasks(&TaskFilter {
                limit: 1,
                offset: 1,
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);

        assert_eq!(s.count_tasks(Some(TaskStatus::Completed)).await.unwrap(), 1);
        assert_eq!(s.count_tasks(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_tasks() {
        let (_dir, s) = store();
        let mut old_done = TaskRecord::new("old", "Acme", "quick");
        old_done.status = TaskStatus::Completed;
        old_done.created_at = "2020-01-01T00:00:00".to_string();
        s.save_task(&old_done).await.unwrap();

        let mut old_running = TaskRecord::new("run", "Acme", "quick");
        old_running.status = TaskStatus::Running;
        old_running.created_at = "2020-01-01T00:00:00".to_string();
        s.save_task(&old_running).await.unwrap();

        let fresh = TaskRecord::new("new", "Beta", "quick");
        s.save_task(&fresh).await.unwrap();

        let removed = s.cleanup_old_tasks(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(s.get_task("old").await.unwrap().is_none());
        assert!(s.get_task("run").await.unwrap().is_some());
        assert!(s.get_task("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn batch_round_trip() {
        let (_dir, s) = store();
        let batch = BatchRecord {
            id: "b-1".to_string(),
            companies: vec!["Acme".to_string(), "Beta".to_string()],
            status: TaskStatus::Running,
            created_at: now_stamp(),
            updated_at: now_stamp(),
            completed: 0,
            blocked: 0,
            failed: 0,
        };
        s.save_batch(&batch).await.unwrap();
        let mut loaded = s.get_batch("b-1").await.unwrap().unwrap();
        loaded.completed = 2;
        loaded.status = TaskStatus::Completed;
        s.update_batch(&loaded).await.unwrap();
        assert_eq!(s.get_batch("b-1").await.unwrap().unwrap().completed, 2);
    }
}
