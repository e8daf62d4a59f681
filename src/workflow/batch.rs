//! 批量执行：固定大小 worker 池，每个 worker 端到端跑一家公司。
//!
//! 语义：公司之间相互独立，至多 `max_workers` 并发；单家失败
//! 不影响其它家，汇总产物里标记 completed / blocked / failed。

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    cache::store::normalize_company_name,
    config::{CompanyProfile, Depth, ResearchConfig},
    tasks::{BatchRecord, FileTaskStore, TaskRecord, TaskStatus, TaskStore},
    workflow::{
        output::{self, BatchEntry, RunStatus},
        runner,
    },
};

/// 终态任务保留天数，批量启动时顺手清理。
const TASK_RETENTION_DAYS: i64 = 90;

pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    pub output_dir: std::path::PathBuf,
    pub total_cost: f64,
}

impl BatchResult {
    pub fn completed(&self) -> usize {
        self.count(RunStatus::Completed)
    }

    pub fn blocked(&self) -> usize {
        self.count(RunStatus::Blocked)
    }

    pub fn failed(&self) -> usize {
        self.count(RunStatus::Failed)
    }

    fn count(&self, status: RunStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn all_failed(&self) -> bool {
        !self.entries.is_empty() && self.failed() == self.entries.len()
    }
}

/// 跑一批公司。worker 池大小取 `config.max_workers`，任务状态经
/// 任务存储全程可查（排队 → 运行 → 终态）。
pub async fn research_batch(
    companies: &[String],
    depth: Depth,
    config: Arc<ResearchConfig>,
) -> Result<BatchResult> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let store = Arc::new(FileTaskStore::new(config.data_dir.clone()));
    if let Ok(removed) = store.cleanup_old_tasks(TASK_RETENTION_DAYS).await
        && removed > 0
    {
        tracing::debug!(removed, "old tasks cleaned up");
    }

    let batch_id = format!("batch-{timestamp}");
    let mut batch_record = BatchRecord {
        id: batch_id.clone(),
        companies: companies.to_vec(),
        status: TaskStatus::Running,
        created_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        updated_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        completed: 0,
        blocked: 0,
        failed: 0,
    };
    if let Err(err) = store.save_batch(&batch_record).await {
        tracing::warn!(error = %err, "batch record save failed");
    }

    let semaphore = Arc::new(Semaphore::new(config.max_workers));
    let mut set = JoinSet::new();

    for company in companies {
        let company = company.clone();
        let config = config.clone();
        let semaphore = semaphore.clone();
        let store = store.clone();
        let task_id = format!("{batch_id}-{}", normalize_company_name(&company));
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("batch semaphore closed");
            let mut task = TaskRecord::new(&task_id, &company, depth.name());
            task.status = TaskStatus::Running;
            if let Err(err) = store.save_task(&task).await {
                tracing::warn!(error = %err, "task record save failed");
            }

            let entry = match runner::run_research(&company, depth, config).await {
                Ok(outcome) => {
                    task.status = match outcome.status {
                        RunStatus::Completed => TaskStatus::Completed,
                        RunStatus::Blocked => TaskStatus::Blocked,
                        RunStatus::Failed => TaskStatus::Failed,
                    };
                    task.result_dir = outcome
                        .output_dir
                        .as_ref()
                        .map(|d| d.display().to_string());
                    BatchEntry {
                        company: outcome.company,
                        status: outcome.status,
                        quality_score: outcome.state.quality_score,
                        publishable: outcome.quality.as_ref().map(|q| q.publishable),
                        total_cost: outcome.state.total_cost,
                        output_dir: outcome.output_dir,
                        issues: outcome
                            .quality
                            .map(|q| q.issues.iter().map(|i| i.description.clone()).collect())
                            .unwrap_or_default(),
                    }
                }
                Err(err) => {
                    tracing::error!(company = %company, error = %err, "workflow failed");
                    task.status = TaskStatus::Failed;
                    task.error = Some(err.to_string());
                    BatchEntry {
                        company,
                        status: RunStatus::Failed,
                        quality_score: 0.0,
                        publishable: None,
                        total_cost: 0.0,
                        output_dir: None,
                        issues: vec![err.to_string()],
                    }
                }
            };
            if let Err(err) = store.update_task(&task).await {
                tracing::warn!(error = %err, "task record update failed");
            }
            entry
        });
    }

    let mut entries = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(entry) => entries.push(entry),
            Err(join_err) => tracing::error!("batch worker panicked: {join_err}"),
        }
    }
    // 汇总产物按公司名稳定排序（执行完成顺序不确定）。
    entries.sort_by(|a, b| a.company.cmp(&b.company));

    let output_dir = output::write_batch_outputs(&config, &entries, &timestamp)?;
    let total_cost = entries.iter().map(|e| e.total_cost).sum();

    batch_record.status = TaskStatus::Completed;
    batch_record.completed = entries.iter().filter(|e| e.status == RunStatus::Completed).count();
    batch_record.blocked = entries.iter().filter(|e| e.status == RunStatus::Blocked).count();
    batch_record.failed = entries.iter().filter(|e| e.status == RunStatus::Failed).count();
    if let Err(err) = store.update_batch(&batch_record).await {
        tracing::warn!(error = %err, "batch record update failed");
    }

    Ok(BatchResult {
        entries,
        output_dir,
        total_cost,
    })
}

/// `--market DIR`：目录下全部公司画像，批量跑，可选对比报告。
pub async fn run_market(
    profile_dir: &std::path::Path,
    default_depth: Depth,
    config: Arc<ResearchConfig>,
) -> Result<BatchResult> {
    let profiles = CompanyProfile::load_dir(profile_dir)?;
    // 画像可以各自覆盖 depth；目前批量接口按多数场景取统一 depth，
    // 单独覆盖走 --profile 单跑。
    let companies: Vec<String> = profiles.iter().map(|p| p.name.clone()).collect();
    tracing::info!(count = companies.len(), "market run starting");
    research_batch(&companies, default_depth, config).await
}
