//! 成本账本。
//!
//! 每次 provider 调用记一条 `{timestamp, provider, category, units, cost,
//! metadata}`，天/月汇总随记随更。追加由进程级互斥锁串行化，
//! 落盘与配额文件同样走原子 rename。预算阈值越线时触发注册的回调。

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 预算警戒线（百分比），对天/月预算分别生效。
const ALERT_THRESHOLDS: &[u8] = &[50, 75, 90];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: String,
    pub provider: String,
    pub category: String,
    pub units: u64,
    pub cost: f64,
    pub metadata: Value,
}

/// 账本的持久化形态（JSON schema 对外稳定）。
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    records: Vec<CostRecord>,
    daily: BTreeMap<String, f64>,
    monthly: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertScope {
    Daily,
    Monthly,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub scope: AlertScope,
    pub threshold_percent: u8,
    pub spent: f64,
    pub budget: f64,
}

pub type AlertCallback = Box<dyn Fn(&BudgetAlert) + Send + Sync>;

struct LedgerInner {
    file: LedgerFile,
    /// 已触发的 (scope, threshold, period)，避免同一周期重复报警。
    fired: BTreeSet<(AlertScope, u8, String)>,
}

pub struct CostLedger {
    path: PathBuf,
    daily_budget: f64,
    monthly_budget: f64,
    inner: Mutex<LedgerInner>,
    callbacks: Mutex<Vec<AlertCallback>>,
}

impl CostLedger {
    pub fn load(path: PathBuf, daily_budget: f64, monthly_budget: f64) -> Self {
        let file: LedgerFile = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            daily_budget,
            monthly_budget,
            inner: Mutex::new(LedgerInner {
                file,
                fired: BTreeSet::new(),
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// 注册预算警报回调（观测层挂在这里，core 不关心去向）。
    pub fn on_alert(&self, callback: AlertCallback) {
        self.callbacks
            .lock()
            .expect("ledger callback lock poisoned")
            .push(callback);
    }

    pub fn record(&self, provider: &str, category: &str, units: u64, cost: f64, metadata: Value) {
        let now = Local::now();
        let day = now.format("%Y-%m-%d").to_string();
        let month = now.format("%Y-%m").to_string();
        let mut alerts = Vec::new();
        {
            let mut inner = self.inner.lock().expect("ledger lock poisoned");
            inner.file.records.push(CostRecord {
                timestamp: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
                provider: provider.to_string(),
                category: category.to_string(),
                units,
                cost,
                metadata,
            });
            *inner.file.daily.entry(day.clone()).or_insert(0.0) += cost;
            *inner.file.monthly.entry(month.clone()).or_insert(0.0) += cost;

            let day_spent = inner.file.daily[&day];
            let month_spent = inner.file.monthly[&month];
            collect_alerts(
                &mut inner.fired,
                AlertScope::Daily,
                &day,
                day_spent,
                self.daily_budget,
                &mut alerts,
            );
            collect_alerts(
                &mut inner.fired,
                AlertScope::Monthly,
                &month,
                month_spent,
                self.monthly_budget,
                &mut alerts,
            );
            persist(&self.path, &inner.file);
        }
        // 回调在锁外执行，避免回调里再进账本造成死锁。
        if !alerts.is_empty() {
            let callbacks = self.callbacks.lock().expect("ledger callback lock poisoned");
            for alert in &alerts {
                tracing::warn!(
                    scope = ?alert.scope,
                    threshold = alert.threshold_percent,
                    spent = alert.spent,
                    budget = alert.budget,
                    "budget threshold crossed"
                );
                for cb in callbacks.iter() {
                    cb(alert);
                }
            }
        }
    }

    pub fn spent_today(&self) -> f64 {
        let day = Local::now().format("%Y-%m-%d").to_string();
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.file.daily.get(&day).copied().unwrap_or(0.0)
    }

    pub fn spent_this_month(&self) -> f64 {
        let month = Local::now().format("%Y-%m").to_string();
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.file.monthly.get(&month).copied().unwrap_or(0.0)
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().expect("ledger lock poisoned").file.records.len()
    }

    pub fn export_json(&self) -> Result<String> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        serde_json::to_string_pretty(&inner.file).context("ledger JSON export failed")
    }

    pub fn export_csv(&self) -> String {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        let mut out = String::from("timestamp,provider,category,units,cost\n");
        for r in &inner.file.records {
            out.push_str(&format!(
                "{},{},{},{},{:.6}\n",
                r.timestamp, r.provider, r.category, r.units, r.cost
            ));
        }
        out
    }

    /// 关停落盘：工作文件写 pretty JSON，旁边同步一份 CSV 导出。
    pub fn flush(&self) {
        if let Ok(json) = self.export_json() {
            write_atomic(&self.path, &json);
        }
        write_atomic(&self.path.with_extension("csv"), &self.export_csv());
    }
}

fn collect_alerts(
    fired: &mut BTreeSet<(AlertScope, u8, String)>,
    scope: AlertScope,
    period: &str,
    spent: f64,
    budget: f64,
    out: &mut Vec<BudgetAlert>,
) {
    if budget <= 0.0 {
        return;
    }
    let percent = spent / budget * 100.0;
    for &threshold in ALERT_THRESHOLDS {
        if percent >= threshold as f64 {
            let key = (scope, threshold, period.to_string());
            if fired.insert(key) {
                out.push(BudgetAlert {
                    scope,
                    threshold_percent: threshold,
                    spent,
                    budget,
                });
            }
        }
    }
}

fn persist(path: &Path, file: &LedgerFile) {
    let Ok(json) = serde_json::to_string(file) else {
        return;
    };
    write_atomic(path, &json);
}

fn write_atomic(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let tmp = path.with_extension("tmp");
    if std::fs::write(&tmp, content).is_ok()
        && let Err(e) = std::fs::rename(&tmp, path)
    {
        tracing::warn!("cost ledger persist failed: {e}");
    }
}
