//! Provider 配额计数。
//!
//! 进程内唯一实例（由 router 持有），天/月计数落盘为一个小 JSON 文件，
//! 写入走临时文件 + 原子 rename。跨天/跨月边界在读写时自动清零。

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Local;
use serde::{Deserialize, Serialize};

/// 剩余额度不高于该比例时降为 `Low`（仍可用，排序靠后）。
const LOW_WATERMARK: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Ok,
    Low,
    Exhausted,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaCheck {
    pub status: QuotaStatus,
    pub usage_percent: f64,
    pub remaining: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProviderUsage {
    day: String,
    month: String,
    requests_today: u64,
    requests_month: u64,
    errors_today: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuotaFile {
    providers: BTreeMap<String, ProviderUsage>,
}

#[derive(Debug)]
pub struct QuotaTracker {
    path: PathBuf,
    inner: Mutex<QuotaFile>,
}

impl QuotaTracker {
    /// 文件缺失或损坏都从零开始，不报错。
    pub fn load(path: PathBuf) -> Self {
        let file = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            inner: Mutex::new(file),
        }
    }

    /// 记录一次成功调用并落盘。
    pub fn record(&self, provider: &str) {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        let usage = entry_rolled(&mut inner, provider);
        usage.requests_today += 1;
        usage.requests_month += 1;
        persist(&self.path, &inner);
    }

    /// 记录一次失败（连续失败过多会把状态降为 `Error`）。
    pub fn record_error(&self, provider: &str) {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        let usage = entry_rolled(&mut inner, provider);
        usage.errors_today += 1;
        persist(&self.path, &inner);
    }

    pub fn status(&self, provider: &str, free_tier_daily: Option<u64>) -> QuotaStatus {
        self.check_quota(provider, free_tier_daily).status
    }

    /// 观测面：当前状态 + 已用比例 + 剩余次数。
    pub fn check_quota(&self, provider: &str, free_tier_daily: Option<u64>) -> QuotaCheck {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        let usage = entry_rolled(&mut inner, provider);
        if usage.errors_today >= 5 && usage.errors_today > usage.requests_today {
            return QuotaCheck {
                status: QuotaStatus::Error,
                usage_percent: 0.0,
                remaining: None,
            };
        }
        let Some(limit) = free_tier_daily else {
            return QuotaCheck {
                status: QuotaStatus::Ok,
                usage_percent: 0.0,
                remaining: None,
            };
        };
        let used = usage.requests_today;
        let usage_percent = if limit == 0 {
            100.0
        } else {
            (used as f64 / limit as f64) * 100.0
        };
        let remaining = limit.saturating_sub(used);
        let status = if remaining == 0 {
            QuotaStatus::Exhausted
        } else if (remaining as f64) <= (limit as f64) * LOW_WATERMARK {
            QuotaStatus::Low
        } else {
            QuotaStatus::Ok
        };
        QuotaCheck {
            status,
            usage_percent,
            remaining: Some(remaining),
        }
    }

    /// 关停时强制落盘（平时每次 record 已经写过）。
    pub fn flush(&self) {
        let inner = self.inner.lock().expect("quota lock poisoned");
        persist(&self.path, &inner);
    }
}

/// 取出某 provider 的计数并按当前日期滚动清零。
fn entry_rolled<'a>(file: &'a mut QuotaFile, provider: &str) -> &'a mut ProviderUsage {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let month = Local::now().format("%Y-%m").to_string();
    let usage = file.providers.entry(provider.to_string()).or_default();
    if usage.day != today {
        usage.day = today;
        usage.requests_today = 0;
        usage.errors_today = 0;
    }
    if usage.month != month {
        usage.month = month;
        usage.requests_month = 0;
    }
    usage
}

fn persist(path: &Path, file: &QuotaFile) {
    let Ok(json) = serde_json::to_string_pretty(file) else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let tmp = path.with_extension("json.tmp");
    if std::fs::write(&tmp, json).is_ok()
        && let Err(e) = std::fs::rename(&tmp, path)
    {
        tracing::warn!("quota persist failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (tempfile::TempDir, QuotaTracker) {
        let dir = tempfile::tempdir().unwrap();
        let t = QuotaTracker::load(dir.path().join("quota.json"));
        (dir, t)
    }

    #[test]
    fn counters_never_decrease_within_a_day() {
        let (_dir, t) = tracker();
        let mut last_remaining = u64::MAX;
        for _ in 0..5 {
            t.record("tavily");
            let remaining = t.check_quota("tavily", Some(1000)).remaining.unwrap();
            assert!(remaining < last_remaining);
            last_remaining = remaining;
        }
        assert_eq!(last_remaining, 995);
    }

    #[test]
    fn status_degrades_toward_exhausted() {
        let (_dir, t) = tracker();
        assert_eq!(t.status("gnews", Some(4)), QuotaStatus::Ok);
        for _ in 0..3 {
            t.record("gnews");
        }
        assert_eq!(t.status("gnews", Some(4)), QuotaStatus::Low);
        t.record("gnews");
        assert_eq!(t.status("gnews", Some(4)), QuotaStatus::Exhausted);
    }

    #[test]
    fn unlimited_provider_is_always_ok() {
        let (_dir, t) = tracker();
        for _ in 0..100 {
            t.record("gpt-4o");
        }
        let check = t.check_quota("gpt-4o", None);
        assert_eq!(check.status, QuotaStatus::Ok);
        assert_eq!(check.remaining, None);
    }

    #[test]
    fn usage_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota.json");
        {
            let t = QuotaTracker::load(path.clone());
            t.record("serper");
            t.record("serper");
        }
        let t = QuotaTracker::load(path);
        let check = t.check_quota("serper", Some(100));
        assert_eq!(check.remaining, Some(98));
        assert!((check.usage_percent - 2.0).abs() < 1e-9);
    }

    #[test]
    fn corrupt_file_starts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota.json");
        std::fs::write(&path, "{not json").unwrap();
        let t = QuotaTracker::load(path);
        assert_eq!(t.check_quota("tavily", Some(10)).remaining, Some(10));
    }

    #[test]
    fn repeated_errors_flip_status_to_error() {
        let (_dir, t) = tracker();
        for _ in 0..6 {
            t.record_error("duckduckgo");
        }
        assert_eq!(t.status("duckduckgo", None), QuotaStatus::Error);
    }
}
