//! 公司研究缓存。
//!
//! 以规范化公司名为键，每家公司一个 JSON 记录文件，只增不删：
//! 后续研究按 section 覆盖合并，URL 注册表做并集。写入由
//! 每公司锁文件串行化（有界重试，争用超限就放弃本次写入），
//! 读取无锁（快照语义）。

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};

use crate::quality::count_data_points;

const LOCK_RETRIES: usize = 5;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);
/// 一个 section 超过这个天数视为陈旧，可以重新研究。
const STALE_AFTER_DAYS: i64 = 30;

// ── Record model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Completeness {
    Complete,
    Substantial,
    Partial,
    Minimal,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSection {
    pub content: String,
    pub data_points: usize,
    pub updated_at: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UrlStatus {
    pub useful: bool,
    pub fetched_at_day: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub name: String,
    pub normalized: String,
    pub sections: BTreeMap<String, CachedSection>,
    pub url_registry: BTreeMap<String, UrlStatus>,
    pub completeness: Completeness,
}

impl CompanyRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            normalized: normalize_company_name(name),
            sections: BTreeMap::new(),
            url_registry: BTreeMap::new(),
            completeness: Completeness::Empty,
        }
    }

    fn reassess(&mut self) {
        let present = self.sections.len();
        let with_data = self
            .sections
            .values()
            .filter(|s| s.data_points >= 2)
            .count();
        self.completeness = if present >= 5 && with_data >= 4 {
            Completeness::Complete
        } else if present >= 4 && with_data >= 2 {
            Completeness::Substantial
        } else if present >= 2 {
            Completeness::Partial
        } else if present >= 1 {
            Completeness::Minimal
        } else {
            Completeness::Empty
        };
    }
}

/// 缓存键：小写、去标点、空白折叠。
pub fn normalize_company_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub companies: usize,
    pub sections_total: usize,
    pub urls_tracked: usize,
    pub urls_useless: usize,
}

// ── Cache ─────────────────────────────────────────────────────────────────────

pub struct ResearchCache {
    dir: PathBuf,
    enabled: bool,
}

impl ResearchCache {
    pub fn new(dir: PathBuf, enabled: bool) -> Self {
        Self { dir, enabled }
    }

    fn record_path(&self, company: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", normalize_company_name(company)))
    }

    fn lock_path(&self, company: &str) -> PathBuf {
        self.dir
            .join(format!("{}.lock", normalize_company_name(company)))
    }

    pub fn has_company_data(&self, company: &str) -> bool {
        self.enabled && self.record_path(company).exists()
    }

    /// 无锁读取：读到的是某个时刻的完整快照。
    pub fn get_company_data(&self, company: &str) -> Option<CompanyRecord> {
        if !self.enabled {
            return None;
        }
        let text = std::fs::read_to_string(self.record_path(company)).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// 缺失的 section 列表（对照阈值检查器的 section 集）。
    pub fn identify_gaps(&self, company: &str) -> Vec<String> {
        let known: Vec<&str> = crate::quality::threshold::SECTION_WEIGHTS
            .iter()
            .map(|(name, _, _)| *name)
            .collect();
        match self.get_company_data(company) {
            None => known.iter().map(|s| s.to_string()).collect(),
            Some(record) => known
                .iter()
                .filter(|s| !record.sections.contains_key(**s))
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn store_section(
        &self,
        company: &str,
        section: &str,
        content: &str,
        sources: &[String],
    ) -> Result<()> {
        self.mutate(company, |record| {
            record.sections.insert(
                section.to_string(),
                CachedSection {
                    content: content.to_string(),
                    data_points: count_data_points(content),
                    updated_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                    sources: sources.to_vec(),
                },
            );
        })
    }

    /// 整批写入：逐 section 覆盖（replace-per-section 策略）。
    pub fn store_full_research(
        &self,
        company: &str,
        sections: &BTreeMap<String, (String, Vec<String>)>,
    ) -> Result<()> {
        self.mutate(company, |record| {
            let now = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
            for (section, (content, sources)) in sections {
                record.sections.insert(
                    section.clone(),
                    CachedSection {
                        content: content.clone(),
                        data_points: count_data_points(content),
                        updated_at: now.clone(),
                        sources: sources.clone(),
                    },
                );
            }
        })
    }

    /// URL 注册表：标记某 URL 对该公司有没有用。
    pub fn mark_url(&self, company: &str, url: &str, useful: bool) -> Result<()> {
        let url = crate::state::normalize_url(url);
        self.mutate(company, |record| {
            record.url_registry.insert(
                url.clone(),
                UrlStatus {
                    useful,
                    fetched_at_day: days_since_epoch(),
                },
            );
        })
    }

    /// 此前标记为无用的 URL 集合，researcher 过滤搜索结果用。
    pub fn useless_urls(&self, company: &str) -> Vec<String> {
        self.get_company_data(company)
            .map(|record| {
                record
                    .url_registry
                    .iter()
                    .filter(|(_, status)| !status.useful)
                    .map(|(url, _)| url.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 是否需要（重新）研究。返回 (需要, 原因)。
    pub fn should_research(&self, company: &str, section: Option<&str>) -> (bool, String) {
        if !self.enabled {
            return (true, "cache disabled".to_string());
        }
        let Some(record) = self.get_company_data(company) else {
            return (true, "no cached data".to_string());
        };
        match section {
            Some(section) => match record.sections.get(section) {
                None => (true, format!("section `{section}` not cached")),
                Some(cached) if is_stale(&cached.updated_at) => {
                    (true, format!("section `{section}` is stale"))
                }
                Some(_) => (false, format!("section `{section}` is fresh")),
            },
            None => match record.completeness {
                Completeness::Complete
                    if !record.sections.values().any(|s| is_stale(&s.updated_at)) =>
                {
                    (false, "cached research is complete and fresh".to_string())
                }
                c => (true, format!("cached completeness is {c:?}")),
            },
        }
    }

    pub fn get_statistics(&self) -> CacheStatistics {
        let mut stats = CacheStatistics {
            companies: 0,
            sections_total: 0,
            urls_tracked: 0,
            urls_useless: 0,
        };
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return stats;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(record) = std::fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<CompanyRecord>(&t).ok())
            else {
                continue;
            };
            stats.companies += 1;
            stats.sections_total += record.sections.len();
            stats.urls_tracked += record.url_registry.len();
            stats.urls_useless += record
                .url_registry
                .values()
                .filter(|s| !s.useful)
                .count();
        }
        stats
    }

    /// 读-改-写一条公司记录，由锁文件保护。锁争用超过重试上限时
    /// 跳过本次写入（缓存写失败不是硬错误）。
    fn mutate<F: FnOnce(&mut CompanyRecord)>(&self, company: &str, apply: F) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create cache dir {}", self.dir.display()))?;

        let lock_path = self.lock_path(company);
        let Some(_lock) = FileLock::acquire(&lock_path) else {
            tracing::warn!(company, "cache lock contention, skipping write");
            return Ok(());
        };

        let path = self.record_path(company);
        let mut record = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| CompanyRecord::new(company));
        apply(&mut record);
        record.reassess();

        let json = serde_json::to_string_pretty(&record)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn is_stale(updated_at: &str) -> bool {
    let Ok(when) = chrono::NaiveDateTime::parse_from_str(updated_at, "%Y-%m-%dT%H:%M:%S") else {
        return true;
    };
    let age = Local::now().naive_local() - when;
    age.num_days() >= STALE_AFTER_DAYS
}

fn days_since_epoch() -> i64 {
    Local::now().date_naive().num_days_from_ce() as i64
}

/// `create_new` 锁文件；drop 时释放。
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Option<Self> {
        for attempt in 0..LOCK_RETRIES {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(_) => {
                    return Some(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(_) if attempt + 1 < LOCK_RETRIES => {
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(_) => return None,
            }
        }
        None
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, ResearchCache) {
        let dir = tempfile::tempdir().unwrap();
        let c = ResearchCache::new(dir.path().to_path_buf(), true);
        (dir, c)
    }

    #[test]
    fn company_names_normalize_consistently() {
        assert_eq!(normalize_company_name("Acme Corp."), "acme_corp");
        assert_eq!(normalize_company_name("  ACME   CORP "), "acme_corp");
        assert_eq!(normalize_company_name("AT&T Inc"), "at_t_inc");
    }

    #[test]
    fn section_round_trips() {
        let (_dir, c) = cache();
        c.store_section(
            "Acme Corp",
            "financial",
            "Revenue of $2.1B in FY2024",
            &["https://a.example/r".to_string()],
        )
        .unwrap();
        let record = c.get_company_data("acme corp").unwrap();
        assert_eq!(record.sections["financial"].content, "Revenue of $2.1B in FY2024");
        assert!(record.sections["financial"].data_points >= 2);
        assert_eq!(record.sections["financial"].sources.len(), 1);
    }

    #[test]
    fn sections_are_replaced_not_appended() {
        let (_dir, c) = cache();
        c.store_section("Acme", "market", "old content", &[]).unwrap();
        c.store_section("Acme", "market", "new content", &[]).unwrap();
        let record = c.get_company_data("Acme").unwrap();
        assert_eq!(record.sections["market"].content, "new content");
        assert_eq!(record.sections.len(), 1);
    }

    #[test]
    fn useless_urls_are_remembered() {
        let (_dir, c) = cache();
        c.mark_url("Acme", "https://junk.example/page?utm_source=x", false)
            .unwrap();
        c.mark_url("Acme", "https://good.example/report", true).unwrap();
        let useless = c.useless_urls("Acme");
        assert_eq!(useless, vec!["https://junk.example/page".to_string()]);
    }

    #[test]
    fn gaps_shrink_as_sections_land() {
        let (_dir, c) = cache();
        assert_eq!(c.identify_gaps("Acme").len(), 6);
        c.store_section("Acme", "financial", "Revenue $1B 10%", &[]).unwrap();
        let gaps = c.identify_gaps("Acme");
        assert_eq!(gaps.len(), 5);
        assert!(!gaps.contains(&"financial".to_string()));
    }

    #[test]
    fn should_research_reflects_cache_state() {
        let (_dir, c) = cache();
        let (needed, reason) = c.should_research("Acme", None);
        assert!(needed);
        assert_eq!(reason, "no cached data");

        c.store_section("Acme", "financial", "Revenue $1B margin 20% FY2024 CEO", &[])
            .unwrap();
        let (needed, _) = c.should_research("Acme", Some("financial"));
        assert!(!needed);
        let (needed, _) = c.should_research("Acme", Some("market"));
        assert!(needed);
    }

    #[test]
    fn completeness_rises_with_coverage() {
        let (_dir, c) = cache();
        let rich = "Revenue $4B margin 20% growth 10% FY2024 CEO";
        for section in ["financial", "market", "company_info", "competitive", "products"] {
            c.store_section("Acme", section, rich, &[]).unwrap();
        }
        let record = c.get_company_data("Acme").unwrap();
        assert_eq!(record.completeness, Completeness::Complete);
    }

    #[test]
    fn disabled_cache_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        let c = ResearchCache::new(dir.path().to_path_buf(), false);
        c.store_section("Acme", "financial", "text", &[]).unwrap();
        assert!(!c.has_company_data("Acme"));
        let (needed, reason) = c.should_research("Acme", None);
        assert!(needed);
        assert_eq!(reason, "cache disabled");
    }

    #[test]
    fn statistics_count_records() {
        let (_dir, c) = cache();
        c.store_section("Acme", "financial", "Revenue $1B", &[]).unwrap();
        c.store_section("Beta", "market", "share 5%", &[]).unwrap();
        c.mark_url("Acme", "https://junk.example/x", false).unwrap();
        let stats = c.get_statistics();
        assert_eq!(stats.companies, 2);
        assert_eq!(stats.sections_total, 2);
        assert_eq!(stats.urls_tracked, 1);
        assert_eq!(stats.urls_useless, 1);
    }
}
