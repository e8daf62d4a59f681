//! 阈值检查器：同一个组件的两个检查面。
//!
//! `check_raw_results` 在搜索刚回来的早期阶段评估原始结果够不够；
//! `check_research_data` 在抽取之后按 section 权重评估结构化数据。
//! 两边都给出重试策略建议，供迭代轮生成针对性查询。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    quality::has_specific_values,
    state::SearchHit,
};

// ── Retry strategies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
    Multilingual,
    ParentCompany,
    AlternativeSources,
    RelaxedQueries,
    RegionalSources,
    ArchivedData,
    PressReleases,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Multilingual => "MULTILINGUAL",
            Self::ParentCompany => "PARENT_COMPANY",
            Self::AlternativeSources => "ALTERNATIVE_SOURCES",
            Self::RelaxedQueries => "RELAXED_QUERIES",
            Self::RegionalSources => "REGIONAL_SOURCES",
            Self::ArchivedData => "ARCHIVED_DATA",
            Self::PressReleases => "PRESS_RELEASES",
        }
    }
}

/// 结构化数据充分度的离散评级。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sufficiency {
    Insufficient,
    Poor,
    Adequate,
    Good,
    Excellent,
}

impl Sufficiency {
    fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Adequate
        } else if score >= 30.0 {
            Self::Poor
        } else {
            Self::Insufficient
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyType {
    Public,
    Private,
    Subsidiary,
    Unknown,
}

// ── Early-stage check (raw search results) ────────────────────────────────────

/// 原始结果覆盖的内容类别，关键词粗筛。
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "financial",
        &["revenue", "earnings", "profit", "funding", "valuation", "ipo"],
    ),
    (
        "products",
        &["product", "service", "platform", "launch", "offering"],
    ),
    (
        "leadership",
        &["ceo", "founder", "executive", "leadership", "board"],
    ),
    (
        "competitors",
        &["competitor", "rival", "market share", "versus", "alternative"],
    ),
    (
        "news",
        &["announced", "reported", "according to", "press release"],
    ),
];

const MIN_SOURCES: usize = 3;
const MIN_UNIQUE_DOMAINS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct RawThresholdCheck {
    pub source_count: usize,
    pub unique_domains: usize,
    /// 0..=100：平均内容长度 + 带日期结果占比的合成分。
    pub content_richness: f64,
    pub category_flags: BTreeMap<&'static str, bool>,
    pub sufficiency: Sufficiency,
    pub strategies: Vec<RetryStrategy>,
}

impl RawThresholdCheck {
    pub fn passes(&self) -> bool {
        self.source_count >= MIN_SOURCES && self.unique_domains >= MIN_UNIQUE_DOMAINS
    }
}

pub fn check_raw_results(
    results: &[SearchHit],
    company: &str,
    company_type: CompanyType,
) -> RawThresholdCheck {
    let source_count = results.len();
    let unique_domains = {
        let mut domains: Vec<&str> = results.iter().map(|h| h.domain.as_str()).collect();
        domains.sort_unstable();
        domains.dedup();
        domains.len()
    };

    let avg_len = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|h| h.content.len()).sum::<usize>() as f64 / results.len() as f64
    };
    let dated_fraction = if results.is_empty() {
        0.0
    } else {
        results.iter().filter(|h| h.published_at.is_some()).count() as f64 / results.len() as f64
    };
    // 平均 300 字符拿满长度分。
    let content_richness = ((avg_len / 300.0).min(1.0) * 70.0 + dated_fraction * 30.0).min(100.0);

    let all_text: String = results
        .iter()
        .map(|h| format!("{} {}", h.title, h.content))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let category_flags: BTreeMap<&'static str, bool> = CATEGORY_KEYWORDS
        .iter()
        .map(|(name, keywords)| (*name, keywords.iter().any(|k| all_text.contains(k))))
        .collect();
    let categories_hit = category_flags.values().filter(|v| **v).count();

    let coverage_score = (source_count.min(10) as f64 / 10.0) * 40.0
        + (unique_domains.min(5) as f64 / 5.0) * 20.0
        + (categories_hit as f64 / CATEGORY_KEYWORDS.len() as f64) * 20.0
        + content_richness * 0.2;
    let sufficiency = Sufficiency::from_score(coverage_score);

    let mut strategies = Vec::new();
    if source_count < MIN_SOURCES {
        strategies.push(RetryStrategy::RelaxedQueries);
        strategies.push(RetryStrategy::Multilingual);
        strategies.push(RetryStrategy::AlternativeSources);
    } else if sufficiency <= Sufficiency::Poor {
        strategies.push(RetryStrategy::AlternativeSources);
        if !category_flags.get("financial").copied().unwrap_or(false) {
            strategies.push(RetryStrategy::PressReleases);
        }
        if !category_flags.get("news").copied().unwrap_or(false) {
            strategies.push(RetryStrategy::ArchivedData);
        }
    }
    match company_type {
        CompanyType::Subsidiary => strategies.push(RetryStrategy::ParentCompany),
        CompanyType::Private if sufficiency <= Sufficiency::Adequate => {
            strategies.push(RetryStrategy::PressReleases);
        }
        CompanyType::Unknown if sufficiency <= Sufficiency::Poor => {
            strategies.push(RetryStrategy::RegionalSources);
        }
        _ => {}
    }
    strategies.sort();
    strategies.dedup();

    tracing::debug!(
        company,
        source_count,
        unique_domains,
        content_richness,
        ?sufficiency,
        "raw threshold check"
    );

    RawThresholdCheck {
        source_count,
        unique_domains,
        content_richness,
        category_flags,
        sufficiency,
        strategies,
    }
}

// ── Late-stage check (structured research data) ───────────────────────────────

/// section 权重；critical 的 section 缺失会直接压低 sufficiency。
pub const SECTION_WEIGHTS: &[(&str, f64, bool)] = &[
    ("financial", 0.30, true),
    ("market", 0.20, false),
    ("company_info", 0.15, true),
    ("competitive", 0.15, false),
    ("products", 0.10, false),
    ("strategy", 0.10, false),
];

#[derive(Debug, Clone, Serialize)]
pub struct DataThresholdCheck {
    pub section_coverages: BTreeMap<&'static str, f64>,
    pub missing_critical: Vec<&'static str>,
    /// 0..=100 的加权覆盖率。
    pub weighted_coverage: f64,
    pub sufficiency: Sufficiency,
    pub strategies: Vec<RetryStrategy>,
}

pub fn check_research_data(
    data: &BTreeMap<String, String>,
    strict: bool,
) -> DataThresholdCheck {
    let mut section_coverages = BTreeMap::new();
    let mut missing_critical = Vec::new();
    let mut weighted_coverage = 0.0;

    for &(section, weight, critical) in SECTION_WEIGHTS {
        let content = data.get(section).map(String::as_str).unwrap_or("");
        let coverage = section_coverage(content);
        if critical && coverage < 20.0 {
            missing_critical.push(section);
        }
        weighted_coverage += coverage * weight;
        section_coverages.insert(section, coverage);
    }

    let mut sufficiency = Sufficiency::from_score(weighted_coverage);
    if !missing_critical.is_empty() {
        sufficiency = sufficiency.min(Sufficiency::Poor);
    }
    if strict && sufficiency == Sufficiency::Adequate {
        sufficiency = Sufficiency::Poor;
    }

    let mut strategies = Vec::new();
    if section_coverages.get("financial").copied().unwrap_or(0.0) < 40.0 {
        strategies.push(RetryStrategy::PressReleases);
        strategies.push(RetryStrategy::AlternativeSources);
    }
    if section_coverages.get("company_info").copied().unwrap_or(0.0) < 30.0 {
        strategies.push(RetryStrategy::Multilingual);
        strategies.push(RetryStrategy::ParentCompany);
    }
    if sufficiency <= Sufficiency::Poor {
        strategies.push(RetryStrategy::RelaxedQueries);
    }
    strategies.sort();
    strategies.dedup();

    DataThresholdCheck {
        section_coverages,
        missing_critical,
        weighted_coverage,
        sufficiency,
        strategies,
    }
}

/// 单个 section 的覆盖分：内容长度 + 是否出现具体数值。
fn section_coverage(content: &str) -> f64 {
    if content.trim().is_empty() {
        return 0.0;
    }
    let words = content.split_whitespace().count() as f64;
    let length_score = (words / 80.0).min(1.0) * 60.0;
    let value_score = if has_specific_values(content) { 40.0 } else { 0.0 };
    length_score + value_score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str, content: &str, dated: bool) -> SearchHit {
        let mut h = SearchHit::new(url, "title", content, "test");
        if dated {
            h.published_at = Some("2025-01-10".to_string());
        }
        h
    }

    #[test]
    fn too_few_sources_fails_and_recommends_relaxed_queries() {
        let results = vec![hit("https://a.example/1", "short", false)];
        let check = check_raw_results(&results, "ZZZNonexistentCo", CompanyType::Unknown);
        assert!(!check.passes());
        assert!(check.strategies.contains(&RetryStrategy::RelaxedQueries));
        assert!(check.strategies.contains(&RetryStrategy::Multilingual));
        assert_eq!(check.sufficiency, Sufficiency::Insufficient);
    }

    #[test]
    fn subsidiary_always_gets_parent_company_strategy() {
        let results: Vec<SearchHit> = (0..8)
            .map(|i| {
                hit(
                    &format!("https://site{i}.example/page"),
                    "revenue earnings product launch ceo competitor announced revenue profit growth data with plenty of words to look rich enough for the richness score",
                    true,
                )
            })
            .collect();
        let check = check_raw_results(&results, "SubCo", CompanyType::Subsidiary);
        assert!(check.passes());
        assert!(check.strategies.contains(&RetryStrategy::ParentCompany));
    }

    #[test]
    fn category_flags_reflect_keywords() {
        let results = vec![
            hit("https://a.example/1", "quarterly revenue and profit grew", false),
            hit("https://b.example/2", "the CEO announced a new platform", false),
            hit("https://c.example/3", "competitor comparison and market share", false),
        ];
        let check = check_raw_results(&results, "Acme", CompanyType::Public);
        assert!(check.category_flags["financial"]);
        assert!(check.category_flags["leadership"]);
        assert!(check.category_flags["competitors"]);
    }

    fn rich_section() -> String {
        let mut s = "Revenue of $12.3B with margin 23% across segments. ".repeat(12);
        s.push_str("Extra detail on growth and guidance.");
        s
    }

    #[test]
    fn weighted_coverage_follows_section_weights() {
        let mut data = BTreeMap::new();
        data.insert("financial".to_string(), rich_section());
        let check = check_research_data(&data, false);
        // 只有 financial（权重 0.3）满分 → 30 分左右。
        assert!(check.weighted_coverage > 25.0 && check.weighted_coverage <= 30.0);
        assert!(check.missing_critical.contains(&"company_info"));
        assert_eq!(check.sufficiency, Sufficiency::Poor);
    }

    #[test]
    fn full_data_reaches_good_sufficiency() {
        let mut data = BTreeMap::new();
        for (section, _, _) in SECTION_WEIGHTS {
            data.insert(section.to_string(), rich_section());
        }
        let check = check_research_data(&data, false);
        assert!(check.missing_critical.is_empty());
        assert!(check.weighted_coverage > 90.0);
        assert_eq!(check.sufficiency, Sufficiency::Excellent);
    }

    #[test]
    fn strict_mode_downgrades_adequate() {
        let mut data = BTreeMap::new();
        for (section, _, critical) in SECTION_WEIGHTS {
            // critical section 给足内容，其余薄一些，压到 adequate 区间。
            let content = if *critical {
                rich_section()
            } else {
                "Brief note with 10% figure mentioned briefly here.".to_string()
            };
            data.insert(section.to_string(), content);
        }
        let lenient = check_research_data(&data, false);
        let strict = check_research_data(&data, true);
        if lenient.sufficiency == Sufficiency::Adequate {
            assert_eq!(strict.sufficiency, Sufficiency::Poor);
        } else {
            assert!(strict.sufficiency <= lenient.sufficiency);
        }
    }
}
