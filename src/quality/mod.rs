//! 质量管线：生成前 gate、生成后 analyzer、阈值检查、矛盾检测。
//!
//! 打分逻辑只存在这一处；gate 与 analyzer 是同一套底层计数
//! （数据点、含糊表述、词数）的两个阶段。

pub mod analyzer;
pub mod contradiction;
pub mod gate;
pub mod threshold;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ── Issue model ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingSection,
    ThinSection,
    VagueContent,
    Contradiction,
    StaleData,
    LowSourceCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub section: Option<String>,
    pub description: String,
    pub suggestion: String,
}

// ── Shared counters ───────────────────────────────────────────────────────────

static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\$|€|¥|USD\s?|EUR\s?)\s?\d[\d,]*(\.\d+)?\s?(billion|million|trillion|bn|[BMKT]\b)?")
        .expect("static regex")
});
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(\.\d+)?\s?%").expect("static regex"));
static FISCAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(FY\s?20\d{2}|fiscal\s+(year\s+)?20\d{2}|Q[1-4]\s?(of\s+)?20\d{2}|H[12]\s?20\d{2})")
        .expect("static regex")
});
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static regex"));
static EXEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(CEO|CFO|CTO|COO|CMO|chairman|chairwoman|founder|co-founder|president|chief\s+\w+\s+officer)\b")
        .expect("static regex")
});

/// 报告里的"没有数据"措辞；密度过高说明内容是空话。
pub const VAGUE_PATTERNS: &[&str] = &[
    "n/a",
    "not available",
    "not publicly available",
    "unknown",
    "to be determined",
    "tbd",
    "no data",
    "not disclosed",
    "unclear",
    "no information",
    "insufficient data",
];

/// 统计一段文本里的"具体数据点"：货币值、百分比、财期、年份、高管提及。
pub fn count_data_points(text: &str) -> usize {
    CURRENCY_RE.find_iter(text).count()
        + PERCENT_RE.find_iter(text).count()
        + FISCAL_RE.find_iter(text).count()
        + EXEC_RE.find_iter(text).count()
}

pub fn count_vague(text: &str) -> usize {
    let lower = text.to_lowercase();
    VAGUE_PATTERNS
        .iter()
        .map(|p| lower.matches(p).count())
        .sum()
}

pub fn has_specific_values(text: &str) -> bool {
    CURRENCY_RE.is_match(text) || PERCENT_RE.is_match(text)
}

/// 文本中出现的最大年份（新鲜度检查用）。
pub fn latest_year_mentioned(text: &str) -> Option<i32> {
    YEAR_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_points_count_currency_percent_fiscal_and_execs() {
        let text = "Revenue reached $96.7B in FY2023, up 12.5%. CEO Jane Doe said Q4 2023 was strong.";
        // $96.7B, 12.5%, FY2023, Q4 2023, CEO
        assert_eq!(count_data_points(text), 5);
    }

    #[test]
    fn vague_patterns_are_case_insensitive() {
        let text = "Revenue: N/A. Margin data not disclosed. Growth unknown.";
        assert_eq!(count_vague(text), 3);
    }

    #[test]
    fn specific_values_detection() {
        assert!(has_specific_values("margin of 23%"));
        assert!(has_specific_values("raised €50 million"));
        assert!(!has_specific_values("the company performed well"));
    }

    #[test]
    fn latest_year_picks_max() {
        assert_eq!(
            latest_year_mentioned("founded 1998, revenue grew through 2024"),
            Some(2024)
        );
        assert_eq!(latest_year_mentioned("no years here"), None);
    }
}
