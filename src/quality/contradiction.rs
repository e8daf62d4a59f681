//! 矛盾检测：从各来源抽取数值主张，按 (指标, 财期) 分组两两比对。
//!
//! 同一财期的营收/市占率两处数字相对差超过容差即为矛盾，
//! 差距越大严重级别越高。

use serde::{Deserialize, Serialize};

use crate::quality::{IssueKind, QualityIssue, Severity};
use std::sync::LazyLock;

use regex::Regex;

/// 相对差容差：低于此视为同一数字的四舍五入差异。
pub const EPSILON: f64 = 0.05;
/// 相对差超过此直接判 Critical。
const CRITICAL_GAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMetric {
    Revenue,
    MarketShare,
    Employees,
}

impl ClaimMetric {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::MarketShare => "market share",
            Self::Employees => "employees",
        }
    }
}

/// 一条可比对的数值主张。`value` 已归一（营收 → USD，市占率 → %）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub metric: ClaimMetric,
    pub value: f64,
    pub period: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    pub metric: ClaimMetric,
    pub period: Option<String>,
    pub a: Claim,
    pub b: Claim,
    pub relative_gap: f64,
    pub severity: Severity,
}

static REVENUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)revenue[^.\n]{0,40}?\$\s?(\d[\d,]*(?:\.\d+)?)\s?(billion|million|trillion|bn|[BMT])\b(?:[^.\n]{0,30}?\(?((?:FY\s?)?20\d{2})\)?)?",
    )
    .expect("static regex")
});
static SHARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)market\s+share[^.\n]{0,40}?(\d+(?:\.\d+)?)\s?%(?:[^.\n]{0,30}?\(?((?:FY\s?)?20\d{2})\)?)?")
        .expect("static regex")
});
static EMPLOYEES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]{2,})\s+employees").expect("static regex")
});

/// 从一段文本抽取主张，`source` 标注出处（URL 或 agent 名）。
pub fn extract_claims(text: &str, source: &str) -> Vec<Claim> {
    let mut claims = Vec::new();
    for cap in REVENUE_RE.captures_iter(text) {
        let Some(value) = parse_number(&cap[1]) else {
            continue;
        };
        let scale = match cap[2].to_lowercase().as_str() {
            "trillion" | "t" => 1e12,
            "billion" | "bn" | "b" => 1e9,
            "million" | "m" => 1e6,
            _ => 1.0,
        };
        claims.push(Claim {
            metric: ClaimMetric::Revenue,
            value: value * scale,
            period: cap.get(3).map(|m| normalize_period(m.as_str())),
            source: source.to_string(),
        });
    }
    for cap in SHARE_RE.captures_iter(text) {
        let Some(value) = parse_number(&cap[1]) else {
            continue;
        };
        claims.push(Claim {
            metric: ClaimMetric::MarketShare,
            value,
            period: cap.get(2).map(|m| normalize_period(m.as_str())),
            source: source.to_string(),
        });
    }
    for cap in EMPLOYEES_RE.captures_iter(text) {
        let Some(value) = parse_number(&cap[1]) else {
            continue;
        };
        claims.push(Claim {
            metric: ClaimMetric::Employees,
            value,
            period: None,
            source: source.to_string(),
        });
    }
    claims
}

/// 分组 → 两两比对。不同来源、同指标、同财期（或都未注明财期）才可比。
pub fn detect(claims: &[Claim]) -> Vec<Contradiction> {
    let mut found = Vec::new();
    for (i, a) in claims.iter().enumerate() {
        for b in &claims[i + 1..] {
            if a.metric != b.metric || a.period != b.period || a.source == b.source {
                continue;
            }
            let base = a.value.max(b.value);
            if base <= 0.0 {
                continue;
            }
            let relative_gap = (a.value - b.value).abs() / base;
            if relative_gap <= EPSILON {
                continue;
            }
            let severity = if relative_gap > CRITICAL_GAP {
                Severity::Critical
            } else {
                Severity::Major
            };
            found.push(Contradiction {
                metric: a.metric,
                period: a.period.clone(),
                a: a.clone(),
                b: b.clone(),
                relative_gap,
                severity,
            });
        }
    }
    found
}

impl Contradiction {
    pub fn to_issue(&self) -> QualityIssue {
        QualityIssue {
            kind: IssueKind::Contradiction,
            severity: self.severity,
            section: None,
            description: format!(
                "{} for {} differs between sources: {} vs {} ({}% gap)",
                self.metric.label(),
                self.period.as_deref().unwrap_or("unspecified period"),
                format_value(self.metric, self.a.value),
                format_value(self.metric, self.b.value),
                (self.relative_gap * 100.0).round()
            ),
            suggestion: format!(
                "re-verify {} against a primary source ({} vs {})",
                self.metric.label(),
                self.a.source,
                self.b.source
            ),
        }
    }
}

fn format_value(metric: ClaimMetric, value: f64) -> String {
    match metric {
        ClaimMetric::Revenue => {
            if value >= 1e9 {
                format!("${:.1}B", value / 1e9)
            } else {
                format!("${:.1}M", value / 1e6)
            }
        }
        ClaimMetric::MarketShare => format!("{value:.1}%"),
        ClaimMetric::Employees => format!("{value:.0}"),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").parse().ok()
}

fn normalize_period(s: &str) -> String {
    s.to_uppercase().replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revenue_claims_extract_value_scale_and_period() {
        let claims = extract_claims("Annual revenue was $96.7 billion (2023).", "src-a");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metric, ClaimMetric::Revenue);
        assert!((claims[0].value - 96.7e9).abs() < 1e6);
        assert_eq!(claims[0].period.as_deref(), Some("2023"));
    }

    #[test]
    fn conflicting_revenue_same_period_is_major() {
        let mut claims = extract_claims("Revenue of $96.7B in 2023 was solid.", "src-a");
        claims.extend(extract_claims("revenue hit $110 billion (2023)", "src-b"));
        let found = detect(&claims);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Major);
        let issue = found[0].to_issue();
        assert_eq!(issue.kind, IssueKind::Contradiction);
        assert!(issue.description.contains("revenue"));
    }

    #[test]
    fn wildly_conflicting_values_are_critical() {
        let mut claims = extract_claims("Revenue of $10B in 2022.", "src-a");
        claims.extend(extract_claims("Revenue of $96 billion (2022).", "src-b"));
        let found = detect(&claims);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Critical);
    }

    #[test]
    fn different_periods_do_not_conflict() {
        let mut claims = extract_claims("Revenue of $50B in 2022.", "src-a");
        claims.extend(extract_claims("Revenue of $60B in 2023.", "src-b"));
        assert!(detect(&claims).is_empty());
    }

    #[test]
    fn same_source_never_contradicts_itself() {
        let claims = extract_claims("Revenue of $50B in 2022. Revenue of $70B in 2022.", "src-a");
        assert_eq!(claims.len(), 2);
        assert!(detect(&claims).is_empty());
    }

    #[test]
    fn rounding_differences_are_tolerated() {
        let mut claims = extract_claims("Revenue of $96.7B in 2023.", "src-a");
        claims.extend(extract_claims("Revenue of $96 billion (2023).", "src-b"));
        assert!(detect(&claims).is_empty());
    }

    #[test]
    fn market_share_claims_compare() {
        let mut claims = extract_claims("holds a market share of 12% (2024)", "src-a");
        claims.extend(extract_claims("market share near 25% in 2024", "src-b"));
        let found = detect(&claims);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, ClaimMetric::MarketShare);
        assert_eq!(found[0].severity, Severity::Critical);
    }

    #[test]
    fn employee_counts_extract() {
        let claims = extract_claims("The firm has 12,500 employees worldwide.", "src-a");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].value, 12500.0);
    }
}
