//! 生成后质量分析。
//!
//! 对成稿报告做逐 section 体检（9 个规范 section），合成加权总分：
//! `0.6·section + 0.2·metrics_coverage + 0.1·source_coverage − 0.1·penalty`，
//! 再按硬性门槛裁决是否可发布。同输入必得同分。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::quality::{
    IssueKind, QualityIssue, Severity, contradiction, count_data_points, count_vague,
    latest_year_mentioned,
};

// ── Canonical sections ────────────────────────────────────────────────────────

pub struct SectionSpec {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub min_words: usize,
    pub required_points: usize,
}

pub const CANONICAL_SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        name: "executive_summary",
        keywords: &["executive summary", "summary"],
        min_words: 60,
        required_points: 2,
    },
    SectionSpec {
        name: "company_overview",
        keywords: &["company overview", "overview", "about"],
        min_words: 80,
        required_points: 2,
    },
    SectionSpec {
        name: "financial_analysis",
        keywords: &["financial"],
        min_words: 100,
        required_points: 4,
    },
    SectionSpec {
        name: "market_position",
        keywords: &["market position", "market analysis", "market"],
        min_words: 80,
        required_points: 2,
    },
    SectionSpec {
        name: "competitive_landscape",
        keywords: &["competitive", "competitors", "competition"],
        min_words: 80,
        required_points: 1,
    },
    SectionSpec {
        name: "product_analysis",
        keywords: &["product", "offerings", "services"],
        min_words: 60,
        required_points: 1,
    },
    SectionSpec {
        name: "risk_assessment",
        keywords: &["risk"],
        min_words: 60,
        required_points: 1,
    },
    SectionSpec {
        name: "investment_thesis",
        keywords: &["investment", "thesis", "outlook"],
        min_words: 60,
        required_points: 2,
    },
    SectionSpec {
        name: "sources",
        keywords: &["sources", "references", "citations"],
        min_words: 10,
        required_points: 0,
    },
];

/// 指标覆盖检查的关键指标类别。
const METRIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("revenue", &["revenue", "sales"]),
    ("profitability", &["margin", "profit", "ebitda", "net income"]),
    ("growth", &["growth", "yoy", "year-over-year", "cagr"]),
    ("market_share", &["market share"]),
    ("valuation", &["market cap", "valuation", "p/e"]),
    ("headcount", &["employees", "headcount"]),
];

// ── Publishability gate constants ─────────────────────────────────────────────

const PUBLISH_MIN_SCORE: f64 = 55.0;
const PUBLISH_MAX_MAJOR: usize = 3;
const PUBLISH_MIN_SECTIONS: usize = 6;
const PUBLISH_MIN_METRICS: f64 = 40.0;
const PUBLISH_MIN_SOURCES: usize = 3;

// ── Result types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unacceptable,
}

impl QualityLevel {
    fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 55.0 {
            Self::Acceptable
        } else if score >= 40.0 {
            Self::Poor
        } else {
            Self::Unacceptable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionAnalysis {
    pub present: bool,
    pub word_count: usize,
    pub data_points: usize,
    pub vague_count: usize,
    /// 0..=100：对照该 section 的词数/数据点要求。
    pub completeness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall_score: f64,
    pub level: QualityLevel,
    pub sections: BTreeMap<String, SectionAnalysis>,
    pub issues: Vec<QualityIssue>,
    pub metrics_coverage: f64,
    pub source_coverage: f64,
    pub publishable: bool,
}

impl QualityReport {
    pub fn sections_present(&self) -> usize {
        self.sections.values().filter(|s| s.present).count()
    }

    pub fn issue_count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn missing_sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|(_, s)| !s.present)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ── Analysis ──────────────────────────────────────────────────────────────────

/// 分析成稿报告。`as_of_year` 由调用方传入保证确定性。
pub fn analyze(report: &str, source_count: usize, as_of_year: i32) -> QualityReport {
    let chunks = split_sections(report);
    let mut sections = BTreeMap::new();
    let mut issues = Vec::new();
    let mut completeness_sum = 0.0;

    for spec in CANONICAL_SECTIONS {
        let content = chunks
            .iter()
            .find(|(heading, _)| {
                spec.keywords
                    .iter()
                    .any(|k| heading.to_lowercase().contains(k))
            })
            .map(|(_, body)| body.as_str());

        let analysis = match content {
            None => {
                issues.push(QualityIssue {
                    kind: IssueKind::MissingSection,
                    severity: Severity::Major,
                    section: Some(spec.name.to_string()),
                    description: format!("section `{}` is missing", spec.name),
                    suggestion: format!("add a `{}` section", spec.name),
                });
                SectionAnalysis {
                    present: false,
                    word_count: 0,
                    data_points: 0,
                    vague_count: 0,
                    completeness: 0.0,
                }
            }
            Some(body) => {
                let word_count = body.split_whitespace().count();
                let data_points = count_data_points(body);
                let vague_count = count_vague(body);
                let word_part = (word_count as f64 / spec.min_words as f64).min(1.0) * 60.0;
                let point_part = if spec.required_points == 0 {
                    40.0
                } else {
                    (data_points as f64 / spec.required_points as f64).min(1.0) * 40.0
                };
                let completeness = word_part + point_part;

                if word_count < spec.min_words {
                    issues.push(QualityIssue {
                        kind: IssueKind::ThinSection,
                        severity: Severity::Minor,
                        section: Some(spec.name.to_string()),
                        description: format!(
                            "section `{}` has {word_count} words, below {}",
                            spec.name, spec.min_words
                        ),
                        suggestion: "expand with specific figures".to_string(),
                    });
                }
                if word_count > 0 && vague_count * 10 > word_count {
                    issues.push(QualityIssue {
                        kind: IssueKind::VagueContent,
                        severity: Severity::Minor,
                        section: Some(spec.name.to_string()),
                        description: format!(
                            "section `{}` is dominated by placeholder phrasing",
                            spec.name
                        ),
                        suggestion: "replace placeholders with sourced data".to_string(),
                    });
                }
                SectionAnalysis {
                    present: true,
                    word_count,
                    data_points,
                    vague_count,
                    completeness,
                }
            }
        };
        completeness_sum += analysis.completeness;
        sections.insert(spec.name.to_string(), analysis);
    }
    let section_score = completeness_sum / CANONICAL_SECTIONS.len() as f64;

    // 指标覆盖：六类关键指标出现比例。
    let lower = report.to_lowercase();
    let metrics_hit = METRIC_KEYWORDS
        .iter()
        .filter(|(_, kws)| kws.iter().any(|k| lower.contains(k)))
        .count();
    let metrics_coverage = metrics_hit as f64 / METRIC_KEYWORDS.len() as f64 * 100.0;

    // 来源覆盖：引用数对照基准（10 条引用拿满）。
    let source_coverage = (source_count as f64 / 10.0).min(1.0) * 100.0;
    if source_count < PUBLISH_MIN_SOURCES {
        issues.push(QualityIssue {
            kind: IssueKind::LowSourceCount,
            severity: Severity::Major,
            section: None,
            description: format!("only {source_count} sources cited"),
            suggestion: "cite at least three independent sources".to_string(),
        });
    }

    // 跨报告一致性：同财期数字互相打架。
    let cross_claims = cross_section_claims(&chunks);
    issues.extend(contradiction::detect(&cross_claims).iter().map(|c| c.to_issue()));

    // 新鲜度：财务 section 引用的最近年份太旧。
    if let Some((_, financial_body)) = chunks
        .iter()
        .find(|(h, _)| h.to_lowercase().contains("financial"))
        && let Some(latest) = latest_year_mentioned(financial_body)
        && latest < as_of_year - 2
    {
        issues.push(QualityIssue {
            kind: IssueKind::StaleData,
            severity: Severity::Minor,
            section: Some("financial_analysis".to_string()),
            description: format!("latest financial figure dates from {latest}"),
            suggestion: "refresh with the most recent fiscal period".to_string(),
        });
    }

    let critical = issues.iter().filter(|i| i.severity == Severity::Critical).count();
    let major = issues.iter().filter(|i| i.severity == Severity::Major).count();
    let minor = issues.iter().filter(|i| i.severity == Severity::Minor).count();
    let issue_penalty = (critical as f64 * 15.0 + major as f64 * 5.0 + minor as f64 * 1.0).min(100.0);

    let overall_score = (0.6 * section_score + 0.2 * metrics_coverage + 0.1 * source_coverage
        - 0.1 * issue_penalty)
        .clamp(0.0, 100.0);
    let sections_present = sections.values().filter(|s| s.present).count();
    let publishable = overall_score >= PUBLISH_MIN_SCORE
        && critical == 0
        && major <= PUBLISH_MAX_MAJOR
        && sections_present >= PUBLISH_MIN_SECTIONS
        && metrics_coverage >= PUBLISH_MIN_METRICS
        && source_count >= PUBLISH_MIN_SOURCES;

    // 最严重的问题排前面。
    issues.sort_by(|a, b| b.severity.cmp(&a.severity));

    tracing::info!(
        overall_score,
        sections_present,
        critical,
        major,
        publishable,
        "post-generation analysis"
    );

    QualityReport {
        overall_score,
        level: QualityLevel::from_score(overall_score),
        sections,
        issues,
        metrics_coverage,
        source_coverage,
        publishable,
    }
}

/// 按 markdown 标题切分报告，返回 (heading, body) 序列。
fn split_sections(report: &str) -> Vec<(String, String)> {
    let mut chunks = Vec::new();
    let mut heading = String::from("preamble");
    let mut body = String::new();
    for line in report.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if !body.trim().is_empty() {
                chunks.push((heading.clone(), body.trim().to_string()));
            }
            heading = trimmed.trim_start_matches('#').trim().to_string();
            body = String::new();
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !body.trim().is_empty() {
        chunks.push((heading, body.trim().to_string()));
    }
    chunks
}

/// 每个 section 作为独立"来源"抽主张，检出报告内部自相矛盾。
fn cross_section_claims(chunks: &[(String, String)]) -> Vec<contradiction::Claim> {
    let mut claims = Vec::new();
    for (heading, body) in chunks {
        claims.extend(contradiction::extract_claims(body, heading));
    }
    claims
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_report(financial_revenue: &str) -> String {
        let filler = "The company maintains a strong position with documented performance. "
            .repeat(12);
        format!(
            "# Acme Research Report\n\n\
             ## Executive Summary\n{filler}Revenue grew 12% with margin expansion in FY2024.\n\n\
             ## Company Overview\n{filler}Founded in 1998, CEO Maria Ortiz leads 12,000 employees.\n\n\
             ## Financial Analysis\n{filler}{financial_revenue} Operating margin 18%, net income $1.2B in FY2024. Growth of 9% YoY.\n\n\
             ## Market Position\n{filler}Market share of 12% (2024) across LATAM with growth momentum.\n\n\
             ## Competitive Landscape\n{filler}Main competitor BetaCorp holds 20% share.\n\n\
             ## Product Analysis\n{filler}Flagship platform launched in 2023.\n\n\
             ## Risk Assessment\n{filler}Currency exposure and regulation remain risks.\n\n\
             ## Investment Thesis\n{filler}Rating: Buy with price target $45, valuation at 14x P/E.\n\n\
             ## Sources\n- https://example.com/a\n- https://example.com/b\n- https://example.com/c\n"
        )
    }

    #[test]
    fn complete_report_is_publishable() {
        let report = full_report("Revenue of $4.2B in FY2024.");
        let analysis = analyze(&report, 10, 2025);
        assert!(analysis.publishable, "issues: {:?}", analysis.issues);
        assert!(analysis.overall_score >= 55.0);
        assert!(analysis.sections_present() >= 6);
        assert!(analysis.metrics_coverage >= 40.0);
    }

    #[test]
    fn missing_sections_emit_major_issues() {
        let report = "# Report\n\n## Executive Summary\nshort text here\n";
        let analysis = analyze(report, 5, 2025);
        assert!(!analysis.publishable);
        assert!(analysis.issue_count(Severity::Major) > PUBLISH_MAX_MAJOR);
        assert!(analysis.missing_sections().contains(&"financial_analysis".to_string()));
    }

    #[test]
    fn contradictory_revenue_across_sections_is_flagged() {
        // 摘要与财务 section 给出同财期差异悬殊的营收。
        let report = full_report("Revenue of $96.7B in 2023.")
            .replace(
                "Revenue grew 12% with margin expansion in FY2024.",
                "Revenue reached $110 billion (2023).",
            );
        let analysis = analyze(&report, 10, 2025);
        assert!(
            analysis
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::Contradiction && i.severity == Severity::Major),
            "issues: {:?}",
            analysis.issues
        );
    }

    #[test]
    fn low_source_count_blocks_publishability() {
        let report = full_report("Revenue of $4.2B in FY2024.");
        let analysis = analyze(&report, 2, 2025);
        assert!(!analysis.publishable);
        assert!(analysis.issues.iter().any(|i| i.kind == IssueKind::LowSourceCount));
    }

    #[test]
    fn stale_financials_add_minor_issue() {
        let report = full_report("Revenue of $2.0B in 2019.")
            .replace("net income $1.2B in FY2024", "net income $0.4B in 2019")
            .replace("Growth of 9% YoY", "growth of 4% that year");
        let analysis = analyze(&report, 8, 2025);
        assert!(
            analysis.issues.iter().any(|i| i.kind == IssueKind::StaleData),
            "issues: {:?}",
            analysis.issues
        );
    }

    #[test]
    fn analysis_is_deterministic() {
        let report = full_report("Revenue of $4.2B in FY2024.");
        let a = analyze(&report, 7, 2025);
        let b = analyze(&report, 7, 2025);
        assert_eq!(a.overall_score, b.overall_score);
        assert_eq!(a.issues, b.issues);
    }
}
