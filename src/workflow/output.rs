//! 运行产物落盘。
//!
//! 每次运行固定写出 `outputs/research/<slug>/`：完整报告、分节
//! markdown、metrics.json（永远写，含错误清单）、extracted_data.json。
//! 被 gate 挡下的运行写占位报告，列出 block_reasons 与改进项。

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;

use crate::{
    cache::store::normalize_company_name,
    config::ResearchConfig,
    quality::analyzer::QualityReport,
    state::ResearchState,
};

/// 分节文件：(文件名, 报告标题关键词)。
const SECTION_FILES: &[(&str, &str)] = &[
    ("01_executive_summary.md", "executive summary"),
    ("02_company_overview.md", "company overview"),
    ("03_financial_analysis.md", "financial"),
    ("04_market_position.md", "market"),
    ("05_competitive_landscape.md", "competitive"),
    ("06_investment_thesis.md", "investment"),
    ("07_sources.md", "sources"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Blocked,
    Failed,
}

impl RunStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

pub fn run_output_dir(config: &ResearchConfig, company: &str) -> PathBuf {
    config
        .output_dir
        .join("research")
        .join(normalize_company_name(company))
}

/// 写出一次运行的全部产物，返回输出目录。
pub fn write_run_outputs(
    config: &ResearchConfig,
    state: &ResearchState,
    quality: Option<&QualityReport>,
    status: RunStatus,
    duration_secs: f64,
) -> Result<PathBuf> {
    let dir = run_output_dir(config, &state.company_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create output dir {}", dir.display()))?;

    // 核心只产 markdown + JSON；其它格式属于外部渲染层。
    for format in &config.report_formats {
        if format != "markdown" && format != "md" {
            tracing::debug!(format = %format, "non-markdown format left to the rendering layer");
        }
    }

    let report = match (&state.report, status) {
        (Some(report), _) => report.clone(),
        (None, RunStatus::Blocked) => render_blocked_placeholder(state),
        (None, _) => render_partial_placeholder(state),
    };
    std::fs::write(dir.join("00_full_report.md"), &report)?;

    for (filename, keyword) in SECTION_FILES {
        let content = section_body(&report, keyword)
            .unwrap_or_else(|| "*Section not produced in this run.*\n".to_string());
        std::fs::write(dir.join(filename), content)?;
    }

    let metrics = json!({
        "company": state.company_name,
        "status": status.name(),
        "quality_score": state.quality_score,
        "publishable": quality.map(|q| q.publishable),
        "total_cost": state.total_cost,
        "tokens": { "input": state.total_tokens.input, "output": state.total_tokens.output },
        "duration_secs": duration_secs,
        "iteration_count": state.iteration_count,
        "agents_executed": state.agent_outputs.keys().collect::<Vec<_>>(),
        "sources_count": state.sources.len(),
        "providers_used": state.providers_used,
        "errors": state.errors,
    });
    std::fs::write(
        dir.join("metrics.json"),
        serde_json::to_string_pretty(&metrics)?,
    )?;

    let extracted = json!({
        "research_data": state.research_data,
        "agent_outputs": state
            .agent_outputs
            .values()
            .map(|o| json!({
                "agent": o.agent,
                "structured": o.structured,
                "confidence": o.confidence,
                "sources": o.sources,
            }))
            .collect::<Vec<_>>(),
        "quality": quality,
    });
    std::fs::write(
        dir.join("extracted_data.json"),
        serde_json::to_string_pretty(&extracted)?,
    )?;

    tracing::info!(dir = %dir.display(), status = status.name(), "run outputs written");
    Ok(dir)
}

/// gate 挡下时的占位报告。
pub fn render_blocked_placeholder(state: &ResearchState) -> String {
    let mut report = format!(
        "# {} Research Report (blocked)\n\n\
         Report generation was blocked by the pre-generation quality gate.\n\n\
         ## Block Reasons\n",
        state.company_name
    );
    match &state.gate {
        Some(gate) if !gate.block_reasons.is_empty() => {
            for reason in &gate.block_reasons {
                report.push_str(&format!("- {reason}\n"));
            }
        }
        _ => report.push_str("- INSUFFICIENT_DATA\n"),
    }
    if let Some(gate) = &state.gate
        && !gate.improvements.is_empty()
    {
        report.push_str("\n## Required Improvements\n");
        for improvement in &gate.improvements {
            report.push_str(&format!("- {improvement}\n"));
        }
    }
    if !state.retry_strategies.is_empty() {
        report.push_str("\n## Suggested Retry Strategies\n");
        for strategy in &state.retry_strategies {
            report.push_str(&format!("- {}\n", strategy.as_str()));
        }
    }
    report
}

/// 既没有成稿也没被 gate 挡下（超时/致命中断）的兜底产物。
fn render_partial_placeholder(state: &ResearchState) -> String {
    let mut report = format!(
        "# {} Research Report (partial)\n\n\
         The workflow terminated before a report could be generated.\n\n## Errors\n",
        state.company_name
    );
    if state.errors.is_empty() {
        report.push_str("- none recorded\n");
    }
    for error in &state.errors {
        report.push_str(&format!("- {error}\n"));
    }
    report
}

/// 从报告里取某个标题下的内容（含标题行）。
fn section_body(report: &str, keyword: &str) -> Option<String> {
    let mut body = String::new();
    let mut in_section = false;
    for line in report.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("##") && !trimmed.starts_with("###") {
            if in_section {
                break;
            }
            let heading = trimmed.trim_start_matches('#').trim().to_lowercase();
            in_section = heading.contains(keyword);
        }
        if in_section {
            body.push_str(line);
            body.push('\n');
        }
    }
    (!body.is_empty()).then_some(body)
}

// ── Batch outputs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub company: String,
    pub status: RunStatus,
    pub quality_score: f64,
    pub publishable: Option<bool>,
    pub total_cost: f64,
    pub output_dir: Option<PathBuf>,
    pub issues: Vec<String>,
}

/// 批量运行的汇总产物：对比表、summary.json、问题清单（如有）。
pub fn write_batch_outputs(
    config: &ResearchConfig,
    entries: &[BatchEntry],
    timestamp: &str,
) -> Result<PathBuf> {
    let dir = config.output_dir.join("batch").join(timestamp);
    std::fs::create_dir_all(&dir)?;

    let mut comparison = String::from(
        "# Batch Comparison\n\n\
         | Company | Status | Quality | Cost (USD) |\n|---|---|---:|---:|\n",
    );
    let mut ranked: Vec<&BatchEntry> = entries.iter().collect();
    ranked.sort_by(|a, b| {
        b.quality_score
            .partial_cmp(&a.quality_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for entry in &ranked {
        comparison.push_str(&format!(
            "| {} | {} | {:.1} | {:.4} |\n",
            entry.company,
            entry.status.name(),
            entry.quality_score,
            entry.total_cost
        ));
    }
    std::fs::write(dir.join("00_comparison.md"), comparison)?;

    let summary = json!({
        "total": entries.len(),
        "completed": entries.iter().filter(|e| e.status == RunStatus::Completed).count(),
        "blocked": entries.iter().filter(|e| e.status == RunStatus::Blocked).count(),
        "failed": entries.iter().filter(|e| e.status == RunStatus::Failed).count(),
        "total_cost": entries.iter().map(|e| e.total_cost).sum::<f64>(),
        "companies": entries.iter().map(|e| json!({
            "company": e.company,
            "status": e.status.name(),
            "quality_score": e.quality_score,
            "publishable": e.publishable,
            "output_dir": e.output_dir.as_ref().map(|d| d.display().to_string()),
        })).collect::<Vec<_>>(),
    });
    std::fs::write(dir.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;

    let with_issues: Vec<&BatchEntry> = entries.iter().filter(|e| !e.issues.is_empty()).collect();
    if !with_issues.is_empty() {
        let mut issues_md = String::from("# Quality Issues\n\n");
        for entry in with_issues {
            issues_md.push_str(&format!("## {}\n", entry.company));
            for issue in &entry.issues {
                issues_md.push_str(&format!("- {issue}\n"));
            }
            issues_md.push('\n');
        }
        std::fs::write(dir.join("quality_issues.md"), issues_md)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Depth, quality::threshold::RetryStrategy};
    use std::{collections::BTreeMap, path::Path};

    fn config_with_output(dir: &Path) -> ResearchConfig {
        let mut config = ResearchConfig::resolve().unwrap();
        config.output_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn blocked_run_writes_placeholder_listing_reasons() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_output(tmp.path());
        let mut state = ResearchState::new("ZZZNonexistentCo", Depth::Standard);
        state.gate = Some(crate::quality::gate::evaluate(&BTreeMap::new(), 0));
        state.retry_strategies = vec![RetryStrategy::Multilingual];
        let dir =
            write_run_outputs(&config, &state, None, RunStatus::Blocked, 1.5).unwrap();

        let report = std::fs::read_to_string(dir.join("00_full_report.md")).unwrap();
        assert!(report.contains("blocked"));
        assert!(report.contains("INSUFFICIENT_DATA"));
        assert!(report.contains("MULTILINGUAL"));

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("metrics.json")).unwrap())
                .unwrap();
        assert_eq!(metrics["status"], "blocked");
        // blocked 运行里绝不能有 synthesizer 输出。
        assert!(
            !metrics["agents_executed"]
                .as_array()
                .unwrap()
                .iter()
                .any(|a| a == "synthesizer")
        );
    }

    #[test]
    fn completed_run_writes_sections_and_metrics() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_output(tmp.path());
        let mut state = ResearchState::new("Acme", Depth::Standard);
        state.report = Some(
            "# Acme Research Report\n\n## Executive Summary\nSolid.\n\n\
             ## Financial Analysis\nRevenue $1B.\n\n## Sources\n- https://a.example\n"
                .to_string(),
        );
        state.total_cost = 0.042;
        state.errors.push("market: search failed".to_string());
        let dir = write_run_outputs(&config, &state, None, RunStatus::Completed, 12.0).unwrap();

        assert!(dir.join("00_full_report.md").exists());
        let fin = std::fs::read_to_string(dir.join("03_financial_analysis.md")).unwrap();
        assert!(fin.contains("Revenue $1B"));
        let missing = std::fs::read_to_string(dir.join("04_market_position.md")).unwrap();
        assert!(missing.contains("not produced"));

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("metrics.json")).unwrap())
                .unwrap();
        assert_eq!(metrics["total_cost"], 0.042);
        assert_eq!(metrics["errors"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn batch_outputs_rank_by_quality() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_output(tmp.path());
        let entries = vec![
            BatchEntry {
                company: "Low".to_string(),
                status: RunStatus::Completed,
                quality_score: 40.0,
                publishable: Some(false),
                total_cost: 0.01,
                output_dir: None,
                issues: vec!["thin financials".to_string()],
            },
            BatchEntry {
                company: "High".to_string(),
                status: RunStatus::Completed,
                quality_score: 90.0,
                publishable: Some(true),
                total_cost: 0.02,
                output_dir: None,
                issues: vec![],
            },
        ];
        let dir = write_batch_outputs(&config, &entries, "20250801_120000").unwrap();
        let comparison = std::fs::read_to_string(dir.join("00_comparison.md")).unwrap();
        let high = comparison.find("High").unwrap();
        let low = comparison.find("Low").unwrap();
        assert!(high < low);
        assert!(dir.join("summary.json").exists());
        assert!(dir.join("quality_issues.md").exists());
    }
}
