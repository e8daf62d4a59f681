//! Orchestrator：按图执行一次完整研究工作流。
//!
//! 研究段（research → analyze → extract → quality_check）串行推进，
//! 由条件边决定迭代/收束/挡下；specialist 段按图的拓扑层并行
//! fan-out，更新经 reducer 合并；synthesize fan-in 后走生成后
//! 分析，不可发布且还有迭代额度时带着策略回到研究段。
//!
//! 错误语义：节点失败写进 errors[] 继续走（partial-failure）；
//! 唯一致命条件是 LLM fallback 链整体丢失。每个节点有自己的
//! deadline，整个工作流有总 deadline，超时都折叠成空更新。

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use chrono::{Datelike, Local};
use tokio::task::JoinSet;

use crate::{
    agents::{AgentContext, AgentKind},
    cache::ResearchCache,
    config::{Depth, ResearchConfig},
    providers,
    quality::{Severity, analyzer, gate, threshold},
    state::{AgentOutput, ResearchState, StateUpdate},
    workflow::{
        extract,
        graph::{ContinueDecision, NodeId, WorkflowGraph, should_continue_research},
        output::{self, RunStatus},
    },
};

pub struct RunOutcome {
    pub company: String,
    pub status: RunStatus,
    pub state: ResearchState,
    pub quality: Option<analyzer::QualityReport>,
    pub output_dir: Option<std::path::PathBuf>,
    pub duration_secs: f64,
}

/// 跑一家公司的完整研究。致命错误（LLM 链丢失/配置错误）才返回 Err；
/// 其余情况总会落盘产物并返回 outcome。
pub async fn run_research(
    company: &str,
    depth: Depth,
    config: Arc<ResearchConfig>,
) -> Result<RunOutcome> {
    let company = company.trim();
    if company.is_empty() {
        return Err(anyhow!("company name is empty"));
    }
    let router = providers::get()?;
    let cache = Arc::new(ResearchCache::new(
        config.cache_dir.clone(),
        config.enable_cache,
    ));
    let ctx = AgentContext {
        config: config.clone(),
        router,
        cache: cache.clone(),
    };

    let started = Instant::now();
    let mut state = ResearchState::new(company, depth);

    // 缓存预检：记录已有数据与缺口，迭代轮的针对性查询直接受益。
    if cache.has_company_data(company) {
        let (needed, reason) = cache.should_research(company, None);
        tracing::info!(company, needed, reason = %reason, "cache precheck");
        state.gaps_detected = cache.identify_gaps(company);
    }
    let deadline = Duration::from_secs(config.timeout_per_company);

    let drive = tokio::time::timeout(deadline, drive_workflow(&mut state, &ctx));
    let status = match drive.await {
        Ok(Ok(status)) => status,
        Ok(Err(fatal)) => {
            // 致命：仍然把 metrics 落盘再上抛。
            let duration = started.elapsed().as_secs_f64();
            let _ = output::write_run_outputs(&config, &state, None, RunStatus::Failed, duration);
            return Err(fatal);
        }
        Err(_elapsed) => {
            tracing::warn!(company, "workflow deadline exceeded, saving partial state");
            state.errors.push(format!(
                "workflow: deadline of {}s exceeded",
                config.timeout_per_company
            ));
            RunStatus::Completed
        }
    };

    // 生成后质量报告（如果有成稿）。
    let quality = state.quality_report.clone();
    let duration_secs = started.elapsed().as_secs_f64();
    let output_dir = output::write_run_outputs(&config, &state, quality.as_ref(), status, duration_secs)?;

    // 缓存回写：研究数据按 section 覆盖，来源 URL 标记为有用。
    if status != RunStatus::Failed && !state.research_data.is_empty() {
        let sections = state
            .research_data
            .iter()
            .map(|(section, content)| {
                let sources: Vec<String> =
                    state.sources.iter().map(|s| s.url.clone()).take(5).collect();
                (section.clone(), (content.clone(), sources))
            })
            .collect();
        if let Err(err) = cache.store_full_research(company, &sections) {
            tracing::warn!(error = %err, "cache write failed");
        }
        for source in state.sources.iter().take(20) {
            let _ = cache.mark_url(company, &source.url, true);
        }
    }

    Ok(RunOutcome {
        company: company.to_string(),
        status,
        quality,
        output_dir: Some(output_dir),
        duration_secs,
        state,
    })
}

/// 主循环：研究段（含迭代） → specialist 段 → 汇总 → 生成后分析 →
/// 不可发布且有额度时重试。
async fn drive_workflow(state: &mut ResearchState, ctx: &AgentContext) -> Result<RunStatus> {
    let graph = WorkflowGraph::build(state.depth);

    loop {
        // ── 研究段（gate/阈值驱动的迭代） ──
        loop {
            run_agent_node(state, AgentKind::Researcher, ctx).await;
            run_agent_node(state, AgentKind::Analyst, ctx).await;
            if llm_chain_lost(state) {
                return Err(anyhow!(
                    "LLM provider fallback chain exhausted with no successful call"
                ));
            }
            let extracted = extract::extract_research_data(state);
            state.apply(extracted);
            quality_check(state);

            match should_continue_research(state, &ctx.config) {
                ContinueDecision::Blocked => {
                    tracing::info!(company = %state.company_name, "gate blocked the run");
                    return Ok(RunStatus::Blocked);
                }
                ContinueDecision::Finish => break,
                ContinueDecision::Iterate => {
                    let next = state.iteration_count + 1;
                    tracing::info!(iteration = next, "iterating research with follow-up queries");
                    state.apply(StateUpdate {
                        iteration_count: Some(next),
                        ..StateUpdate::default()
                    });
                }
            }
        }

        // ── specialist fan-out + synthesize fan-in（图的拓扑层） ──
        for wave in graph.execution_waves() {
            run_wave(state, &wave, ctx).await;
        }

        // ── 生成后分析 ──
        let Some(report) = state.report.clone() else {
            // synthesizer 连兜底都没产出（典型：输入全空）。
            state
                .errors
                .push("synthesize: no report produced".to_string());
            return Ok(RunStatus::Completed);
        };
        let quality = analyzer::analyze(&report, state.sources.len(), Local::now().year());
        let publishable = quality.publishable;
        let missing = quality.missing_sections();
        tracing::info!(
            score = quality.overall_score,
            sections = quality.sections_present(),
            critical = quality.issue_count(Severity::Critical),
            major = quality.issue_count(Severity::Major),
            publishable,
            "post-generation quality report"
        );
        state.apply(StateUpdate {
            quality_score: Some(quality.overall_score),
            quality_report: Some(quality),
            ..StateUpdate::default()
        });

        if publishable
            || !ctx.config.enable_quality_check
            || state.iteration_count >= ctx.config.max_iterations
        {
            return Ok(RunStatus::Completed);
        }

        // 重试接线：缺失 section + gate 改进项 → 下一轮针对性查询。
        let gaps: Vec<String> = missing
            .iter()
            .map(|section| report_section_to_bucket(section))
            .collect();
        tracing::info!(?gaps, "report not publishable, retrying research");
        state.apply(StateUpdate {
            iteration_count: Some(state.iteration_count + 1),
            gaps_detected: gaps,
            ..StateUpdate::default()
        });
    }
}

/// quality_check 控制节点：两个阈值面 + 生成前 gate。
fn quality_check(state: &mut ResearchState) {
    let raw = threshold::check_raw_results(
        &state.search_results,
        &state.company_name,
        threshold::CompanyType::Unknown,
    );
    if !raw.passes() {
        tracing::debug!(
            sources = raw.source_count,
            domains = raw.unique_domains,
            "raw results below early-stage thresholds"
        );
    }
    let data = threshold::check_research_data(&state.research_data, false);
    let gate = gate::evaluate(&state.research_data, state.sources.len());

    let mut strategies = raw.strategies.clone();
    strategies.extend(data.strategies.clone());
    let gaps: Vec<String> = data
        .section_coverages
        .iter()
        .filter(|(_, coverage)| **coverage < 40.0)
        .map(|(section, _)| section.to_string())
        .collect();

    // 不吞掉已有的更高分：gate 分数走 last-wins 是条件边语义的一部分。
    state.apply(StateUpdate {
        quality_score: Some(gate.quality_score),
        gate: Some(gate),
        gaps_detected: gaps,
        retry_strategies: strategies,
        ..StateUpdate::default()
    });
}

/// 单个 agent 节点：快照执行 + 节点 deadline + reducer 合并。
async fn run_agent_node(state: &mut ResearchState, kind: AgentKind, ctx: &AgentContext) {
    let snapshot = state.clone();
    let update = bounded_run(kind, &snapshot, ctx).await;
    state.apply(update);
}

/// 一个拓扑层内的节点并行执行；兄弟节点无顺序保证，
/// 输出必须经由可交换的 reducer 合并（state 层性质测试背书）。
async fn run_wave(state: &mut ResearchState, wave: &[NodeId], ctx: &AgentContext) {
    let kinds: Vec<AgentKind> = wave.iter().filter_map(|id| id.agent()).collect();
    if kinds.len() <= 1 {
        for kind in kinds {
            run_agent_node(state, kind, ctx).await;
        }
        return;
    }

    let snapshot = Arc::new(state.clone());
    let mut set = JoinSet::new();
    for kind in kinds {
        let snapshot = snapshot.clone();
        let ctx = ctx.clone();
        set.spawn(async move {
            let update = bounded_run(kind, &snapshot, &ctx).await;
            (kind, update)
        });
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, update)) => state.apply(update),
            Err(join_err) => state.errors.push(format!("wave task panicked: {join_err}")),
        }
    }
}

/// 节点级 deadline：超时折叠成空结果 + errors 记录，工作流继续。
async fn bounded_run(kind: AgentKind, snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let timeout = node_deadline(kind, &ctx.config);
    match tokio::time::timeout(timeout, kind.run(snapshot, ctx)).await {
        Ok(update) => update,
        Err(_) => {
            tracing::warn!(agent = kind.name(), ?timeout, "node deadline exceeded");
            StateUpdate {
                agent_outputs: vec![AgentOutput::empty(kind.name())],
                errors: vec![format!(
                    "{}: node deadline of {}s exceeded",
                    kind.name(),
                    timeout.as_secs()
                )],
                ..StateUpdate::default()
            }
        }
    }
}

/// 节点类型 → deadline。检索与汇总类节点给更多预算。
fn node_deadline(kind: AgentKind, config: &ResearchConfig) -> Duration {
    let base = config.node_timeout;
    let secs = match kind {
        AgentKind::Researcher => base + 30,
        AgentKind::Synthesizer => base + 30,
        AgentKind::Critic => base.min(60),
        _ => base,
    };
    Duration::from_secs(secs)
}

/// 致命条件检测：LLM 链整体丢失（没有任何一次成功调用，
/// 且 analyst 报告链路打穿）。
fn llm_chain_lost(state: &ResearchState) -> bool {
    let any_llm_success = state.providers_used.iter().any(|p| {
        providers::llm::LLM_PROVIDERS
            .iter()
            .any(|d| d.name == p.as_str())
    });
    !any_llm_success
        && state
            .errors
            .iter()
            .any(|e| e.contains("all llm providers exhausted"))
        && state
            .agent_outputs
            .get("analyst")
            .map(|o| o.is_empty())
            .unwrap_or(false)
}

/// 报告 section 名 → research_data 桶名（重试查询生成用）。
fn report_section_to_bucket(section: &str) -> String {
    match section {
        "financial_analysis" => "financial",
        "market_position" => "market",
        "company_overview" | "executive_summary" => "company_info",
        "competitive_landscape" => "competitive",
        "product_analysis" => "products",
        "investment_thesis" | "risk_assessment" => "strategy",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_sections_map_to_research_buckets() {
        assert_eq!(report_section_to_bucket("financial_analysis"), "financial");
        assert_eq!(report_section_to_bucket("executive_summary"), "company_info");
        assert_eq!(report_section_to_bucket("sources"), "sources");
    }

    #[test]
    fn chain_loss_requires_no_success_and_empty_analyst() {
        let mut state = ResearchState::new("Acme", Depth::Standard);
        assert!(!llm_chain_lost(&state));

        state
            .errors
            .push("analyst: all llm providers exhausted".to_string());
        state
            .agent_outputs
            .insert("analyst".to_string(), AgentOutput::empty("analyst"));
        assert!(llm_chain_lost(&state));

        // 只要有过一次成功的 LLM 调用就不算链丢失。
        state.providers_used.insert("deepseek-v3".to_string());
        assert!(!llm_chain_lost(&state));
    }

    #[test]
    fn node_deadlines_scale_by_kind() {
        let config = ResearchConfig::resolve().unwrap();
        assert!(
            node_deadline(AgentKind::Researcher, &config)
                > node_deadline(AgentKind::Brand, &config)
        );
        assert!(
            node_deadline(AgentKind::Critic, &config) <= node_deadline(AgentKind::Brand, &config)
        );
    }

    #[test]
    fn quality_check_blocks_empty_run_with_strategies() {
        let config = ResearchConfig::resolve().unwrap();
        let mut state = ResearchState::new("ZZZNonexistentCo", Depth::Standard);
        quality_check(&mut state);
        assert!(state.gate.as_ref().map(|g| !g.can_generate).unwrap_or(false));
        assert!(!state.retry_strategies.is_empty());
        assert_eq!(
            should_continue_research(&state, &config),
            ContinueDecision::Blocked
        );
    }
}
