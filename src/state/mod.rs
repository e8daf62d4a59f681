pub mod reducer;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::{
    config::Depth,
    quality::{
        analyzer::QualityReport,
        gate::GateResult,
        threshold::RetryStrategy,
    },
};

// ── Search results & sources ──────────────────────────────────────────────────

/// 单条搜索结果。身份 = 规范化后的 URL，去重以此为准。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<String>,
    pub domain: String,
    pub provider: String,
}

impl SearchHit {
    pub fn new(url: &str, title: &str, content: &str, provider: &str) -> Self {
        let url = normalize_url(url);
        let domain = domain_of(&url);
        Self {
            url,
            title: title.trim().to_string(),
            content: content.trim().to_string(),
            published_at: None,
            domain,
            provider: provider.to_string(),
        }
    }
}

/// URL 规范化：去 fragment、去跟踪参数、去末尾斜杠、host 小写。
pub fn normalize_url(raw: &str) -> String {
    let mut url = raw.trim().to_string();
    if let Some(pos) = url.find('#') {
        url.truncate(pos);
    }
    // Strip common tracking params wholesale when present.
    if let Some(qpos) = url.find('?') {
        let (base, query) = url.split_at(qpos);
        let kept: Vec<&str> = query[1..]
            .split('&')
            .filter(|kv| {
                let key = kv.split('=').next().unwrap_or("");
                !key.starts_with("utm_") && key != "ref" && key != "fbclid" && key != "gclid"
            })
            .collect();
        url = if kept.is_empty() {
            base.to_string()
        } else {
            format!("{base}?{}", kept.join("&"))
        };
    }
    while url.ends_with('/') && url.matches('/').count() > 3 {
        url.pop();
    }
    // Lowercase scheme + host only; path stays case-sensitive.
    if let Some(scheme_end) = url.find("://") {
        let host_end = url[scheme_end + 3..]
            .find('/')
            .map(|p| scheme_end + 3 + p)
            .unwrap_or(url.len());
        let lowered = url[..host_end].to_ascii_lowercase();
        url = format!("{lowered}{}", &url[host_end..]);
    }
    url
}

pub fn domain_of(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let host = rest.split('/').next().unwrap_or(rest);
    let host = host.split('@').next_back().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    host.trim_start_matches("www.").to_ascii_lowercase()
}

/// 来源质量分层，按域名归类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Primary,
    High,
    Medium,
    Low,
    Unknown,
}

const PRIMARY_DOMAINS: &[&str] = &["sec.gov", "annualreports.com", "investor."];
const HIGH_DOMAINS: &[&str] = &[
    "reuters.com",
    "bloomberg.com",
    "ft.com",
    "wsj.com",
    "forbes.com",
    "economist.com",
    "nasdaq.com",
    "finance.yahoo.com",
];
const MEDIUM_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "crunchbase.com",
    "linkedin.com",
    "techcrunch.com",
    "cnbc.com",
    "businessinsider.com",
];
const LOW_DOMAINS: &[&str] = &["reddit.com", "medium.com", "quora.com", "blogspot."];

impl SourceTier {
    pub fn classify(domain: &str) -> Self {
        let has = |list: &[&str]| list.iter().any(|d| domain.contains(d));
        if has(PRIMARY_DOMAINS) {
            Self::Primary
        } else if has(HIGH_DOMAINS) {
            Self::High
        } else if has(MEDIUM_DOMAINS) {
            Self::Medium
        } else if has(LOW_DOMAINS) {
            Self::Low
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub domain: String,
    pub tier: SourceTier,
    pub retrieved_at: String,
}

impl SourceRecord {
    pub fn from_hit(hit: &SearchHit) -> Self {
        Self {
            url: hit.url.clone(),
            title: hit.title.clone(),
            domain: hit.domain.clone(),
            tier: SourceTier::classify(&hit.domain),
            retrieved_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

// ── Token & cost accounting ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

// ── Agent output ──────────────────────────────────────────────────────────────

/// 每个 agent 写入 `agent_outputs[name]` 的统一输出结构。
/// 领域特有字段放在 `structured` 里，保持外层 schema 一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent: String,
    pub analysis: String,
    pub structured: serde_json::Value,
    pub cost: f64,
    pub tokens: TokenUsage,
    pub confidence: f64,
    pub sources: Vec<String>,
}

impl AgentOutput {
    /// 空结果：输入不足或调用失败时的占位，不算错误。
    pub fn empty(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            analysis: String::new(),
            structured: serde_json::Value::Null,
            cost: 0.0,
            tokens: TokenUsage::default(),
            confidence: 0.0,
            sources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.analysis.is_empty() && self.structured.is_null()
    }
}

// ── Workflow state ────────────────────────────────────────────────────────────

/// 一次研究运行的完整状态。orchestrator 独占所有权；
/// agent 只拿到 `&ResearchState` 快照，返回 `StateUpdate` 部分更新。
#[derive(Debug, Clone, Serialize)]
pub struct ResearchState {
    pub company_name: String,
    pub depth: Depth,
    pub queries: Vec<String>,
    pub search_results: Vec<SearchHit>,
    pub sources: Vec<SourceRecord>,
    /// 抽取出的结构化研究数据，按 section 分桶（threshold checker 的输入）。
    pub research_data: BTreeMap<String, String>,
    pub agent_outputs: BTreeMap<String, AgentOutput>,
    pub quality_score: f64,
    pub gate: Option<GateResult>,
    pub quality_report: Option<QualityReport>,
    pub iteration_count: u32,
    pub total_cost: f64,
    pub total_tokens: TokenUsage,
    pub errors: Vec<String>,
    pub gaps_detected: Vec<String>,
    pub retry_strategies: Vec<RetryStrategy>,
    pub providers_used: BTreeSet<String>,
    pub report: Option<String>,
}

impl ResearchState {
    pub fn new(company_name: &str, depth: Depth) -> Self {
        Self {
            company_name: company_name.trim().to_string(),
            depth,
            queries: Vec::new(),
            search_results: Vec::new(),
            sources: Vec::new(),
            research_data: BTreeMap::new(),
            agent_outputs: BTreeMap::new(),
            quality_score: 0.0,
            gate: None,
            quality_report: None,
            iteration_count: 1,
            total_cost: 0.0,
            total_tokens: TokenUsage::default(),
            errors: Vec::new(),
            gaps_detected: Vec::new(),
            retry_strategies: Vec::new(),
            providers_used: BTreeSet::new(),
            report: None,
        }
    }

    /// 应用一次部分更新。每个槽位的合并语义见 `reducer::STATE_REDUCERS`。
    pub fn apply(&mut self, update: StateUpdate) {
        reducer::union_dedupe(&mut self.queries, update.queries);
        reducer::append_dedupe_hits(&mut self.search_results, update.search_results);
        reducer::append_dedupe_sources(&mut self.sources, update.sources);
        reducer::key_merge(&mut self.research_data, update.research_data);
        reducer::merge_agent_outputs(&mut self.agent_outputs, update.agent_outputs);
        reducer::last_wins(&mut self.quality_score, update.quality_score);
        reducer::last_wins_opt(&mut self.gate, update.gate);
        reducer::last_wins_opt(&mut self.quality_report, update.quality_report);
        reducer::max_assign(&mut self.iteration_count, update.iteration_count);
        reducer::sum_assign(&mut self.total_cost, update.cost);
        self.total_tokens.add(update.tokens);
        self.errors.extend(update.errors);
        reducer::union_dedupe(&mut self.gaps_detected, update.gaps_detected);
        reducer::union_dedupe(&mut self.retry_strategies, update.retry_strategies);
        self.providers_used.extend(update.providers_used);
        reducer::last_wins_opt(&mut self.report, update.report);
    }
}

/// agent / 控制节点返回的部分更新。`Default` 即"无变化"。
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub queries: Vec<String>,
    pub search_results: Vec<SearchHit>,
    pub sources: Vec<SourceRecord>,
    pub research_data: BTreeMap<String, String>,
    pub agent_outputs: Vec<AgentOutput>,
    pub quality_score: Option<f64>,
    pub gate: Option<GateResult>,
    pub quality_report: Option<QualityReport>,
    pub iteration_count: Option<u32>,
    pub cost: f64,
    pub tokens: TokenUsage,
    pub errors: Vec<String>,
    pub gaps_detected: Vec<String>,
    pub retry_strategies: Vec<RetryStrategy>,
    pub providers_used: Vec<String>,
    pub report: Option<String>,
}

impl StateUpdate {
    /// agent 节点边界的失败路径：空结果 + 错误记录，绝不向外抛。
    pub fn agent_failure(agent: &str, reason: &str) -> Self {
        Self {
            agent_outputs: vec![AgentOutput::empty(agent)],
            errors: vec![format!("{agent}: {reason}")],
            ..Self::default()
        }
    }

    /// 输入为空时的占位更新（log-only，不计入 errors）。
    pub fn agent_no_data(agent: &str) -> Self {
        tracing::debug!(agent, "no_data: agent skipped, empty input");
        Self {
            agent_outputs: vec![AgentOutput::empty(agent)],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_strips_tracking_and_fragment() {
        assert_eq!(
            normalize_url("HTTPS://Example.com/About?utm_source=x&id=3#team"),
            "https://example.com/About?id=3"
        );
        assert_eq!(
            normalize_url("https://example.com/a/?utm_campaign=q"),
            "https://example.com/a"
        );
    }

    #[test]
    fn normalize_url_keeps_bare_host_slash() {
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn domain_classification_tiers() {
        assert_eq!(SourceTier::classify("sec.gov"), SourceTier::Primary);
        assert_eq!(SourceTier::classify("reuters.com"), SourceTier::High);
        assert_eq!(SourceTier::classify("en.wikipedia.org"), SourceTier::Medium);
        assert_eq!(SourceTier::classify("reddit.com"), SourceTier::Low);
        assert_eq!(SourceTier::classify("acme.example"), SourceTier::Unknown);
    }

    #[test]
    fn company_name_is_not_touched_by_apply() {
        let mut state = ResearchState::new("Microsoft", Depth::Standard);
        state.apply(StateUpdate {
            errors: vec!["x".into()],
            ..StateUpdate::default()
        });
        assert_eq!(state.company_name, "Microsoft");
    }

    #[test]
    fn total_cost_is_monotone_under_updates() {
        let mut state = ResearchState::new("Acme", Depth::Quick);
        let mut last = state.total_cost;
        for cost in [0.01, 0.0, 0.2, 0.005] {
            state.apply(StateUpdate {
                cost,
                ..StateUpdate::default()
            });
            assert!(state.total_cost >= last);
            last = state.total_cost;
        }
    }

    #[test]
    fn iteration_count_merges_by_max() {
        let mut state = ResearchState::new("Acme", Depth::Quick);
        state.apply(StateUpdate {
            iteration_count: Some(2),
            ..StateUpdate::default()
        });
        state.apply(StateUpdate {
            iteration_count: Some(1),
            ..StateUpdate::default()
        });
        assert_eq!(state.iteration_count, 2);
    }
}
