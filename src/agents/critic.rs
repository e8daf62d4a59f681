//! Logic critic：对草稿报告做 QA。
//!
//! 矛盾检测在本地确定性完成（报告 + 各来源内容的数值主张互查），
//! LLM 只负责逻辑连贯性点评。LLM 挂掉时输出退化为纯本地结果，
//! 不算失败。

use serde_json::json;

use crate::{
    agents::{AgentContext, parsing},
    providers::llm::{ChatRequest, TaskKind},
    quality::contradiction,
    state::{AgentOutput, ResearchState, SourceTier, StateUpdate, TokenUsage},
};

const AGENT_NAME: &str = "critic";
const MAX_REPORT_EXCERPT: usize = 6000;

const SYSTEM: &str = "\
You are a logic reviewer. Hunt for internal inconsistencies, unsupported \
leaps, and figures cited without periods or sources. Be specific; name the \
sentence you object to.";

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let Some(report) = snapshot.report.as_deref() else {
        return StateUpdate::agent_no_data(AGENT_NAME);
    };

    // 本地矛盾检测：报告主张 vs 每个来源内容里的主张。
    let mut claims = contradiction::extract_claims(report, "report");
    for hit in &snapshot.search_results {
        claims.extend(contradiction::extract_claims(&hit.content, &hit.url));
    }
    let contradictions = contradiction::detect(&claims);
    let source_quality = source_quality_score(snapshot);

    let structured_base = json!({
        "contradictions": contradictions
            .iter()
            .map(|c| c.to_issue().description)
            .collect::<Vec<_>>(),
        "source_quality": source_quality,
    });

    let request = ChatRequest {
        system: Some(SYSTEM.to_string()),
        prompt: format!(
            "Review this draft report for logical consistency.\n\
             Known numeric contradictions (already detected): {}\n\n\
             End with:\nVerdict: consistent | minor issues | major issues\n\
             Confidence: 0.0-1.0\n\n\
             Draft:\n{}",
            contradictions.len(),
            parsing::truncate_chars(report, MAX_REPORT_EXCERPT)
        ),
        max_tokens: ctx.config.agent_max_tokens(AGENT_NAME, 1024),
        temperature: ctx.config.agent_temperature(AGENT_NAME, 0.3),
        task: TaskKind::Summary,
        budget: None,
        caller: AGENT_NAME,
    };

    match ctx.router.llm.chat(&request).await {
        Ok(outcome) => {
            let confidence = crate::agents::base::normalize_confidence(
                parsing::extract_score(&outcome.text, "confidence", 0.7),
            );
            let mut structured = structured_base;
            structured["verdict"] = json!(
                parsing::extract_keyword_list(&outcome.text, "verdict", 1)
                    .into_iter()
                    .next()
            );
            StateUpdate {
                agent_outputs: vec![AgentOutput {
                    agent: AGENT_NAME.to_string(),
                    analysis: outcome.text,
                    structured,
                    cost: outcome.cost,
                    tokens: outcome.tokens,
                    confidence,
                    sources: Vec::new(),
                }],
                cost: outcome.cost,
                tokens: outcome.tokens,
                providers_used: vec![outcome.provider.to_string()],
                ..StateUpdate::default()
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "critic llm failed, keeping local analysis only");
            StateUpdate {
                agent_outputs: vec![AgentOutput {
                    agent: AGENT_NAME.to_string(),
                    analysis: format!(
                        "local review only: {} numeric contradiction(s) detected",
                        contradictions.len()
                    ),
                    structured: structured_base,
                    cost: 0.0,
                    tokens: TokenUsage::default(),
                    confidence: 0.4,
                    sources: Vec::new(),
                }],
                errors: vec![format!("{AGENT_NAME}: {err}")],
                ..StateUpdate::default()
            }
        }
    }
}

/// 来源质量分（0..=100）：按质量分层加权平均。
fn source_quality_score(snapshot: &ResearchState) -> f64 {
    if snapshot.sources.is_empty() {
        return 0.0;
    }
    let total: f64 = snapshot
        .sources
        .iter()
        .map(|s| match s.tier {
            SourceTier::Primary => 1.0,
            SourceTier::High => 0.8,
            SourceTier::Medium => 0.6,
            SourceTier::Unknown => 0.4,
            SourceTier::Low => 0.3,
        })
        .sum();
    total / snapshot.sources.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Depth,
        state::{SearchHit, SourceRecord},
    };

    #[test]
    fn source_quality_weights_tiers() {
        let mut state = ResearchState::new("Acme", Depth::Quick);
        assert_eq!(source_quality_score(&state), 0.0);
        for url in ["https://sec.gov/a", "https://reddit.com/b"] {
            let hit = SearchHit::new(url, "t", "c", "test");
            state.sources.push(SourceRecord::from_hit(&hit));
        }
        // (1.0 + 0.3) / 2 * 100
        assert!((source_quality_score(&state) - 65.0).abs() < 1e-9);
    }
}
