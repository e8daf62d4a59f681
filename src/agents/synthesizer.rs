//! Synthesizer：fan-in 汇总全部 agent 输出，产出分节 markdown 报告。
//!
//! LLM 负责正文；Sources 一节始终由代码从状态里的来源列表生成，
//! 引用不经过模型。LLM 整条链失败时回落到机械拼装——工作流
//! 无论如何要交出一份报告。

use serde_json::json;

use crate::{
    agents::{AgentContext, parsing},
    providers::llm::{ChatRequest, TaskKind},
    state::{AgentOutput, ResearchState, StateUpdate, TokenUsage},
};

const AGENT_NAME: &str = "synthesizer";
const MAX_AGENT_EXCERPT: usize = 2400;
const MAX_SOURCES_LISTED: usize = 20;

const SYSTEM: &str = "\
You are the lead editor of a company research desk. Merge the specialist \
analyses into one coherent report. Keep every concrete figure with its fiscal \
period, resolve duplicate claims by preferring primary sources, and write \
plain confident prose.";

/// 报告正文的规范 section 顺序（与质量分析器对齐）。
const REPORT_SECTIONS: &[&str] = &[
    "Executive Summary",
    "Company Overview",
    "Financial Analysis",
    "Market Position",
    "Competitive Landscape",
    "Product Analysis",
    "Risk Assessment",
    "Investment Thesis",
];

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let contributing: Vec<&AgentOutput> = snapshot
        .agent_outputs
        .values()
        .filter(|o| !o.analysis.is_empty() && o.agent != AGENT_NAME)
        .collect();
    if contributing.is_empty() {
        return StateUpdate::agent_no_data(AGENT_NAME);
    }

    let mut context = String::new();
    for output in &contributing {
        context.push_str(&format!(
            "### {} (confidence {:.2})\n{}\n\n",
            output.agent,
            output.confidence,
            parsing::truncate_chars(&output.analysis, MAX_AGENT_EXCERPT)
        ));
    }

    let section_list = REPORT_SECTIONS
        .iter()
        .map(|s| format!("## {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    let request = ChatRequest {
        system: Some(SYSTEM.to_string()),
        prompt: format!(
            "Write the full research report for {company}.\n\
             Use exactly these section headings, in this order:\n{section_list}\n\n\
             Do not add a Sources section; it is appended separately.\n\n\
             Specialist analyses:\n{context}",
            company = snapshot.company_name,
        ),
        max_tokens: ctx.config.agent_max_tokens(AGENT_NAME, ctx.config.llm_max_tokens),
        temperature: ctx.config.agent_temperature(AGENT_NAME, 0.4),
        task: TaskKind::ComplexReasoning,
        budget: None,
        caller: AGENT_NAME,
    };

    let overall_confidence = contributing.iter().map(|o| o.confidence).sum::<f64>()
        / contributing.len() as f64;

    match ctx.router.llm.chat(&request).await {
        Ok(outcome) => {
            let report = format!(
                "# {} Research Report\n\n{}\n\n{}",
                snapshot.company_name,
                outcome.text.trim(),
                sources_section(snapshot)
            );
            StateUpdate {
                report: Some(report),
                agent_outputs: vec![AgentOutput {
                    agent: AGENT_NAME.to_string(),
                    analysis: outcome.text,
                    structured: json!({
                        "sections": REPORT_SECTIONS,
                        "overall_confidence": overall_confidence,
                    }),
                    cost: outcome.cost,
                    tokens: outcome.tokens,
                    confidence: overall_confidence,
                    sources: listed_sources(snapshot),
                }],
                cost: outcome.cost,
                tokens: outcome.tokens,
                providers_used: vec![outcome.provider.to_string()],
                ..StateUpdate::default()
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "synthesizer llm failed, assembling mechanical report");
            let report = assemble_fallback_report(snapshot);
            StateUpdate {
                report: Some(report),
                agent_outputs: vec![AgentOutput {
                    agent: AGENT_NAME.to_string(),
                    analysis: String::new(),
                    structured: json!({ "fallback": true }),
                    cost: 0.0,
                    tokens: TokenUsage::default(),
                    confidence: overall_confidence * 0.5,
                    sources: listed_sources(snapshot),
                }],
                errors: vec![format!("{AGENT_NAME}: {err}")],
                ..StateUpdate::default()
            }
        }
    }
}

/// 引用列表：质量分层高的来源排前面。
fn sources_section(snapshot: &ResearchState) -> String {
    let mut sources: Vec<_> = snapshot.sources.iter().collect();
    sources.sort_by_key(|s| std::cmp::Reverse(tier_rank(s.tier)));
    let mut section = String::from("## Sources\n");
    for source in sources.iter().take(MAX_SOURCES_LISTED) {
        section.push_str(&format!("- [{}]({}) ({:?})\n", source.title, source.url, source.tier));
    }
    section
}

fn listed_sources(snapshot: &ResearchState) -> Vec<String> {
    snapshot
        .sources
        .iter()
        .take(MAX_SOURCES_LISTED)
        .map(|s| s.url.clone())
        .collect()
}

fn tier_rank(tier: crate::state::SourceTier) -> u8 {
    use crate::state::SourceTier::*;
    match tier {
        Primary => 4,
        High => 3,
        Medium => 2,
        Unknown => 1,
        Low => 0,
    }
}

/// 机械拼装：research_data + agent 结构化输出直接成稿。
fn assemble_fallback_report(snapshot: &ResearchState) -> String {
    let section_content = |keys: &[&str]| -> String {
        for key in keys {
            if let Some(content) = snapshot.research_data.get(*key)
                && !content.trim().is_empty()
            {
                return parsing::truncate_chars(content, 3000);
            }
        }
        "Data not gathered in this run.".to_string()
    };
    let agent_excerpt = |agent: &str| -> Option<String> {
        snapshot
            .agent_outputs
            .get(agent)
            .filter(|o| !o.analysis.is_empty())
            .map(|o| parsing::truncate_chars(&o.analysis, 2500))
    };

    let mut report = format!("# {} Research Report\n\n", snapshot.company_name);
    for (heading, keys, agent) in [
        ("Executive Summary", &["company_info"][..], Some("analyst")),
        ("Company Overview", &["company_info"][..], Some("analyst")),
        ("Financial Analysis", &["financial"][..], Some("financial")),
        ("Market Position", &["market"][..], Some("market")),
        ("Competitive Landscape", &["competitive"][..], Some("competitor")),
        ("Product Analysis", &["products"][..], Some("product")),
        ("Risk Assessment", &["strategy"][..], Some("critic")),
        ("Investment Thesis", &["strategy"][..], Some("investment")),
    ] {
        let body = agent
            .and_then(agent_excerpt)
            .unwrap_or_else(|| section_content(keys));
        report.push_str(&format!("## {heading}\n{body}\n\n"));
    }
    report.push_str(&sources_section(snapshot));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Depth, state::SearchHit, state::SourceRecord};

    fn state_with_data() -> ResearchState {
        let mut state = ResearchState::new("Acme", Depth::Standard);
        state.research_data.insert(
            "financial".to_string(),
            "Revenue of $4.2B in FY2024 with 18% margin.".to_string(),
        );
        let hit = SearchHit::new("https://sec.gov/acme", "Acme 10-K", "filing", "test");
        state.sources.push(SourceRecord::from_hit(&hit));
        let hit2 = SearchHit::new("https://reddit.com/r/acme", "thread", "chatter", "test");
        state.sources.push(SourceRecord::from_hit(&hit2));
        state
    }

    #[test]
    fn fallback_report_contains_all_section_headings() {
        let report = assemble_fallback_report(&state_with_data());
        for heading in REPORT_SECTIONS {
            assert!(report.contains(&format!("## {heading}")), "missing {heading}");
        }
        assert!(report.contains("## Sources"));
        assert!(report.contains("$4.2B"));
    }

    #[test]
    fn sources_section_puts_primary_tier_first() {
        let section = sources_section(&state_with_data());
        let sec_pos = section.find("sec.gov").unwrap();
        let reddit_pos = section.find("reddit.com").unwrap();
        assert!(sec_pos < reddit_pos);
    }
}
