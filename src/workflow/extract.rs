//! Extract 控制节点：原始搜索结果 → 结构化研究数据。
//!
//! 按关键词把结果片段分进六个 section 桶（与阈值检查器的权重表
//! 对齐），再叠加 analyst 的结构化输出。确定性、零成本；gate 与
//! 阈值检查在 specialist 之前就有可评估的数据。

use std::collections::BTreeMap;

use crate::state::{ResearchState, StateUpdate};

const MAX_SECTION_CHARS: usize = 4000;

/// section → 归类关键词。
const SECTION_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "financial",
        &[
            "revenue", "profit", "earnings", "margin", "funding", "valuation", "ipo", "ebitda",
            "income",
        ],
    ),
    (
        "market",
        &["market", "industry", "demand", "tam", "share", "segment", "growth"],
    ),
    (
        "company_info",
        &[
            "founded", "headquarter", "employees", "ceo", "about", "history", "mission",
            "subsidiary",
        ],
    ),
    (
        "competitive",
        &["competitor", "rival", "versus", "competing", "alternative to"],
    ),
    (
        "products",
        &["product", "service", "platform", "launch", "offering", "feature"],
    ),
    (
        "strategy",
        &["strategy", "expansion", "roadmap", "partnership", "acquisition", "plan"],
    ),
];

pub fn extract_research_data(state: &ResearchState) -> StateUpdate {
    let mut buckets: BTreeMap<String, String> = BTreeMap::new();

    // 原始结果片段按关键词进桶（一个片段可以进多个桶）。
    for hit in &state.search_results {
        let text = format!("{}. {}", hit.title, hit.content);
        let lower = text.to_lowercase();
        for (section, keywords) in SECTION_KEYWORDS {
            if keywords.iter().any(|k| lower.contains(k)) {
                let bucket = buckets.entry(section.to_string()).or_default();
                if bucket.len() < MAX_SECTION_CHARS {
                    bucket.push_str(&text);
                    bucket.push('\n');
                }
            }
        }
    }

    // analyst 的结构化输出精确归位。
    if let Some(analyst) = state.agent_outputs.get("analyst") {
        if let Some(overview) = analyst.structured["company_overview"].as_str() {
            prepend(&mut buckets, "company_info", overview);
        }
        if let Some(metrics) = analyst.structured["key_metrics"].as_array() {
            let lines: Vec<&str> = metrics.iter().filter_map(|m| m.as_str()).collect();
            if !lines.is_empty() {
                prepend(&mut buckets, "financial", &lines.join("\n"));
            }
        }
        if let Some(competitors) = analyst.structured["competitors"].as_array() {
            let names: Vec<&str> = competitors.iter().filter_map(|c| c.as_str()).collect();
            if !names.is_empty() {
                prepend(
                    &mut buckets,
                    "competitive",
                    &format!("Known competitors: {}", names.join(", ")),
                );
            }
        }
    }

    for bucket in buckets.values_mut() {
        if bucket.len() > MAX_SECTION_CHARS {
            bucket.truncate(MAX_SECTION_CHARS);
        }
    }
    tracing::debug!(sections = buckets.len(), "research data extracted");

    StateUpdate {
        research_data: buckets,
        ..StateUpdate::default()
    }
}

fn prepend(buckets: &mut BTreeMap<String, String>, section: &str, content: &str) {
    let bucket = buckets.entry(section.to_string()).or_default();
    *bucket = format!("{content}\n{bucket}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Depth,
        state::{AgentOutput, SearchHit, TokenUsage},
    };

    fn state_with_hits() -> ResearchState {
        let mut state = ResearchState::new("Acme", Depth::Standard);
        state.search_results = vec![
            SearchHit::new(
                "https://a.example/fin",
                "Acme earnings",
                "Acme reported revenue of $2.1B with improved margin.",
                "test",
            ),
            SearchHit::new(
                "https://b.example/prod",
                "Acme launches platform",
                "The new platform product targets industrial automation.",
                "test",
            ),
            SearchHit::new(
                "https://c.example/about",
                "About Acme",
                "Founded in 1998, headquartered in Asuncion with 8,000 employees.",
                "test",
            ),
        ];
        state
    }

    #[test]
    fn hits_are_bucketed_by_keywords() {
        let update = extract_research_data(&state_with_hits());
        assert!(update.research_data["financial"].contains("$2.1B"));
        assert!(update.research_data["products"].contains("platform"));
        assert!(update.research_data["company_info"].contains("Founded in 1998"));
    }

    #[test]
    fn analyst_structured_output_lands_in_matching_buckets() {
        let mut state = state_with_hits();
        state.agent_outputs.insert(
            "analyst".to_string(),
            AgentOutput {
                agent: "analyst".to_string(),
                analysis: "full text".to_string(),
                structured: serde_json::json!({
                    "company_overview": "Acme is a robotics maker.",
                    "key_metrics": ["Revenue $2.1B FY2024"],
                    "competitors": ["BetaCorp", "Gamma"],
                }),
                cost: 0.01,
                tokens: TokenUsage::new(100, 50),
                confidence: 0.8,
                sources: vec![],
            },
        );
        let update = extract_research_data(&state);
        assert!(update.research_data["company_info"].starts_with("Acme is a robotics maker."));
        assert!(update.research_data["financial"].starts_with("Revenue $2.1B FY2024"));
        assert!(update.research_data["competitive"].contains("Known competitors: BetaCorp, Gamma"));
    }

    #[test]
    fn empty_results_produce_no_buckets() {
        let state = ResearchState::new("Acme", Depth::Quick);
        let update = extract_research_data(&state);
        assert!(update.research_data.is_empty());
    }
}
