//! Analyst：对搜索结果做第一轮综合（概览、关键指标、竞争对手）。

use serde_json::{Value, json};

use crate::{
    agents::{
        AgentContext,
        base::{self, SpecialistSpec},
        parsing,
    },
    providers::llm::TaskKind,
    state::{ResearchState, StateUpdate},
};

const SYSTEM: &str = "\
You are a company research analyst. Summarize what the provided sources say, \
cite source numbers like [1] inline, and never invent figures that are not in \
the sources. Prefer concrete values (revenue, growth, headcount) over prose.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "analyst",
    task: TaskKind::Summary,
    section: None,
    system: SYSTEM,
    default_max_tokens: 1536,
    default_temperature: 0.4,
    max_sources: 10,
    content_cap: 800,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Analyze the company {company} from the search results below.\n\n\
         Structure the answer exactly as:\n\
         ## Company Overview\n(2-3 paragraphs)\n\
         ## Key Metrics\n(bullet list of concrete figures)\n\
         ## Competitors\nCompetitors: name1, name2, ...\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         Search results:\n{context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "company_overview": parsing::extract_section(text, "company overview", 2000),
        "key_metrics": parsing::extract_list_items(text, "key metrics", 12, 5),
        "competitors": parsing::extract_keyword_list(text, "competitors", 10),
    })
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pulls_overview_metrics_and_competitors() {
        let reply = "\
## Company Overview\nAcme builds industrial robots across LATAM.\n\n\
## Key Metrics\n- Revenue $1.2B (FY2024) [1]\n- Headcount 8,000 [2]\n\n\
## Competitors\nCompetitors: BetaCorp, Gamma Industries\n\n\
## Confidence\nConfidence: 0.7\n";
        let parsed = parse(reply);
        assert!(
            parsed["company_overview"]
                .as_str()
                .unwrap()
                .contains("industrial robots")
        );
        assert_eq!(parsed["key_metrics"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["competitors"][0], "BetaCorp");
    }
}
