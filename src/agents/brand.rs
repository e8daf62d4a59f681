//! Brand auditor：品牌强度、舆论倾向与形象问题。

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
You are a brand auditor. Judge brand strength and public sentiment strictly \
from the provided sources; quote the evidence behind each judgement.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "brand",
    task: TaskKind::Summary,
    section: None,
    system: SYSTEM,
    default_max_tokens: 1024,
    default_temperature: 0.5,
    max_sources: 8,
    content_cap: 600,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Audit the brand of {company} using the sources below.\n\n\
         Structure the answer exactly as:\n\
         ## Brand Strength\nBrand strength: 0-100 with one-paragraph rationale\n\
         ## Sentiment\n(positive / neutral / negative, with evidence)\n\
         ## Issues\n(bullet list of reputation issues, empty if none)\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         Sources:\n{context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "strength": parsing::extract_score(text, "brand strength", 50.0),
        "sentiment": parsing::extract_section(text, "sentiment", 600),
        "issues": parsing::extract_list_items(text, "issues", 8, 5),
    })
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_strength_and_issues() {
        let reply = "## Brand Strength\nBrand strength: 72. Well regarded in LATAM.\n\n\
                     ## Sentiment\nMostly positive coverage.\n\n\
                     ## Issues\n- 2023 recall coverage lingers\n";
        let parsed = parse(reply);
        assert_eq!(parsed["strength"], 72.0);
        assert_eq!(parsed["issues"].as_array().unwrap().len(), 1);
    }
}
