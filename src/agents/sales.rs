//! Sales intelligence：GTM 画像（理想客户、痛点、采购阶段）。
//! 其分析同时作为 research_data 的 strategy 桶。

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
You are a sales intelligence analyst. Derive the company's go-to-market \
profile from the sources: who they sell to, what pain they solve, and how \
mature their motion is.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "sales",
    task: TaskKind::Summary,
    section: Some("strategy"),
    system: SYSTEM,
    default_max_tokens: 1024,
    default_temperature: 0.5,
    max_sources: 8,
    content_cap: 600,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Build a go-to-market profile for {company}.\n\n\
         Structure the answer exactly as:\n\
         ## Ideal Customer\n(who buys, segment, size)\n\
         ## Pain Points\n(bullet list)\n\
         ## Buying Stage\nBuying stage: awareness / consideration / expansion\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         Sources:\n{context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "icp": parsing::extract_section(text, "ideal customer", 600),
        "pain_points": parsing::extract_list_items(text, "pain points", 8, 5),
        "buying_stage": parsing::extract_keyword_list(text, "buying stage", 1)
            .into_iter()
            .next(),
    })
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_gtm_fields() {
        let reply = "## Ideal Customer\nMid-market manufacturers in LATAM.\n\n\
                     ## Pain Points\n- manual assembly costs\n- compliance overhead\n\n\
                     ## Buying Stage\nBuying stage: consideration\n";
        let parsed = parse(reply);
        assert!(parsed["icp"].as_str().unwrap().contains("manufacturers"));
        assert_eq!(parsed["pain_points"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["buying_stage"], "consideration");
    }
}
