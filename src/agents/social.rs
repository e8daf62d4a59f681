//! Social media agent：数字渠道画像（平台、互动水平、内容策略）。

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
You are a digital presence analyst. Describe the company's social media and \
online footprint using only what the sources show.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "social",
    task: TaskKind::SimpleExtract,
    section: None,
    system: SYSTEM,
    default_max_tokens: 768,
    default_temperature: 0.5,
    max_sources: 8,
    content_cap: 500,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Profile the digital presence of {company}.\n\n\
         Structure the answer exactly as:\n\
         ## Platforms\nPlatforms: platform1, platform2, ...\n\
         ## Engagement\nEngagement level: high / medium / low, with evidence\n\
         ## Content Strategy\n(short paragraph)\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         Sources:\n{context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "platforms": parsing::extract_keyword_list(text, "platforms", 8),
        "engagement_level": parsing::extract_keyword_list(text, "engagement level", 1)
            .into_iter()
            .next(),
        "content_strategy": parsing::extract_section(text, "content strategy", 500),
    })
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, None).await
}
