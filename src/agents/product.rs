//! Product agent：产品线与技术栈。

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
You are a product analyst. Enumerate the company's offerings and visible \
technology choices; do not speculate beyond the sources.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "product",
    task: TaskKind::SimpleExtract,
    section: Some("products"),
    system: SYSTEM,
    default_max_tokens: 1024,
    default_temperature: 0.4,
    max_sources: 8,
    content_cap: 600,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "List the products and services of {company}.\n\n\
         Structure the answer exactly as:\n\
         ## Products\n(bullet list: name plus one-line description)\n\
         ## Tech Stack\nTech stack: tech1, tech2, ... (only if evidenced)\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         Sources:\n{context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "products": parsing::extract_list_items(text, "products", 12, 4),
        "tech_stack": parsing::extract_keyword_list(text, "tech stack", 10),
    })
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_products_and_stack() {
        let reply = "## Products\n- RoboArm X1: assembly robot\n- FleetOS: orchestration suite\n\n\
                     ## Tech Stack\nTech stack: Rust, ROS, PostgreSQL\n";
        let parsed = parse(reply);
        assert_eq!(parsed["products"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["tech_stack"].as_array().unwrap().len(), 3);
    }
}
