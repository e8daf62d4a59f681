//! Competitor scout（新闻增强型）：竞争格局、护城河与竞争强度。

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
You are a competitive intelligence scout. Map who competes with the company, \
where its moat is, and how intense the rivalry runs.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "competitor",
    task: TaskKind::Summary,
    section: Some("competitive"),
    system: SYSTEM,
    default_max_tokens: 1280,
    default_temperature: 0.5,
    max_sources: 8,
    content_cap: 600,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Map the competitive landscape of {company}.\n\n\
         Structure the answer exactly as:\n\
         ## Competitors\n(bullet list: competitor plus one-line positioning)\n\
         ## Moat\n(defensible advantages, if any)\n\
         ## Intensity\nIntensity: low / medium / high\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         {context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "competitors": parsing::extract_list_items(text, "competitors", 10, 3),
        "moat": parsing::extract_section(text, "moat", 800),
        "intensity": parsing::extract_keyword_list(text, "intensity", 1)
            .into_iter()
            .next(),
    })
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    // 竞争动态新闻作为补充上下文（拿不到就只用搜索结果）。
    let query = format!("{} competitors", snapshot.company_name);
    let news_block = match ctx.router.news.news(&query, "competitive").await {
        Ok(news) if !news.is_empty() => {
            let mut block = String::from("COMPETITIVE NEWS:\n");
            for hit in news.iter().take(5) {
                block.push_str(&format!("- {} {}\n", hit.title, hit.url));
            }
            block.push('\n');
            block
        }
        Ok(_) => String::new(),
        Err(err) => {
            tracing::debug!(error = %err, "news unavailable for competitor agent");
            String::new()
        }
    };
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, Some(news_block)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_competitors_and_intensity() {
        let reply = "## Competitors\n- BetaCorp: premium segment leader\n- Gamma: low-cost rival\n\n\
                     ## Moat\nDistribution network across 12 countries.\n\n\
                     ## Intensity\nIntensity: high\n";
        let parsed = parse(reply);
        assert_eq!(parsed["competitors"].as_array().unwrap().len(), 2);
        assert!(parsed["moat"].as_str().unwrap().contains("Distribution"));
        assert_eq!(parsed["intensity"], "high");
    }
}
