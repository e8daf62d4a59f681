//! Market agent（新闻增强型）：市场规模、份额与趋势。
//! LLM 之前经新闻路由拉取近期报道，与搜索结果并排给模型。

use serde_json::{Value, json};

use crate::{
    agents::{
        AgentContext,
        base::{self, SpecialistSpec},
        parsing,
    },
    providers::llm::TaskKind,
    state::{ResearchState, SearchHit, StateUpdate},
};

const SYSTEM: &str = "\
You are a market analyst. Size the market, place the company in it, and name \
the trends moving it; tie every claim to a source.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "market",
    task: TaskKind::Summary,
    section: Some("market"),
    system: SYSTEM,
    default_max_tokens: 1280,
    default_temperature: 0.4,
    max_sources: 8,
    content_cap: 600,
};

const MAX_NEWS_IN_CONTEXT: usize = 6;

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Analyze the market position of {company}.\n\n\
         Structure the answer exactly as:\n\
         ## Market Size\n(TAM or segment size with currency figures)\n\
         ## Market Share\nMarket share: percentage if evidenced\n\
         ## Trends\n(bullet list)\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         {context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "market_size": parsing::extract_section(text, "market size", 800),
        "market_share": parsing::extract_score(text, "market share", -1.0).max(-1.0),
        "trends": parsing::extract_list_items(text, "trends", 8, 5),
    })
}

fn format_news_block(news: &[SearchHit]) -> String {
    if news.is_empty() {
        return String::new();
    }
    let mut block = String::from("RECENT NEWS:\n");
    for hit in news.iter().take(MAX_NEWS_IN_CONTEXT) {
        block.push_str(&format!(
            "- {} ({}) {}\n",
            hit.title,
            hit.published_at.as_deref().unwrap_or("undated"),
            hit.url
        ));
    }
    block.push('\n');
    block
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let news = match ctx
        .router
        .news
        .news(&snapshot.company_name, "business")
        .await
    {
        Ok(news) => news,
        Err(err) => {
            tracing::debug!(error = %err, "news unavailable for market agent");
            Vec::new()
        }
    };
    let news_sources: Vec<String> = news
        .iter()
        .take(MAX_NEWS_IN_CONTEXT)
        .map(|h| h.url.clone())
        .collect();
    let mut update = base::run_specialist(
        &SPEC,
        build_prompt,
        parse,
        snapshot,
        ctx,
        Some(format_news_block(&news)),
    )
    .await;
    if let Some(output) = update.agent_outputs.iter_mut().find(|o| o.agent == SPEC.name) {
        output.sources.extend(news_sources);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn news_block_lists_titles_with_dates() {
        let mut hit = SearchHit::new("https://news.example/a", "Acme wins contract", "", "gnews");
        hit.published_at = Some("2025-03-01".to_string());
        let block = format_news_block(&[hit]);
        assert!(block.contains("RECENT NEWS"));
        assert!(block.contains("Acme wins contract (2025-03-01)"));
        assert_eq!(format_news_block(&[]), "");
    }

    #[test]
    fn parse_reads_share_and_trends() {
        let reply = "## Market Size\nTAM of $80B by 2027.\n\n\
                     ## Market Share\nMarket share: 12.5% in LATAM\n\n\
                     ## Trends\n- automation demand rising\n";
        let parsed = parse(reply);
        assert_eq!(parsed["market_share"], 12.5);
        assert_eq!(parsed["trends"].as_array().unwrap().len(), 1);
    }
}
