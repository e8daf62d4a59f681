//! Financial agent（外部 API 增强型）。
//!
//! LLM 之前先走金融路由拿硬数据：ticker 解析 → 行情 → SEC 申报，
//! 把 API 数据块和搜索结果一起交给模型综合。API 全挂时退化成
//! 普通 specialist（只有搜索上下文）。

use serde_json::{Value, json};

use crate::{
    agents::{
        AgentContext,
        base::{self, SpecialistSpec},
        parsing,
    },
    providers::{financial::FinancialSnapshot, llm::TaskKind},
    state::{ResearchState, StateUpdate},
};

const SYSTEM: &str = "\
You are a financial analyst. The API DATA block contains verified market and \
filing data; treat it as ground truth over search snippets when they disagree. \
Always attach fiscal periods to figures.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "financial",
    task: TaskKind::Summary,
    section: Some("financial"),
    system: SYSTEM,
    default_max_tokens: 1536,
    default_temperature: 0.3,
    max_sources: 8,
    content_cap: 600,
};

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Write the financial analysis for {company}.\n\n\
         Structure the answer exactly as:\n\
         ## Revenue and Profitability\n(figures with fiscal periods)\n\
         ## Growth\n(trends, YoY where available)\n\
         ## Filings\n(relevant SEC filings, if any)\n\
         ## Key Figures\n(bullet list, one figure each)\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         {context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "revenue": parsing::extract_section(text, "revenue and profitability", 1200),
        "growth": parsing::extract_section(text, "growth", 800),
        "filings": parsing::extract_section(text, "filings", 800),
        "key_figures": parsing::extract_list_items(text, "key figures", 12, 4),
    })
}

/// API 数据块：模型输入的 ground truth 部分。
pub(crate) fn format_api_block(snapshot: &FinancialSnapshot) -> String {
    if snapshot.is_empty() {
        return String::new();
    }
    let mut block = String::from("API DATA (verified):\n");
    if let Some(ticker) = &snapshot.ticker {
        block.push_str(&format!(
            "- ticker: {} ({})\n",
            ticker.symbol,
            ticker.exchange.as_deref().unwrap_or("unknown exchange")
        ));
        if let Some(name) = &ticker.long_name {
            block.push_str(&format!("- registered name: {name}\n"));
        }
    }
    if let Some(quote) = &snapshot.quote {
        if let Some(price) = quote.price {
            block.push_str(&format!(
                "- last price: {price:.2} {}\n",
                quote.currency.as_deref().unwrap_or("")
            ));
        }
        if let (Some(high), Some(low)) = (quote.fifty_two_week_high, quote.fifty_two_week_low) {
            block.push_str(&format!("- 52w range: {low:.2} - {high:.2}\n"));
        }
    }
    for filing in &snapshot.filings {
        block.push_str(&format!(
            "- SEC {} filed {} ({})\n",
            filing.form, filing.filed_at, filing.accession
        ));
    }
    block.push('\n');
    block
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let api_data = ctx.router.financial.gather(&snapshot.company_name).await;
    let extra_sources = api_data.source_urls.clone();
    let block = format_api_block(&api_data);
    if !block.is_empty() {
        tracing::debug!(
            company = %snapshot.company_name,
            filings = api_data.filings.len(),
            "financial api data gathered"
        );
    }
    let mut update =
        base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, Some(block)).await;
    // API 来源并入该 agent 的引用列表。
    if let Some(output) = update.agent_outputs.iter_mut().find(|o| o.agent == SPEC.name) {
        output.sources.extend(extra_sources);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::financial::{Quote, SecFiling, TickerInfo};

    #[test]
    fn api_block_renders_ticker_quote_and_filings() {
        let snapshot = FinancialSnapshot {
            ticker: Some(TickerInfo {
                symbol: "ACME".to_string(),
                exchange: Some("NYSE".to_string()),
                long_name: Some("Acme Corporation".to_string()),
            }),
            quote: Some(Quote {
                price: Some(42.5),
                currency: Some("USD".to_string()),
                market_cap: None,
                fifty_two_week_high: Some(55.0),
                fifty_two_week_low: Some(30.0),
            }),
            filings: vec![SecFiling {
                form: "10-K".to_string(),
                filed_at: "2025-02-01".to_string(),
                accession: "0001-25-000001".to_string(),
                url: "https://www.sec.gov/".to_string(),
            }],
            source_urls: vec![],
        };
        let block = format_api_block(&snapshot);
        assert!(block.contains("ticker: ACME (NYSE)"));
        assert!(block.contains("last price: 42.50 USD"));
        assert!(block.contains("52w range: 30.00 - 55.00"));
        assert!(block.contains("SEC 10-K filed 2025-02-01"));
    }

    #[test]
    fn empty_snapshot_renders_nothing() {
        assert_eq!(format_api_block(&FinancialSnapshot::default()), "");
    }

    #[test]
    fn parse_reads_sections_and_figures() {
        let reply = "## Revenue and Profitability\nRevenue of $4.2B in FY2024, margin 18%.\n\n\
                     ## Growth\n9% YoY.\n\n## Filings\n10-K filed 2025-02-01.\n\n\
                     ## Key Figures\n- Revenue $4.2B FY2024\n- Net income $1.1B\n";
        let parsed = parse(reply);
        assert!(parsed["revenue"].as_str().unwrap().contains("$4.2B"));
        assert_eq!(parsed["key_figures"].as_array().unwrap().len(), 2);
    }
}
