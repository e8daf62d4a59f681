//! Researcher：查询生成 + 搜索 fan-out。
//!
//! 第一轮用 LLM 生成 3–5 条检索词（失败回落到固定模板）；
//! 迭代轮不再花 LLM 钱，按 gap 与重试策略组合针对性查询
//! （多语言、母公司、地区来源、新闻稿等）。所有查询并行检索，
//! 结果过掉 URL 注册表里标记无用的链接。

use std::collections::BTreeSet;

use serde_json::json;
use tokio::task::JoinSet;

use crate::{
    agents::{AgentContext, multilingual, parsing},
    providers::llm::{ChatRequest, TaskKind},
    quality::threshold::RetryStrategy,
    state::{AgentOutput, ResearchState, SearchHit, SourceRecord, StateUpdate},
};

const AGENT_NAME: &str = "researcher";
const QUERY_GEN_MAX_TOKENS: u32 = 512;
const MIN_QUERY_LEN: usize = 4;

const QUERY_GEN_SYSTEM: &str = "\
You are a research query planner. Given a company name, produce focused web \
search queries that together cover: company overview, financials, products, \
market position, and competitors. Output one query per line, no numbering, \
no commentary.";

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let company = snapshot.company_name.clone();
    let mut update = StateUpdate::default();

    let queries = if snapshot.iteration_count <= 1 {
        match generate_queries(&company, ctx, &mut update).await {
            Some(queries) => queries,
            None => fallback_queries(&company, ctx.config.num_search_queries),
        }
    } else {
        let queries = followup_queries(snapshot, &company, ctx.config.num_search_queries);
        if snapshot
            .retry_strategies
            .iter()
            .any(|s| matches!(s, RetryStrategy::Multilingual | RetryStrategy::RegionalSources))
        {
            update
                .agent_outputs
                .push(multilingual::build_output(&company, &queries));
        }
        queries
    };

    // 查询去重（跨迭代不重复检索同一个词）。
    let seen: BTreeSet<&String> = snapshot.queries.iter().collect();
    let queries: Vec<String> = queries
        .into_iter()
        .filter(|q| q.len() >= MIN_QUERY_LEN && !seen.contains(q))
        .take(ctx.config.num_search_queries)
        .collect();
    if queries.is_empty() {
        update
            .errors
            .push(format!("{AGENT_NAME}: no new queries to run"));
        return update;
    }

    // 搜索 fan-out：每条查询一个任务，结果回来统一去重。
    let useless = ctx.cache.useless_urls(&company);
    let mut set = JoinSet::new();
    for query in queries.clone() {
        let router = ctx.router.clone();
        let max_results = ctx.config.max_search_results;
        set.spawn(async move {
            let outcome = router.search.search(&query, max_results).await;
            (query, outcome)
        });
    }

    let mut hits: Vec<SearchHit> = Vec::new();
    while let Some(joined) = set.join_next().await {
        let Ok((query, outcome)) = joined else {
            continue;
        };
        match outcome {
            Ok(found) => {
                let mut kept = Vec::new();
                for hit in found {
                    if useless.contains(&hit.url) {
                        continue;
                    }
                    // 空结果进注册表，后续运行不再重复抓取。
                    if hit.content.is_empty() && hit.title.is_empty() {
                        let _ = ctx.cache.mark_url(&company, &hit.url, false);
                        continue;
                    }
                    kept.push(hit);
                }
                tracing::debug!(query = %query, kept = kept.len(), "search query done");
                hits.extend(kept);
            }
            Err(err) => {
                update
                    .errors
                    .push(format!("{AGENT_NAME}: search `{query}` failed: {err}"));
            }
        }
    }

    let sources: Vec<SourceRecord> = hits.iter().map(SourceRecord::from_hit).collect();
    let confidence = (hits.len() as f64 / 10.0).min(1.0);
    update.agent_outputs.push(AgentOutput {
        agent: AGENT_NAME.to_string(),
        analysis: format!(
            "ran {} queries, collected {} results across {} domains",
            queries.len(),
            hits.len(),
            sources
                .iter()
                .map(|s| s.domain.as_str())
                .collect::<BTreeSet<_>>()
                .len()
        ),
        structured: json!({ "queries": queries.clone(), "results": hits.len() }),
        cost: update.cost,
        tokens: update.tokens,
        confidence,
        sources: hits.iter().map(|h| h.url.clone()).take(20).collect(),
    });
    update.queries = queries;
    update.search_results = hits;
    update.sources = sources;
    update
}

/// 第一轮：LLM 生成查询。失败时返回 None 走模板回落。
async fn generate_queries(
    company: &str,
    ctx: &AgentContext,
    update: &mut StateUpdate,
) -> Option<Vec<String>> {
    let want = ctx.config.num_search_queries.clamp(3, 5);
    let request = ChatRequest {
        system: Some(QUERY_GEN_SYSTEM.to_string()),
        prompt: format!("Company: {company}\nProduce {want} search queries."),
        max_tokens: QUERY_GEN_MAX_TOKENS,
        temperature: 0.4,
        task: TaskKind::SimpleExtract,
        budget: None,
        caller: AGENT_NAME,
    };
    match ctx.router.llm.chat(&request).await {
        Ok(outcome) => {
            update.cost += outcome.cost;
            update.tokens.add(outcome.tokens);
            update.providers_used.push(outcome.provider.to_string());
            let queries = parse_query_lines(&outcome.text, want);
            if queries.is_empty() {
                tracing::warn!("query generation returned no usable lines");
                None
            } else {
                Some(queries)
            }
        }
        Err(err) => {
            update
                .errors
                .push(format!("{AGENT_NAME}: query generation failed: {err}"));
            None
        }
    }
}

fn parse_query_lines(text: &str, max: usize) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|q| q.len() >= MIN_QUERY_LEN && q.split_whitespace().count() <= 12)
        .take(max)
        .collect()
}

fn fallback_queries(company: &str, max: usize) -> Vec<String> {
    [
        format!("{company} company overview"),
        format!("{company} annual revenue financial results"),
        format!("{company} products and services"),
        format!("{company} competitors market share"),
        format!("{company} latest news"),
    ]
    .into_iter()
    .take(max)
    .collect()
}

/// 迭代轮：gap + 重试策略 → 针对性查询（零 LLM 成本）。
fn followup_queries(snapshot: &ResearchState, company: &str, max: usize) -> Vec<String> {
    let mut queries = Vec::new();
    for gap in &snapshot.gaps_detected {
        queries.push(match gap.as_str() {
            "financial" => format!("{company} annual report revenue earnings"),
            "market" => format!("{company} market size industry analysis"),
            "company_info" => format!("about {company} history headquarters"),
            "competitive" => format!("{company} vs competitors comparison"),
            "products" => format!("{company} product lineup pricing"),
            "strategy" => format!("{company} strategy roadmap expansion"),
            other => format!("{company} {other}"),
        });
    }
    for strategy in &snapshot.retry_strategies {
        match strategy {
            RetryStrategy::Multilingual => {
                queries.extend(multilingual::expand_queries(company, 4));
            }
            RetryStrategy::ParentCompany => {
                queries.extend(multilingual::parent_company_queries(company));
            }
            RetryStrategy::RegionalSources => {
                queries.extend(multilingual::regional_queries(company, None));
            }
            RetryStrategy::PressReleases => {
                queries.push(format!("{company} press release announcement"));
            }
            RetryStrategy::ArchivedData => {
                queries.push(format!("{company} annual report pdf archive"));
            }
            RetryStrategy::AlternativeSources => {
                queries.push(format!("{company} crunchbase linkedin profile"));
            }
            RetryStrategy::RelaxedQueries => {
                queries.push(company.to_string());
                queries.push(format!("about {company}"));
            }
        }
    }
    if queries.is_empty() {
        queries.push(format!("{company} detailed company information"));
    }
    queries.truncate(max.max(3));
    queries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Depth;

    #[test]
    fn query_lines_parse_bullets_and_numbering() {
        let text = "1. Acme Corp revenue 2024\n- Acme Corp competitors\n\"Acme products\"\nok\n";
        let queries = parse_query_lines(text, 5);
        assert_eq!(
            queries,
            vec![
                "Acme Corp revenue 2024",
                "Acme Corp competitors",
                "Acme products"
            ]
        );
    }

    #[test]
    fn fallback_queries_respect_limit() {
        let queries = fallback_queries("Acme", 3);
        assert_eq!(queries.len(), 3);
        assert!(queries[0].contains("Acme"));
    }

    #[test]
    fn followup_queries_target_gaps_and_strategies() {
        let mut state = ResearchState::new("SubCo", Depth::Standard);
        state.gaps_detected = vec!["financial".to_string()];
        state.retry_strategies = vec![RetryStrategy::ParentCompany, RetryStrategy::Multilingual];
        let queries = followup_queries(&state, "SubCo", 12);
        assert!(queries.iter().any(|q| q.contains("annual report")));
        assert!(queries.iter().any(|q| q.contains("parent company")));
        assert!(queries.iter().any(|q| q.contains("会社概要") || q.contains("perfil")));
    }

    #[test]
    fn followup_never_returns_empty() {
        let state = ResearchState::new("Acme", Depth::Quick);
        let queries = followup_queries(&state, "Acme", 5);
        assert!(!queries.is_empty());
    }
}
