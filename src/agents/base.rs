//! Specialist agent 的公共执行路径。
//!
//! 流程：搜索结果 → 有界上下文 → 绑定 prompt → LLM → 宽松解析 →
//! 统一输出记录（analysis + structured + 成本/置信度/来源）。
//! 各 specialist 只提供 prompt 模板与解析函数。

use serde_json::Value;

use crate::{
    agents::{AgentContext, parsing},
    providers::llm::{ChatRequest, TaskKind},
    state::{AgentOutput, ResearchState, SearchHit, StateUpdate},
};

/// 一个通用 specialist 的静态描述。
pub struct SpecialistSpec {
    pub name: &'static str,
    pub task: TaskKind,
    /// 写入 `research_data` 的 section；None 表示不贡献结构化研究数据。
    pub section: Option<&'static str>,
    pub system: &'static str,
    pub default_max_tokens: u32,
    pub default_temperature: f32,
    pub max_sources: usize,
    pub content_cap: usize,
}

/// 把搜索结果格式化成有界 prompt 上下文：取前 N 条，单条内容截断。
pub fn format_search_context(hits: &[SearchHit], max_sources: usize, content_cap: usize) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().take(max_sources).enumerate() {
        let content = parsing::truncate_chars(&hit.content, content_cap);
        out.push_str(&format!(
            "[{}] {} ({})\n{}\n\n",
            i + 1,
            hit.title,
            hit.url,
            content
        ));
    }
    out
}

/// 上下文里实际引用到的 URL（输出记录的 sources 字段）。
pub fn context_sources(hits: &[SearchHit], max_sources: usize) -> Vec<String> {
    hits.iter()
        .take(max_sources)
        .map(|h| h.url.clone())
        .collect()
}

/// 模型给的 confidence 可能是 0.82 也可能是 82，统一到 0..=1。
pub fn normalize_confidence(raw: f64) -> f64 {
    let v = if raw > 1.0 { raw / 100.0 } else { raw };
    v.clamp(0.0, 1.0)
}

/// 通用 specialist 执行。`extra_context` 由外部 API 增强型 agent 注入
/// （行情/申报/新闻数据块），拼在搜索上下文前面。
pub async fn run_specialist(
    spec: &SpecialistSpec,
    build_prompt: fn(company: &str, context: &str) -> String,
    parse: fn(&str) -> Value,
    snapshot: &ResearchState,
    ctx: &AgentContext,
    extra_context: Option<String>,
) -> StateUpdate {
    let search_context =
        format_search_context(&snapshot.search_results, spec.max_sources, spec.content_cap);
    let has_extra = extra_context.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
    if search_context.is_empty() && !has_extra {
        return StateUpdate::agent_no_data(spec.name);
    }

    let context = match extra_context {
        Some(extra) if !extra.is_empty() => format!("{extra}\n{search_context}"),
        _ => search_context,
    };
    let prompt = build_prompt(&snapshot.company_name, &context);
    let request = ChatRequest {
        system: Some(spec.system.to_string()),
        prompt,
        max_tokens: ctx.config.agent_max_tokens(spec.name, spec.default_max_tokens),
        temperature: ctx
            .config
            .agent_temperature(spec.name, spec.default_temperature),
        task: spec.task,
        budget: None,
        caller: spec.name,
    };

    match ctx.router.llm.chat(&request).await {
        Ok(outcome) => {
            let confidence =
                normalize_confidence(parsing::extract_score(&outcome.text, "confidence", 0.6));
            let structured = parse(&outcome.text);
            let mut update = StateUpdate {
                agent_outputs: vec![AgentOutput {
                    agent: spec.name.to_string(),
                    analysis: outcome.text.clone(),
                    structured,
                    cost: outcome.cost,
                    tokens: outcome.tokens,
                    confidence,
                    sources: context_sources(&snapshot.search_results, spec.max_sources),
                }],
                cost: outcome.cost,
                tokens: outcome.tokens,
                providers_used: vec![outcome.provider.to_string()],
                ..StateUpdate::default()
            };
            if let Some(section) = spec.section {
                update
                    .research_data
                    .insert(section.to_string(), outcome.text);
            }
            update
        }
        Err(err) => StateUpdate::agent_failure(spec.name, &err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(n: usize) -> Vec<SearchHit> {
        (0..n)
            .map(|i| {
                SearchHit::new(
                    &format!("https://site{i}.example/page"),
                    &format!("Title {i}"),
                    &"long content ".repeat(50),
                    "test",
                )
            })
            .collect()
    }

    #[test]
    fn context_is_bounded_by_sources_and_length() {
        let context = format_search_context(&hits(10), 3, 40);
        assert_eq!(context.matches("https://").count(), 3);
        // 每条内容被截断到 40 字符 + 省略号。
        for line in context.lines().filter(|l| l.starts_with("long")) {
            assert!(line.chars().count() <= 41);
        }
    }

    #[test]
    fn context_sources_track_what_the_prompt_saw() {
        let sources = context_sources(&hits(5), 2);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], "https://site0.example/page");
    }

    #[test]
    fn confidence_normalizes_percent_styles() {
        assert_eq!(normalize_confidence(0.82), 0.82);
        assert_eq!(normalize_confidence(82.0), 0.82);
        assert_eq!(normalize_confidence(140.0), 1.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
    }
}
