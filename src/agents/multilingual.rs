//! 多语言搜索查询生成。
//!
//! 纯函数节点：不走 LLM，按固定的 9 语模板扩展公司名查询，
//! 另配母公司追溯与地区来源两组扩展。迭代轮里由 researcher 按
//! 重试策略调用。

use serde_json::json;

use crate::state::AgentOutput;

pub const AGENT_NAME: &str = "multilingual_search";

/// 9 种语言的公司概况查询模板，`{}` 为公司名占位。
pub const LANGUAGE_TEMPLATES: &[(&str, &str)] = &[
    ("en", "{} company profile"),
    ("es", "{} perfil de la empresa"),
    ("pt", "{} perfil da empresa"),
    ("de", "{} Unternehmensprofil"),
    ("fr", "{} profil de l'entreprise"),
    ("zh", "{} 公司简介"),
    ("ja", "{} 会社概要"),
    ("ko", "{} 회사 소개"),
    ("ru", "{} обзор компании"),
];

pub fn expand_queries(company: &str, limit: usize) -> Vec<String> {
    LANGUAGE_TEMPLATES
        .iter()
        .take(limit)
        .map(|(_, template)| template.replace("{}", company))
        .collect()
}

/// 母公司/控股结构追溯查询。
pub fn parent_company_queries(company: &str) -> Vec<String> {
    vec![
        format!("who owns {company}"),
        format!("{company} parent company"),
        format!("{company} subsidiary of"),
    ]
}

/// 地区来源偏置：面向当地商业媒体与注册信息。
pub fn regional_queries(company: &str, country: Option<&str>) -> Vec<String> {
    let mut queries = vec![
        format!("{company} site:linkedin.com"),
        format!("{company} local business news"),
    ];
    if let Some(country) = country {
        queries.push(format!("{company} {country} company registry"));
        queries.push(format!("{company} news {country}"));
    }
    queries
}

/// 与其它 agent 同构的输出记录（零成本的纯函数节点）。
pub fn build_output(company: &str, queries: &[String]) -> AgentOutput {
    AgentOutput {
        agent: AGENT_NAME.to_string(),
        analysis: format!(
            "generated {} expanded queries for {company} across {} languages",
            queries.len(),
            LANGUAGE_TEMPLATES.len()
        ),
        structured: json!({
            "queries": queries,
            "languages": LANGUAGE_TEMPLATES.iter().map(|(lang, _)| *lang).collect::<Vec<_>>(),
        }),
        cost: 0.0,
        tokens: crate::state::TokenUsage::default(),
        confidence: 1.0,
        sources: Vec::new(),
    }
}
