//! Web 搜索路由：duckduckgo（免费）→ tavily → serper。
//!
//! 策略由配置决定：free_first 按上述顺序，premium_first 反转，
//! auto 在付费 key 就绪时优先 tavily。所有 provider 的结果统一成
//! `SearchHit`，URL 规范化后去重交给 state 层。

use std::{sync::Arc, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::SearchStrategy,
    errors::RouterError,
    providers::{ProviderCategory, Tier, cost::CostLedger, quota::{QuotaStatus, QuotaTracker}},
    state::SearchHit,
};

const SEARCH_CALL_TIMEOUT: Duration = Duration::from_secs(20);
const TAVILY_COST_PER_CALL: f64 = 0.008;
const SERPER_COST_PER_CALL: f64 = 0.003;

#[derive(Debug, Clone, Copy)]
pub struct SearchDescriptor {
    pub name: &'static str,
    pub tier: Tier,
    pub key_env: Option<&'static str>,
    pub unit_cost: f64,
    pub free_tier_daily: Option<u64>,
}

pub const SEARCH_PROVIDERS: &[SearchDescriptor] = &[
    SearchDescriptor {
        name: "duckduckgo",
        tier: Tier::Free,
        key_env: None,
        unit_cost: 0.0,
        free_tier_daily: None,
    },
    SearchDescriptor {
        name: "tavily",
        tier: Tier::Standard,
        key_env: Some("TAVILY_API_KEY"),
        unit_cost: TAVILY_COST_PER_CALL,
        free_tier_daily: Some(1000),
    },
    SearchDescriptor {
        name: "serper",
        tier: Tier::Standard,
        key_env: Some("SERPER_API_KEY"),
        unit_cost: SERPER_COST_PER_CALL,
        free_tier_daily: Some(2500),
    },
];

pub struct SearchRouter {
    http: reqwest::Client,
    quota: Arc<QuotaTracker>,
    ledger: Arc<CostLedger>,
    strategy: SearchStrategy,
}

impl SearchRouter {
    pub fn new(
        http: reqwest::Client,
        quota: Arc<QuotaTracker>,
        ledger: Arc<CostLedger>,
        strategy: SearchStrategy,
    ) -> Self {
        Self {
            http,
            quota,
            ledger,
            strategy,
        }
    }

    fn provider_order(&self) -> Vec<&'static SearchDescriptor> {
        let has_key = |d: &SearchDescriptor| match d.key_env {
            Some(env) => std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false),
            None => true,
        };
        let mut order: Vec<&'static SearchDescriptor> = SEARCH_PROVIDERS
            .iter()
            .filter(|d| has_key(d))
            .filter(|d| {
                matches!(
                    self.quota.status(d.name, d.free_tier_daily),
                    QuotaStatus::Ok | QuotaStatus::Low
                )
            })
            .collect();
        match self.strategy {
            SearchStrategy::FreeFirst => order.sort_by_key(|d| d.tier),
            SearchStrategy::PremiumFirst => order.sort_by_key(|d| std::cmp::Reverse(d.tier)),
            SearchStrategy::Auto => {
                // 付费 key 就绪时把 tavily 提前，免费档兜底。
                if let Some(pos) = order.iter().position(|d| d.name == "tavily") {
                    let tavily = order.remove(pos);
                    order.insert(0, tavily);
                }
            }
        }
        order
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.provider_order().iter().map(|d| d.name).collect()
    }

    /// 搜索一个查询词。空结果不算失败（交给上层阈值检查评判）。
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, RouterError> {
        let order = self.provider_order();
        if order.is_empty() {
            return Err(RouterError::AllProvidersExhausted { category: "search" });
        }
        tracing::debug!(order = ?self.provider_names(), query, "search dispatch");
        for desc in order {
            let attempt = match desc.name {
                "duckduckgo" => self.duckduckgo(query, max_results).await,
                "tavily" => self.tavily(query, max_results).await,
                "serper" => self.serper(query, max_results).await,
                other => unreachable!("unknown search provider {other}"),
            };
            match attempt {
                Ok(hits) => {
                    self.quota.record(desc.name);
                    self.ledger.record(
                        desc.name,
                        ProviderCategory::Search.name(),
                        1,
                        desc.unit_cost,
                        json!({ "query": query, "results": hits.len() }),
                    );
                    tracing::debug!(provider = desc.name, query, results = hits.len(), "search ok");
                    return Ok(hits);
                }
                Err(err) => {
                    tracing::warn!(provider = desc.name, error = %err, "search provider failed, falling back");
                    self.quota.record_error(desc.name);
                }
            }
        }
        Err(RouterError::AllProvidersExhausted { category: "search" })
    }

    // ── duckduckgo (HTML endpoint, no key) ───────────────────────────────────

    async fn duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "duckduckgo";
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencode(query)
        );
        let resp = self
            .http
            .get(url)
            .timeout(SEARCH_CALL_TIMEOUT)
            .header("User-Agent", "Mozilla/5.0 (compatible; scoutbot)")
            .send()
            .await
            .map_err(|e| RouterError::from_reqwest(provider, SEARCH_CALL_TIMEOUT, e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::from_status(provider, status, &text));
        }
        let html = resp.text().await.map_err(|e| RouterError::Network {
            provider,
            message: e.to_string(),
        })?;
        Ok(parse_duckduckgo_html(&html, max_results))
    }

    // ── tavily ───────────────────────────────────────────────────────────────

    async fn tavily(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "tavily";
        let api_key = std::env::var("TAVILY_API_KEY").map_err(|_| RouterError::MissingKey {
            provider,
            env_var: "TAVILY_API_KEY",
        })?;
        let body = json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": false,
        });
        let resp = self
            .http
            .post("https://api.tavily.com/search")
            .timeout(SEARCH_CALL_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| RouterError::from_reqwest(provider, SEARCH_CALL_TIMEOUT, e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::from_status(provider, status, &text));
        }
        #[derive(Deserialize)]
        struct TavilyResponse {
            results: Vec<TavilyResult>,
        }
        #[derive(Deserialize)]
        struct TavilyResult {
            url: String,
            title: String,
            content: String,
            published_date: Option<String>,
        }
        let parsed: TavilyResponse = resp.json().await.map_err(|e| RouterError::Malformed {
            provider,
            message: e.to_string(),
        })?;
        Ok(parsed
            .results
            .into_iter()
            .take(max_results)
            .map(|r| {
                let mut hit = SearchHit::new(&r.url, &r.title, &r.content, provider);
                hit.published_at = r.published_date;
                hit
            })
            .collect())
    }

    // ── serper ───────────────────────────────────────────────────────────────

    async fn serper(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "serper";
        let api_key = std::env::var("SERPER_API_KEY").map_err(|_| RouterError::MissingKey {
            provider,
            env_var: "SERPER_API_KEY",
        })?;
        #[derive(Serialize)]
        struct SerperRequest<'a> {
            q: &'a str,
            num: usize,
        }
        let resp = self
            .http
            .post("https://google.serper.dev/search")
            .timeout(SEARCH_CALL_TIMEOUT)
            .header("X-API-KEY", api_key)
            .json(&SerperRequest {
                q: query,
                num: max_results,
            })
            .send()
            .await
            .map_err(|e| RouterError::from_reqwest(provider, SEARCH_CALL_TIMEOUT, e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::from_status(provider, status, &text));
        }
        #[derive(Deserialize)]
        struct SerperResponse {
            #[serde(default)]
            organic: Vec<SerperResult>,
        }
        #[derive(Deserialize)]
        struct SerperResult {
            link: String,
            title: String,
            #[serde(default)]
            snippet: String,
            date: Option<String>,
        }
        let parsed: SerperResponse = resp.json().await.map_err(|e| RouterError::Malformed {
            provider,
            message: e.to_string(),
        })?;
        Ok(parsed
            .organic
            .into_iter()
            .take(max_results)
            .map(|r| {
                let mut hit = SearchHit::new(&r.link, &r.title, &r.snippet, provider);
                hit.published_at = r.date;
                hit
            })
            .collect())
    }
}

/// DDG HTML 结果页解析。结构偶尔变动，解析不到就返回空让上层降级。
fn parse_duckduckgo_html(html: &str, max_results: usize) -> Vec<SearchHit> {
    let link_re = Regex::new(
        r#"(?s)<a[^>]+class="result__a"[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#,
    )
    .expect("static regex");
    let snippet_re =
        Regex::new(r#"(?s)<a[^>]+class="result__snippet"[^>]*>(.*?)</a>"#).expect("static regex");

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| strip_tags(&c[1]))
        .collect();

    link_re
        .captures_iter(html)
        .enumerate()
        .filter_map(|(i, c)| {
            let href = decode_ddg_redirect(&c[1])?;
            let title = strip_tags(&c[2]);
            let content = snippets.get(i).cloned().unwrap_or_default();
            Some(SearchHit::new(&href, &title, &content, "duckduckgo"))
        })
        .take(max_results)
        .collect()
}

/// DDG 结果链接是 `/l/?uddg=<urlencoded>` 跳转，取出真实 URL。
fn decode_ddg_redirect(href: &str) -> Option<String> {
    if let Some(pos) = href.find("uddg=") {
        let tail = &href[pos + 5..];
        let end = tail.find('&').unwrap_or(tail.len());
        return Some(urldecode(&tail[..end]));
    }
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    None
}

fn strip_tags(html: &str) -> String {
    let re = Regex::new(r"<[^>]+>").expect("static regex");
    let text = re.replace_all(html, "");
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                if let Ok(v) = u8::from_str_radix(hex, 16) {
                    out.push(v);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
