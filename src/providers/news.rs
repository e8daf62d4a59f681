//! 新闻路由：google-rss（免费）→ gnews → newsapi → mediastack。
//!
//! 结果按 `(query, category, 当天日期)` 缓存 30 分钟，新闻类请求
//! 在一次批量运行里高度重复，缓存显著省配额。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Local;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::{
    errors::RouterError,
    providers::{ProviderCategory, cost::CostLedger, quota::{QuotaStatus, QuotaTracker}, search::urlencode},
    state::SearchHit,
};

const NEWS_CALL_TIMEOUT: Duration = Duration::from_secs(20);
const NEWS_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_NEWS_RESULTS: usize = 10;

#[derive(Debug, Clone, Copy)]
struct NewsDescriptor {
    name: &'static str,
    key_env: Option<&'static str>,
    unit_cost: f64,
    free_tier_daily: Option<u64>,
}

const NEWS_PROVIDERS: &[NewsDescriptor] = &[
    NewsDescriptor {
        name: "google-rss",
        key_env: None,
        unit_cost: 0.0,
        free_tier_daily: None,
    },
    NewsDescriptor {
        name: "gnews",
        key_env: Some("GNEWS_API_KEY"),
        unit_cost: 0.0,
        free_tier_daily: Some(100),
    },
    NewsDescriptor {
        name: "newsapi",
        key_env: Some("NEWSAPI_API_KEY"),
        unit_cost: 0.0,
        free_tier_daily: Some(100),
    },
    NewsDescriptor {
        name: "mediastack",
        key_env: Some("MEDIASTACK_API_KEY"),
        unit_cost: 0.0,
        free_tier_daily: Some(16),
    },
];

type CacheKey = (String, String, String);

pub struct NewsRouter {
    http: reqwest::Client,
    quota: Arc<QuotaTracker>,
    ledger: Arc<CostLedger>,
    cache: Mutex<HashMap<CacheKey, (Instant, Vec<SearchHit>)>>,
}

impl NewsRouter {
    pub fn new(http: reqwest::Client, quota: Arc<QuotaTracker>, ledger: Arc<CostLedger>) -> Self {
        Self {
            http,
            quota,
            ledger,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 查询某公司/主题的新闻。`category` 形如 "business" / "sentiment"，
    /// 只参与缓存键与记账，provider 侧统一全文检索。
    pub async fn news(&self, query: &str, category: &str) -> Result<Vec<SearchHit>, RouterError> {
        let key = (
            query.to_string(),
            category.to_string(),
            Local::now().format("%Y-%m-%d").to_string(),
        );
        if let Some(hits) = self.cached(&key) {
            tracing::debug!(query, category, "news cache hit");
            return Ok(hits);
        }

        let eligible: Vec<&'static NewsDescriptor> = NEWS_PROVIDERS
            .iter()
            .filter(|d| match d.key_env {
                Some(env) => std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false),
                None => true,
            })
            .filter(|d| {
                matches!(
                    self.quota.status(d.name, d.free_tier_daily),
                    QuotaStatus::Ok | QuotaStatus::Low
                )
            })
            .collect();
        if eligible.is_empty() {
            return Err(RouterError::AllProvidersExhausted { category: "news" });
        }

        for desc in eligible {
            let attempt = match desc.name {
                "google-rss" => self.google_rss(query).await,
                "gnews" => self.gnews(query).await,
                "newsapi" => self.newsapi(query).await,
                "mediastack" => self.mediastack(query).await,
                other => unreachable!("unknown news provider {other}"),
            };
            match attempt {
                Ok(hits) => {
                    self.quota.record(desc.name);
                    self.ledger.record(
                        desc.name,
                        ProviderCategory::News.name(),
                        1,
                        desc.unit_cost,
                        json!({ "query": query, "category": category, "results": hits.len() }),
                    );
                    self.cache
                        .lock()
                        .expect("news cache lock poisoned")
                        .insert(key, (Instant::now(), hits.clone()));
                    return Ok(hits);
                }
                Err(err) => {
                    tracing::warn!(provider = desc.name, error = %err, "news provider failed, falling back");
                    self.quota.record_error(desc.name);
                }
            }
        }
        Err(RouterError::AllProvidersExhausted { category: "news" })
    }

    fn cached(&self, key: &CacheKey) -> Option<Vec<SearchHit>> {
        let mut cache = self.cache.lock().expect("news cache lock poisoned");
        if let Some((at, hits)) = cache.get(key) {
            if at.elapsed() < NEWS_CACHE_TTL {
                return Some(hits.clone());
            }
            cache.remove(key);
        }
        None
    }

    // ── google news rss (no key) ─────────────────────────────────────────────

    async fn google_rss(&self, query: &str) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "google-rss";
        let url = format!(
            "https://news.google.com/rss/search?q={}&hl=en-US&gl=US&ceid=US:en",
            urlencode(query)
        );
        let resp = self
            .http
            .get(url)
            .timeout(NEWS_CALL_TIMEOUT)
            .send()
            .await
            .map_err(|e| RouterError::from_reqwest(provider, NEWS_CALL_TIMEOUT, e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::from_status(provider, status, &text));
        }
        let xml = resp.text().await.map_err(|e| RouterError::Network {
            provider,
            message: e.to_string(),
        })?;
        Ok(parse_rss_items(&xml, MAX_NEWS_RESULTS))
    }

    // ── keyed providers ──────────────────────────────────────────────────────

    async fn gnews(&self, query: &str) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "gnews";
        let key = require_key(provider, "GNEWS_API_KEY")?;
        let url = format!(
            "https://gnews.io/api/v4/search?q={}&lang=en&max={MAX_NEWS_RESULTS}&apikey={key}",
            urlencode(query)
        );
        #[derive(Deserialize)]
        struct GnewsResponse {
            #[serde(default)]
            articles: Vec<GnewsArticle>,
        }
        #[derive(Deserialize)]
        struct GnewsArticle {
            title: String,
            #[serde(default)]
            description: String,
            url: String,
            #[serde(rename = "publishedAt")]
            published_at: Option<String>,
        }
        let parsed: GnewsResponse = self.get_json(provider, &url).await?;
        Ok(parsed
            .articles
            .into_iter()
            .map(|a| {
                let mut hit = SearchHit::new(&a.url, &a.title, &a.description, provider);
                hit.published_at = a.published_at;
                hit
            })
            .collect())
    }

    async fn newsapi(&self, query: &str) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "newsapi";
        let key = require_key(provider, "NEWSAPI_API_KEY")?;
        let url = format!(
            "https://newsapi.org/v2/everything?q={}&pageSize={MAX_NEWS_RESULTS}&apiKey={key}",
            urlencode(query)
        );
        #[derive(Deserialize)]
        struct NewsApiResponse {
            #[serde(default)]
            articles: Vec<NewsApiArticle>,
        }
        #[derive(Deserialize)]
        struct NewsApiArticle {
            title: String,
            #[serde(default)]
            description: Option<String>,
            url: String,
            #[serde(rename = "publishedAt")]
            published_at: Option<String>,
        }
        let parsed: NewsApiResponse = self.get_json(provider, &url).await?;
        Ok(parsed
            .articles
            .into_iter()
            .map(|a| {
                let mut hit = SearchHit::new(
                    &a.url,
                    &a.title,
                    a.description.as_deref().unwrap_or(""),
                    provider,
                );
                hit.published_at = a.published_at;
                hit
            })
            .collect())
    }

    async fn mediastack(&self, query: &str) -> Result<Vec<SearchHit>, RouterError> {
        let provider = "mediastack";
        let key = require_key(provider, "MEDIASTACK_API_KEY")?;
        let url = format!(
            "http://api.mediastack.com/v1/news?access_key={key}&keywords={}&limit={MAX_NEWS_RESULTS}",
            urlencode(query)
        );
        #[derive(Deserialize)]
        struct MediastackResponse {
            #[serde(default)]
            data: Vec<MediastackArticle>,
        }
        #[derive(Deserialize)]
        struct MediastackArticle {
            title: String,
            #[serde(default)]
            description: Option<String>,
            url: String,
            published_at: Option<String>,
        }
        let parsed: MediastackResponse = self.get_json(provider, &url).await?;
        Ok(parsed
            .data
            .into_iter()
            .map(|a| {
                let mut hit = SearchHit::new(
                    &a.url,
                    &a.title,
                    a.description.as_deref().unwrap_or(""),
                    provider,
                );
                hit.published_at = a.published_at;
                hit
            })
            .collect())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        provider: &'static str,
        url: &str,
    ) -> Result<T, RouterError> {
        let resp = self
            .http
            .get(url)
            .timeout(NEWS_CALL_TIMEOUT)
            .send()
            .await
            .map_err(|e| RouterError::from_reqwest(provider, NEWS_CALL_TIMEOUT, e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RouterError::from_status(provider, status, &text));
        }
        resp.json().await.map_err(|e| RouterError::Malformed {
            provider,
            message: e.to_string(),
        })
    }
}

fn require_key(provider: &'static str, env_var: &'static str) -> Result<String, RouterError> {
    std::env::var(env_var).map_err(|_| RouterError::MissingKey { provider, env_var })
}

/// 宽松的 RSS `<item>` 解析：只取 title / link / pubDate / description。
fn parse_rss_items(xml: &str, max: usize) -> Vec<SearchHit> {
    let item_re = Regex::new(r"(?s)<item>(.*?)</item>").expect("static regex");
    let field = |body: &str, tag: &str| -> Option<String> {
        let re = Regex::new(&format!(r"(?s)<{tag}[^>]*>(.*?)</{tag}>")).expect("static regex");
        re.captures(body).map(|c| {
            let raw = c[1].trim();
            let raw = raw
                .trim_start_matches("<![CDATA[")
                .trim_end_matches("]]>")
                .trim();
            unescape_xml(raw)
        })
    };

    item_re
        .captures_iter(xml)
        .filter_map(|c| {
            let body = &c[1];
            let link = field(body, "link")?;
            let title = field(body, "title").unwrap_or_default();
            let description = field(body, "description").unwrap_or_default();
            let mut hit = SearchHit::new(&link, &title, &strip_html(&description), "google-rss");
            hit.published_at = field(body, "pubDate");
            Some(hit)
        })
        .take(max)
        .collect()
}

fn strip_html(s: &str) -> String {
    let re = Regex::new(r"<[^>]+>").expect("static regex");
    re.replace_all(s, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn unescape_xml(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss><channel>
<item>
  <title><![CDATA[Acme posts record revenue]]></title>
  <link>https://news.example/acme-revenue</link>
  <pubDate>Mon, 13 Jan 2025 09:00:00 GMT</pubDate>
  <description>Acme Corp reported &lt;b&gt;$2.1B&lt;/b&gt; revenue &amp; growth.</description>
</item>
<item>
  <title>Acme expands to Brazil</title>
  <link>https://news.example/acme-brazil</link>
</item>
</channel></rss>"#;

    #[test]
    fn rss_items_parse_title_link_and_date() {
        let hits = parse_rss_items(RSS_SAMPLE, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Acme posts record revenue");
        assert_eq!(hits[0].url, "https://news.example/acme-revenue");
        assert_eq!(
            hits[0].published_at.as_deref(),
            Some("Mon, 13 Jan 2025 09:00:00 GMT")
        );
        assert_eq!(hits[0].content, "Acme Corp reported $2.1B revenue & growth.");
        assert!(hits[1].published_at.is_none());
    }

    #[test]
    fn rss_parser_tolerates_non_xml() {
        assert!(parse_rss_items("plain text", 5).is_empty());
    }

    #[tokio::test]
    async fn cache_returns_same_hits_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let quota = Arc::new(QuotaTracker::load(dir.path().join("q.json")));
        let ledger = Arc::new(CostLedger::load(dir.path().join("c.json"), 5.0, 50.0));
        let router = NewsRouter::new(reqwest::Client::new(), quota, ledger);
        let key = (
            "acme".to_string(),
            "business".to_string(),
            Local::now().format("%Y-%m-%d").to_string(),
        );
        let hits = vec![SearchHit::new("https://a.example/n", "t", "c", "google-rss")];
        router
            .cache
            .lock()
            .unwrap()
            .insert(key.clone(), (Instant::now(), hits.clone()));
        assert_eq!(router.cached(&key), Some(hits));
    }
}
