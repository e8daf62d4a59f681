//! 金融数据路由：Yahoo Finance（ticker 解析 + 行情）与 SEC EDGAR（申报文件）。
//!
//! 两边都是免费公共端点，失败只降级不报错：`gather` 尽力而为，
//! 拿到多少算多少，细节问题丢给 tracing。ticker/CIK 解析结果按公司名
//! 进程内缓存，批量跑同一公司不重复打点。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    errors::RouterError,
    providers::{ProviderCategory, cost::CostLedger, quota::QuotaTracker},
};

const FINANCIAL_CALL_TIMEOUT: Duration = Duration::from_secs(20);
const SEC_USER_AGENT: &str = "scoutbot research (contact@scoutbot.dev)";
const MAX_SEC_FILINGS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerInfo {
    pub symbol: String,
    pub exchange: Option<String>,
    pub long_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Quote {
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub market_cap: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecFiling {
    pub form: String,
    pub filed_at: String,
    pub accession: String,
    pub url: String,
}

/// `gather` 的汇总结果：缺什么就是 `None`/空集。
#[derive(Debug, Clone, Default, Serialize)]
pub struct FinancialSnapshot {
    pub ticker: Option<TickerInfo>,
    pub quote: Option<Quote>,
    pub filings: Vec<SecFiling>,
    pub source_urls: Vec<String>,
}

impl FinancialSnapshot {
    pub fn is_empty(&self) -> bool {
        self.ticker.is_none() && self.quote.is_none() && self.filings.is_empty()
    }
}

pub struct FinancialRouter {
    http: reqwest::Client,
    quota: Arc<QuotaTracker>,
    ledger: Arc<CostLedger>,
    ticker_cache: Mutex<HashMap<String, Option<TickerInfo>>>,
}

impl FinancialRouter {
    pub fn new(http: reqwest::Client, quota: Arc<QuotaTracker>, ledger: Arc<CostLedger>) -> Self {
        Self {
            http,
            quota,
            ledger,
            ticker_cache: Mutex::new(HashMap::new()),
        }
    }

    /// 尽力收集一家公司的行情与申报数据。
    pub async fn gather(&self, company: &str) -> FinancialSnapshot {
        let mut snapshot = FinancialSnapshot::default();
        let ticker = match self.lookup_ticker(company).await {
            Ok(t) => t,
            Err(err) => {
                tracing::debug!(company, error = %err, "ticker lookup failed");
                None
            }
        };
        let Some(ticker) = ticker else {
            return snapshot;
        };

        match self.quote(&ticker.symbol).await {
            Ok(quote) => {
                snapshot
                    .source_urls
                    .push(format!("https://finance.yahoo.com/quote/{}", ticker.symbol));
                snapshot.quote = Some(quote);
            }
            Err(err) => tracing::debug!(symbol = %ticker.symbol, error = %err, "quote failed"),
        }
        match self.sec_filings(&ticker.symbol).await {
            Ok(filings) => {
                snapshot
                    .source_urls
                    .extend(filings.iter().map(|f| f.url.clone()));
                snapshot.filings = filings;
            }
            Err(err) => tracing::debug!(symbol = %ticker.symbol, error = %err, "sec lookup failed"),
        }
        snapshot.ticker = Some(ticker);
        snapshot
    }

    /// 公司名 → ticker。找不到返回 `Ok(None)`，网络问题才是 `Err`。
    pub async fn lookup_ticker(&self, company: &str) -> Result<Option<TickerInfo>, RouterError> {
        let cache_key = company.to_lowercase();
        if let Some(cached) = self
            .ticker_cache
            .lock()
            .expect("ticker cache lock poisoned")
            .get(&cache_key)
        {
            return Ok(cached.clone());
        }

        let provider = "yahoo-finance";
        let url = format!(
            "https://query2.finance.yahoo.com/v1/finance/search?q={}&quotesCount=3&newsCount=0",
            super::search::urlencode(company)
        );
        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default)]
            quotes: Vec<SearchQuote>,
        }
        #[derive(Deserialize)]
        struct SearchQuote {
            symbol: Option<String>,
            exchange: Option<String>,
            #[serde(rename = "longname")]
            long_name: Option<String>,
            #[serde(rename = "quoteType")]
            quote_type: Option<String>,
        }
        let parsed: SearchResponse = self.get_json(provider, &url, false).await?;
        let info = parsed
            .quotes
            .into_iter()
            .find(|q| {
                q.symbol.is_some()
                    && q.quote_type.as_deref().map(|t| t == "EQUITY").unwrap_or(true)
            })
            .map(|q| TickerInfo {
                symbol: q.symbol.expect("filtered on symbol presence"),
                exchange: q.exchange,
                long_name: q.long_name,
            });

        self.quota.record(provider);
        self.ledger.record(
            provider,
            ProviderCategory::Financial.name(),
            1,
            0.0,
            json!({ "op": "ticker_lookup", "company": company }),
        );
        self.ticker_cache
            .lock()
            .expect("ticker cache lock poisoned")
            .insert(cache_key, info.clone());
        Ok(info)
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote, RouterError> {
        let provider = "yahoo-finance";
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?range=1y&interval=3mo",
            super::search::urlencode(symbol)
        );
        #[derive(Deserialize)]
        struct ChartResponse {
            chart: Chart,
        }
        #[derive(Deserialize)]
        struct Chart {
            #[serde(default)]
            result: Vec<ChartResult>,
        }
        #[derive(Deserialize)]
        struct ChartResult {
            meta: ChartMeta,
        }
        #[derive(Deserialize)]
        struct ChartMeta {
            #[serde(rename = "regularMarketPrice")]
            price: Option<f64>,
            currency: Option<String>,
            #[serde(rename = "fiftyTwoWeekHigh")]
            high: Option<f64>,
            #[serde(rename = "fiftyTwoWeekLow")]
            low: Option<f64>,
        }
        let parsed: ChartResponse = self.get_json(provider, &url, false).await?;
        let meta = parsed
            .chart
            .result
            .into_iter()
            .next()
            .map(|r| r.meta)
            .ok_or_else(|| RouterError::Malformed {
                provider,
                message: "empty chart result".to_string(),
            })?;
        self.quota.record(provider);
        self.ledger.record(
            provider,
            ProviderCategory::Financial.name(),
            1,
            0.0,
            json!({ "op": "quote", "symbol": symbol }),
        );
        Ok(Quote {
            price: meta.price,
            currency: meta.currency,
            market_cap: None,
            fifty_two_week_high: meta.high,
            fifty_two_week_low: meta.low,
        })
    }

    /// SEC EDGAR：ticker → CIK → 最近申报（10-K / 10-Q / 8-K 优先）。
    pub async fn sec_filings(&self, symbol: &str) -> Result<Vec<SecFiling>, RouterError> {
        let provider = "sec-edgar";
        let tickers: serde_json::Value = self
            .get_json(
                provider,
                "https://www.sec.gov/files/company_tickers.json",
                true,
            )
            .await?;
        let symbol_upper = symbol.to_uppercase();
        let cik = tickers
            .as_object()
            .and_then(|map| {
                map.values().find(|entry| {
                    entry.get("ticker").and_then(|t| t.as_str()) == Some(symbol_upper.as_str())
                })
            })
            .and_then(|entry| entry.get("cik_str").and_then(|c| c.as_u64()));
        let Some(cik) = cik else {
            return Ok(Vec::new());
        };

        let url = format!("https://data.sec.gov/submissions/CIK{cik:010}.json");
        #[derive(Deserialize)]
        struct Submissions {
            filings: SubmissionFilings,
        }
        #[derive(Deserialize)]
        struct SubmissionFilings {
            recent: RecentFilings,
        }
        #[derive(Deserialize)]
        struct RecentFilings {
            #[serde(default, rename = "form")]
            forms: Vec<String>,
            #[serde(default, rename = "filingDate")]
            dates: Vec<String>,
            #[serde(default, rename = "accessionNumber")]
            accessions: Vec<String>,
        }
        let parsed: Submissions = self.get_json(provider, &url, true).await?;
        let recent = parsed.filings.recent;
        let mut filings: Vec<SecFiling> = recent
            .forms
            .iter()
            .zip(recent.dates.iter())
            .zip(recent.accessions.iter())
            .filter(|((form, _), _)| matches!(form.as_str(), "10-K" | "10-Q" | "8-K" | "20-F"))
            .take(MAX_SEC_FILINGS)
            .map(|((form, date), accession)| SecFiling {
                form: form.clone(),
                filed_at: date.clone(),
                accession: accession.clone(),
                url: format!(
                    "https://www.sec.gov/cgi-bin/browse-edgar?action=getcompany&CIK={cik:010}&type={form}"
                ),
            })
            .collect();
        filings.dedup_by(|a, b| a.form == b.form && a.filed_at == b.filed_at);

        self.quota.record(provider);
        self.ledger.record(
            provider,
            ProviderCategory::Financial.name(),
            1,
            0.0,
            json!({ "op": "sec_filings", "symbol": symbol, "cik": cik }),
        );
        Ok(filings)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        provider: &'static str,
        url: &str,
        sec_headers: bool,
    ) -> Result<T, RouterError> {
        let mut request = self.http.get(url).timeout(FINANCIAL_CALL_TIMEOUT);
        if sec_headers {
            // SEC 要求显式 UA，匿名请求会被 403。
            request = request.header("User-Agent", SEC_USER_AGENT);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| RouterError::from_reqwest(provider, FINANCIAL_CALL_TIMEOUT, e))?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_emptiness() {
        let empty = FinancialSnapshot::default();
        assert!(empty.is_empty());
        let with_ticker = FinancialSnapshot {
            ticker: Some(TickerInfo {
                symbol: "ACME".to_string(),
                exchange: None,
                long_name: None,
            }),
            ..FinancialSnapshot::default()
        };
        assert!(!with_ticker.is_empty());
    }

    #[tokio::test]
    async fn ticker_cache_short_circuits_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let quota = Arc::new(QuotaTracker::load(dir.path().join("q.json")));
        let ledger = Arc::new(CostLedger::load(dir.path().join("c.json"), 5.0, 50.0));
        let router = FinancialRouter::new(reqwest::Client::new(), quota, ledger);
        let info = TickerInfo {
            symbol: "MSFT".to_string(),
            exchange: Some("NMS".to_string()),
            long_name: Some("Microsoft Corporation".to_string()),
        };
        router
            .ticker_cache
            .lock()
            .unwrap()
            .insert("microsoft".to_string(), Some(info.clone()));
        // 命中缓存，不发任何网络请求。
        let resolved = router.lookup_ticker("Microsoft").await.unwrap();
        assert_eq!(resolved, Some(info));
    }
}
