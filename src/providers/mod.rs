//! Provider 路由层。
//!
//! 进程内一套单例：LLM / 搜索 / 新闻 / 金融四个 router 共享一个
//! HTTP client、一个配额计数器和一个成本账本。显式 `init` / `shutdown`，
//! 不搞模块加载副作用；shutdown 负责把账本与配额落盘。

pub mod cost;
pub mod financial;
pub mod llm;
pub mod llm_anthropic;
pub mod llm_openai;
pub mod news;
pub mod quota;
pub mod search;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use crate::config::ResearchConfig;

use self::{
    cost::CostLedger, financial::FinancialRouter, llm::LlmRouter, news::NewsRouter,
    quota::QuotaTracker, search::SearchRouter,
};

/// 成本/延迟档位，fallback 排序的一部分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Free,
    Cheap,
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCategory {
    Llm,
    Search,
    News,
    Financial,
}

impl ProviderCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Search => "search",
            Self::News => "news",
            Self::Financial => "financial",
        }
    }
}

pub struct ProviderRouter {
    pub llm: LlmRouter,
    pub search: SearchRouter,
    pub news: NewsRouter,
    pub financial: FinancialRouter,
    pub quota: Arc<QuotaTracker>,
    pub ledger: Arc<CostLedger>,
}

static ROUTER: Mutex<Option<Arc<ProviderRouter>>> = Mutex::new(None);

/// 构建共享 HTTP client：支持代理与全局超时环境变量。
pub fn build_http_client() -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let Ok(proxy_url) = std::env::var("HTTP_PROXY") {
        builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
    }

    if let Ok(ms) = std::env::var("API_TIMEOUT_MS")
        && let Ok(ms) = ms.parse::<u64>()
    {
        builder = builder
            .timeout(std::time::Duration::from_millis(ms))
            .connect_timeout(std::time::Duration::from_secs(10));
    }

    builder.build().map_err(Into::into)
}

/// 初始化进程级单例。重复调用返回既有实例。
pub fn init(config: &ResearchConfig) -> Result<Arc<ProviderRouter>> {
    let mut guard = ROUTER.lock().expect("router lock poisoned");
    if let Some(router) = guard.as_ref() {
        return Ok(router.clone());
    }

    let http = build_http_client().context("failed to build HTTP client")?;
    let quota = Arc::new(QuotaTracker::load(config.data_dir.join("quota.json")));
    let ledger = Arc::new(CostLedger::load(
        config.data_dir.join("costs.json"),
        config.daily_budget,
        config.monthly_budget,
    ));

    let router = Arc::new(ProviderRouter {
        llm: LlmRouter::new(
            http.clone(),
            quota.clone(),
            ledger.clone(),
            &config.llm_model,
            config.per_call_budget,
        ),
        search: SearchRouter::new(
            http.clone(),
            quota.clone(),
            ledger.clone(),
            config.search_strategy,
        ),
        news: NewsRouter::new(http.clone(), quota.clone(), ledger.clone()),
        financial: FinancialRouter::new(http, quota.clone(), ledger.clone()),
        quota,
        ledger,
    });
    *guard = Some(router.clone());
    tracing::info!("provider router initialised");
    Ok(router)
}

/// 取当前单例；未初始化是调用方的 bug。
pub fn get() -> Result<Arc<ProviderRouter>> {
    ROUTER
        .lock()
        .expect("router lock poisoned")
        .clone()
        .ok_or_else(|| anyhow!("provider router not initialised"))
}

/// 关停：落盘账本与配额，释放单例（连接随 client drop 关闭）。
pub fn shutdown() {
    let mut guard = ROUTER.lock().expect("router lock poisoned");
    if let Some(router) = guard.take() {
        router.ledger.flush();
        router.quota.flush();
        for desc in llm::LLM_PROVIDERS {
            let check = router.quota.check_quota(desc.name, desc.free_tier_daily);
            tracing::debug!(
                provider = desc.name,
                status = ?check.status,
                usage_percent = check.usage_percent,
                remaining = ?check.remaining,
                "quota at shutdown"
            );
        }
        tracing::info!(spent_today = router.ledger.spent_today(), "provider router shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_matches_cost() {
        assert!(Tier::Free < Tier::Cheap);
        assert!(Tier::Cheap < Tier::Standard);
        assert!(Tier::Standard < Tier::Premium);
    }

    #[test]
    fn get_before_init_is_an_error() {
        // 单例是进程级的，其它测试可能已经 init 过；只在未初始化时断言。
        if ROUTER.lock().unwrap().is_none() {
            assert!(get().is_err());
        }
    }
}
