use std::time::Duration;

use thiserror::Error;

/// 路由层错误分类。每一类对应一种恢复策略：
/// 降级到下一个 provider、退避重试、或本次运行内剔除该 provider。
/// 只有 `AllProvidersExhausted`（LLM 类别）会升级为致命错误。
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("{provider}: free-tier quota exhausted")]
    QuotaExhausted { provider: &'static str },

    #[error("{provider}: rate limited")]
    RateLimited { provider: &'static str },

    #[error("{provider}: authentication failed")]
    AuthFailed { provider: &'static str },

    #[error("{provider}: network error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: timed out after {elapsed:?}")]
    Timeout {
        provider: &'static str,
        elapsed: Duration,
    },

    /// 响应格式不符合预期（空 content、JSON 解析失败等）。
    /// 同 provider 降温重试一次，仍失败则降级。
    #[error("{provider}: malformed response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: API key not set ({env_var})")]
    MissingKey {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("all {category} providers exhausted")]
    AllProvidersExhausted { category: &'static str },

    #[error("per-call budget {budget:.4} USD excludes every eligible provider")]
    BudgetTooLow { budget: f64 },
}

impl RouterError {
    /// 该错误是否允许继续尝试链中的下一个 provider。
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::AllProvidersExhausted { .. } | Self::BudgetTooLow { .. }
        )
    }

    pub fn provider(&self) -> Option<&'static str> {
        match self {
            Self::QuotaExhausted { provider }
            | Self::RateLimited { provider }
            | Self::AuthFailed { provider }
            | Self::Network { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Malformed { provider, .. }
            | Self::MissingKey { provider, .. } => Some(provider),
            Self::AllProvidersExhausted { .. } | Self::BudgetTooLow { .. } => None,
        }
    }

    /// Map an HTTP status to the matching error kind.
    pub fn from_status(provider: &'static str, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::AuthFailed { provider },
            402 => Self::QuotaExhausted { provider },
            429 => Self::RateLimited { provider },
            _ => Self::Network {
                provider,
                message: format!("HTTP {status}: {}", truncate(body, 200)),
            },
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(provider: &'static str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                provider,
                elapsed: timeout,
            }
        } else {
            Self::Network {
                provider,
                message: err.to_string(),
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
