//! LLM 路由：多档位选择 + 配额/预算过滤 + 故障降级。
//!
//! 档位顺序 deepseek-v3 → claude-haiku → gpt-4o-mini → claude-sonnet →
//! gpt-4o（→ 本地 ollama）。每次调用按任务类型重排候选，逐个尝试；
//! 429 退避重试、响应损坏降温重试、鉴权失败本次运行内剔除。
//! 整条链打穿是唯一的致命错误。

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;

use crate::{
    errors::RouterError,
    providers::{
        ProviderCategory, Tier,
        cost::CostLedger,
        llm_anthropic,
        llm_openai::{self, ChatCall},
        quota::{QuotaStatus, QuotaTracker},
    },
    state::TokenUsage,
};

const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

// ── Descriptors ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum LlmWire {
    OpenAiCompatible {
        base_url_env: &'static str,
        default_base: &'static str,
    },
    Anthropic,
}

#[derive(Debug, Clone, Copy)]
pub struct LlmDescriptor {
    pub name: &'static str,
    pub model: &'static str,
    pub wire: LlmWire,
    pub key_env: Option<&'static str>,
    pub tier: Tier,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub free_tier_daily: Option<u64>,
    pub priority: u8,
    pub local_capable: bool,
    pub long_context: bool,
}

pub const LLM_PROVIDERS: &[LlmDescriptor] = &[
    LlmDescriptor {
        name: "deepseek-v3",
        model: "deepseek-chat",
        wire: LlmWire::OpenAiCompatible {
            base_url_env: "DEEPSEEK_BASE_URL",
            default_base: "https://api.deepseek.com/v1",
        },
        key_env: Some("DEEPSEEK_API_KEY"),
        tier: Tier::Cheap,
        input_cost_per_mtok: 0.27,
        output_cost_per_mtok: 1.10,
        free_tier_daily: None,
        priority: 1,
        local_capable: false,
        long_context: false,
    },
    LlmDescriptor {
        name: "claude-haiku",
        model: "claude-haiku-4-5",
        wire: LlmWire::Anthropic,
        key_env: Some("ANTHROPIC_API_KEY"),
        tier: Tier::Cheap,
        input_cost_per_mtok: 1.0,
        output_cost_per_mtok: 5.0,
        free_tier_daily: None,
        priority: 2,
        local_capable: false,
        long_context: false,
    },
    LlmDescriptor {
        name: "gpt-4o-mini",
        model: "gpt-4o-mini",
        wire: LlmWire::OpenAiCompatible {
            base_url_env: "OPENAI_BASE_URL",
            default_base: "https://api.openai.com/v1",
        },
        key_env: Some("OPENAI_API_KEY"),
        tier: Tier::Cheap,
        input_cost_per_mtok: 0.15,
        output_cost_per_mtok: 0.60,
        free_tier_daily: None,
        priority: 3,
        local_capable: false,
        long_context: false,
    },
    LlmDescriptor {
        name: "claude-sonnet",
        model: "claude-sonnet-4-5",
        wire: LlmWire::Anthropic,
        key_env: Some("ANTHROPIC_API_KEY"),
        tier: Tier::Premium,
        input_cost_per_mtok: 3.0,
        output_cost_per_mtok: 15.0,
        free_tier_daily: None,
        priority: 4,
        local_capable: false,
        long_context: true,
    },
    LlmDescriptor {
        name: "gpt-4o",
        model: "gpt-4o",
        wire: LlmWire::OpenAiCompatible {
            base_url_env: "OPENAI_BASE_URL",
            default_base: "https://api.openai.com/v1",
        },
        key_env: Some("OPENAI_API_KEY"),
        tier: Tier::Premium,
        input_cost_per_mtok: 2.5,
        output_cost_per_mtok: 10.0,
        free_tier_daily: None,
        priority: 5,
        local_capable: false,
        long_context: true,
    },
    LlmDescriptor {
        name: "ollama-local",
        model: "llama3.1",
        wire: LlmWire::OpenAiCompatible {
            base_url_env: "OLLAMA_BASE_URL",
            default_base: "http://localhost:11434/v1",
        },
        key_env: None,
        tier: Tier::Free,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
        free_tier_daily: None,
        priority: 6,
        local_capable: true,
        long_context: false,
    },
];

// ── Requests ──────────────────────────────────────────────────────────────────

/// 任务类型决定候选排序：简单抽取走便宜档，复杂推理走高档，
/// 敏感内容只允许本地 provider。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    SimpleExtract,
    Summary,
    ComplexReasoning,
    LongContext,
    Sensitive,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub task: TaskKind,
    /// 单次调用成本上限（USD）；超出的 provider 直接跳过。
    pub budget: Option<f64>,
    /// 记账用的调用方标签（agent 名）。
    pub caller: &'static str,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub provider: &'static str,
    pub tokens: TokenUsage,
    pub cost: f64,
}

// ── Router ────────────────────────────────────────────────────────────────────

pub struct LlmRouter {
    http: reqwest::Client,
    quota: Arc<QuotaTracker>,
    ledger: Arc<CostLedger>,
    preferred_model: String,
    per_call_budget: Option<f64>,
    /// 鉴权失败的 provider，本次运行内不再尝试。
    dropped: Mutex<BTreeSet<&'static str>>,
}

impl LlmRouter {
    pub fn new(
        http: reqwest::Client,
        quota: Arc<QuotaTracker>,
        ledger: Arc<CostLedger>,
        preferred_model: &str,
        per_call_budget: Option<f64>,
    ) -> Self {
        Self {
            http,
            quota,
            ledger,
            preferred_model: preferred_model.to_string(),
            per_call_budget,
            dropped: Mutex::new(BTreeSet::new()),
        }
    }

    /// 至少有一个 provider 可能可用（有 key，或本地端点已配置）。
    pub fn any_provider_configured() -> bool {
        LLM_PROVIDERS.iter().any(|d| match d.key_env {
            Some(env) => std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false),
            None => std::env::var("OLLAMA_BASE_URL").is_ok(),
        })
    }

    /// 当前会选择的候选链（dry-run 展示用）。
    pub fn candidate_names(&self, task: TaskKind) -> Vec<&'static str> {
        self.candidates(task).iter().map(|d| d.name).collect()
    }

    fn candidates(&self, task: TaskKind) -> Vec<&'static LlmDescriptor> {
        let dropped = self.dropped.lock().expect("llm dropped lock poisoned");
        let mut list: Vec<&'static LlmDescriptor> = LLM_PROVIDERS
            .iter()
            .filter(|d| !dropped.contains(d.name))
            .filter(|d| match task {
                TaskKind::Sensitive => d.local_capable,
                // 本地端点未配置时不参与常规任务。
                _ => d.key_env.is_some() || std::env::var("OLLAMA_BASE_URL").is_ok(),
            })
            .filter(|d| {
                matches!(
                    self.quota.status(d.name, d.free_tier_daily),
                    QuotaStatus::Ok | QuotaStatus::Low
                )
            })
            .collect();

        match task {
            TaskKind::ComplexReasoning => {
                list.sort_by_key(|d| (std::cmp::Reverse(d.tier), d.priority));
            }
            TaskKind::LongContext => {
                list.sort_by_key(|d| (std::cmp::Reverse(d.long_context), d.priority));
            }
            _ => list.sort_by_key(|d| d.priority),
        }
        // 用户指定的首选模型提到最前（若在候选中）。
        if let Some(pos) = list.iter().position(|d| d.name == self.preferred_model) {
            let preferred = list.remove(pos);
            list.insert(0, preferred);
        }
        list
    }

    fn estimated_cost(&self, d: &LlmDescriptor, req: &ChatRequest) -> f64 {
        let input_tokens = (req.prompt.len()
            + req.system.as_deref().map(str::len).unwrap_or(0)) as f64
            / 4.0;
        (input_tokens * d.input_cost_per_mtok
            + req.max_tokens as f64 * d.output_cost_per_mtok)
            / 1_000_000.0
    }

    /// 路由一次 chat 调用。返回 `AllProvidersExhausted` 表示整条链打穿。
    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, RouterError> {
        let budget = req.budget.or(self.per_call_budget);
        let candidates = self.candidates(req.task);
        if candidates.is_empty() {
            return Err(RouterError::AllProvidersExhausted { category: "llm" });
        }
        let affordable: Vec<_> = candidates
            .into_iter()
            .filter(|d| match budget {
                Some(b) => self.estimated_cost(d, req) <= b,
                None => true,
            })
            .collect();
        if affordable.is_empty() {
            return Err(RouterError::BudgetTooLow {
                budget: budget.unwrap_or(0.0),
            });
        }

        for desc in affordable {
            match self.try_provider(desc, req).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    tracing::warn!(
                        provider = err.provider().unwrap_or(desc.name),
                        error = %err,
                        "llm provider failed, falling back"
                    );
                    self.quota.record_error(desc.name);
                    if matches!(err, RouterError::AuthFailed { .. }) {
                        self.dropped
                            .lock()
                            .expect("llm dropped lock poisoned")
                            .insert(desc.name);
                    }
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                }
            }
        }
        Err(RouterError::AllProvidersExhausted { category: "llm" })
    }

    async fn try_provider(
        &self,
        desc: &'static LlmDescriptor,
        req: &ChatRequest,
    ) -> Result<ChatOutcome, RouterError> {
        let mut temperature = req.temperature;
        let mut attempts = 0u8;
        loop {
            attempts += 1;
            match self.call_once(desc, req, temperature).await {
                Ok(outcome) => return Ok(outcome),
                // 429：退避后同 provider 重试一次。
                Err(RouterError::RateLimited { .. }) if attempts == 1 => {
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                }
                // 输出损坏：降温重试一次。
                Err(RouterError::Malformed { .. }) if attempts == 1 => {
                    temperature = (temperature * 0.5).min(0.3);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(
        &self,
        desc: &'static LlmDescriptor,
        req: &ChatRequest,
        temperature: f32,
    ) -> Result<ChatOutcome, RouterError> {
        let call = ChatCall {
            model: desc.model,
            system: req.system.as_deref(),
            prompt: &req.prompt,
            max_tokens: req.max_tokens,
            temperature,
        };
        let (text, tokens) = match desc.wire {
            LlmWire::OpenAiCompatible {
                base_url_env,
                default_base,
            } => {
                let base_url = std::env::var(base_url_env)
                    .unwrap_or_else(|_| default_base.to_string());
                let api_key = match desc.key_env {
                    Some(env) => Some(std::env::var(env).map_err(|_| {
                        RouterError::MissingKey {
                            provider: desc.name,
                            env_var: env,
                        }
                    })?),
                    None => None,
                };
                llm_openai::chat(
                    &self.http,
                    &base_url,
                    api_key.as_deref(),
                    &call,
                    desc.name,
                    LLM_CALL_TIMEOUT,
                )
                .await?
            }
            LlmWire::Anthropic => {
                let env = desc.key_env.expect("anthropic descriptor requires key_env");
                let api_key = std::env::var(env).map_err(|_| RouterError::MissingKey {
                    provider: desc.name,
                    env_var: env,
                })?;
                let base_url = std::env::var("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
                llm_anthropic::chat(
                    &self.http,
                    &base_url,
                    &api_key,
                    &call,
                    desc.name,
                    LLM_CALL_TIMEOUT,
                )
                .await?
            }
        };

        let cost = (tokens.input as f64 * desc.input_cost_per_mtok
            + tokens.output as f64 * desc.output_cost_per_mtok)
            / 1_000_000.0;
        self.quota.record(desc.name);
        self.ledger.record(
            desc.name,
            ProviderCategory::Llm.name(),
            tokens.total(),
            cost,
            json!({ "agent": req.caller, "model": desc.model }),
        );
        tracing::debug!(
            provider = desc.name,
            input = tokens.input,
            output = tokens.output,
            cost,
            "llm call ok"
        );
        Ok(ChatOutcome {
            text,
            provider: desc.name,
            tokens,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with(preferred: &str) -> (tempfile::TempDir, LlmRouter) {
        let dir = tempfile::tempdir().unwrap();
        let quota = Arc::new(QuotaTracker::load(dir.path().join("quota.json")));
        let ledger = Arc::new(CostLedger::load(dir.path().join("costs.json"), 5.0, 50.0));
        let router = LlmRouter::new(reqwest::Client::new(), quota, ledger, preferred, None);
        (dir, router)
    }

    fn req(task: TaskKind) -> ChatRequest {
        ChatRequest {
            system: None,
            prompt: "p".repeat(400),
            max_tokens: 1000,
            temperature: 0.7,
            task,
            budget: None,
            caller: "test",
        }
    }

    #[test]
    fn default_order_is_cheap_first() {
        let (_dir, r) = router_with("deepseek-v3");
        let names = r.candidate_names(TaskKind::SimpleExtract);
        let ds = names.iter().position(|n| *n == "deepseek-v3").unwrap();
        let sonnet = names.iter().position(|n| *n == "claude-sonnet").unwrap();
        assert!(ds < sonnet);
    }

    #[test]
    fn complex_reasoning_prefers_premium_tier() {
        let (_dir, r) = router_with("nonexistent-model");
        let names = r.candidate_names(TaskKind::ComplexReasoning);
        let sonnet = names.iter().position(|n| *n == "claude-sonnet").unwrap();
        let mini = names.iter().position(|n| *n == "gpt-4o-mini").unwrap();
        assert!(sonnet < mini);
    }

    #[test]
    fn sensitive_routes_only_to_local_capable() {
        let (_dir, r) = router_with("deepseek-v3");
        let names = r.candidate_names(TaskKind::Sensitive);
        assert_eq!(names, vec!["ollama-local"]);
    }

    #[test]
    fn preferred_model_is_promoted_to_front() {
        let (_dir, r) = router_with("claude-sonnet");
        let names = r.candidate_names(TaskKind::Summary);
        assert_eq!(names[0], "claude-sonnet");
    }

    #[test]
    fn budget_filter_estimates_cost() {
        let (_dir, r) = router_with("deepseek-v3");
        let d = &LLM_PROVIDERS[3]; // claude-sonnet
        let estimate = r.estimated_cost(d, &req(TaskKind::Summary));
        // 100 input tokens * 3/M + 1000 output * 15/M ≈ 0.0153
        assert!(estimate > 0.01 && estimate < 0.02, "estimate {estimate}");
    }

    #[tokio::test]
    async fn tiny_budget_excludes_every_provider() {
        let (_dir, r) = router_with("deepseek-v3");
        let mut request = req(TaskKind::Summary);
        request.budget = Some(1e-9);
        match r.chat(&request).await {
            Err(RouterError::BudgetTooLow { .. }) => {}
            other => panic!("expected BudgetTooLow, got {other:?}"),
        }
    }
}
