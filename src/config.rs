use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

// ── Defaults ──────────────────────────────────────────────────────────────────

const DEFAULT_NUM_SEARCH_QUERIES: usize = 5;
const DEFAULT_MAX_SEARCH_RESULTS: usize = 10;
const DEFAULT_QUALITY_THRESHOLD: f64 = 70.0;
const DEFAULT_MAX_ITERATIONS: u32 = 2;
const DEFAULT_MAX_WORKERS: usize = 5;
const DEFAULT_TIMEOUT_PER_COMPANY_SECS: u64 = 300;
const DEFAULT_NODE_TIMEOUT_SECS: u64 = 90;
const DEFAULT_LLM_MAX_TOKENS: u32 = 4096;
const DEFAULT_LLM_TEMPERATURE: f32 = 0.7;
const DEFAULT_DAILY_BUDGET_USD: f64 = 5.0;
const DEFAULT_MONTHLY_BUDGET_USD: f64 = 50.0;

/// ~/.scoutbot：API keys (.env)、配额计数、成本账本、任务存储的根目录。
pub fn scoutbot_home_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SCOUTBOT_HOME") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".scoutbot")
}

// ── Research depth ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lower")]
pub enum Depth {
    /// 仅核心流程：researcher → analyst → synthesizer。
    Quick,
    /// 核心流程 + 金融/市场/竞争/投资专家。
    Standard,
    /// 全部专家并行展开。
    Comprehensive,
}

impl Depth {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl std::fmt::Display for Depth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    FreeFirst,
    PremiumFirst,
    Auto,
}

impl SearchStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free_first" | "free" => Some(Self::FreeFirst),
            "premium_first" | "premium" => Some(Self::PremiumFirst),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

// ── Per-agent overrides ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentOverride {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

// ── Config file (TOML, optional) ──────────────────────────────────────────────

/// `~/.scoutbot/config.toml` 的可选片段；缺省项回落到内置默认值。
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    llm_model: Option<String>,
    llm_temperature: Option<f32>,
    llm_max_tokens: Option<u32>,
    num_search_queries: Option<usize>,
    max_search_results: Option<usize>,
    search_strategy: Option<String>,
    quality_threshold: Option<f64>,
    max_iterations: Option<u32>,
    output_dir: Option<String>,
    report_formats: Option<Vec<String>>,
    max_workers: Option<usize>,
    timeout_per_company: Option<u64>,
    enable_cache: Option<bool>,
    cache_dir: Option<String>,
    daily_budget: Option<f64>,
    monthly_budget: Option<f64>,
    per_call_budget: Option<f64>,
    #[serde(default)]
    agents: BTreeMap<String, AgentOverride>,
}

// ── Resolved configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub num_search_queries: usize,
    pub max_search_results: usize,
    pub search_strategy: SearchStrategy,
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub enable_quality_check: bool,
    pub output_dir: PathBuf,
    pub report_formats: Vec<String>,
    pub max_workers: usize,
    pub timeout_per_company: u64,
    pub node_timeout: u64,
    pub enable_cache: bool,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub daily_budget: f64,
    pub monthly_budget: f64,
    pub per_call_budget: Option<f64>,
    pub agent_overrides: BTreeMap<String, AgentOverride>,
}

impl ResearchConfig {
    /// 解析顺序：内置默认 < `~/.scoutbot/config.toml` < `SCOUTBOT_*` 环境变量。
    /// CLI 参数由 main 在此之上覆盖。
    pub fn resolve() -> Result<Self> {
        let home = scoutbot_home_dir();
        let file = read_config_file(&home.join("config.toml"))?;

        let mut cfg = Self {
            llm_model: file.llm_model.unwrap_or_else(|| "deepseek-v3".to_string()),
            llm_temperature: file.llm_temperature.unwrap_or(DEFAULT_LLM_TEMPERATURE),
            llm_max_tokens: file.llm_max_tokens.unwrap_or(DEFAULT_LLM_MAX_TOKENS),
            num_search_queries: file
                .num_search_queries
                .unwrap_or(DEFAULT_NUM_SEARCH_QUERIES),
            max_search_results: file
                .max_search_results
                .unwrap_or(DEFAULT_MAX_SEARCH_RESULTS),
            search_strategy: file
                .search_strategy
                .as_deref()
                .and_then(SearchStrategy::from_str)
                .unwrap_or(SearchStrategy::Auto),
            quality_threshold: file.quality_threshold.unwrap_or(DEFAULT_QUALITY_THRESHOLD),
            max_iterations: file.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            enable_quality_check: true,
            output_dir: file
                .output_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("outputs")),
            report_formats: file
                .report_formats
                .unwrap_or_else(|| vec!["markdown".to_string()]),
            max_workers: file.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            timeout_per_company: file
                .timeout_per_company
                .unwrap_or(DEFAULT_TIMEOUT_PER_COMPANY_SECS),
            node_timeout: DEFAULT_NODE_TIMEOUT_SECS,
            enable_cache: file.enable_cache.unwrap_or(true),
            cache_dir: file
                .cache_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("cache")),
            data_dir: home,
            daily_budget: file.daily_budget.unwrap_or(DEFAULT_DAILY_BUDGET_USD),
            monthly_budget: file.monthly_budget.unwrap_or(DEFAULT_MONTHLY_BUDGET_USD),
            per_call_budget: file.per_call_budget,
            agent_overrides: file.agents,
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SCOUTBOT_LLM_MODEL") {
            self.llm_model = v;
        }
        if let Some(v) = env_parse::<f32>("SCOUTBOT_LLM_TEMPERATURE") {
            self.llm_temperature = v;
        }
        if let Some(v) = env_parse::<u32>("SCOUTBOT_LLM_MAX_TOKENS") {
            self.llm_max_tokens = v;
        }
        if let Some(v) = env_parse::<usize>("SCOUTBOT_NUM_SEARCH_QUERIES") {
            self.num_search_queries = v;
        }
        if let Some(v) = env_parse::<usize>("SCOUTBOT_MAX_SEARCH_RESULTS") {
            self.max_search_results = v;
        }
        if let Ok(v) = std::env::var("SCOUTBOT_SEARCH_STRATEGY")
            && let Some(s) = SearchStrategy::from_str(&v)
        {
            self.search_strategy = s;
        }
        if let Some(v) = env_parse::<f64>("SCOUTBOT_QUALITY_THRESHOLD") {
            self.quality_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("SCOUTBOT_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Ok(v) = std::env::var("SCOUTBOT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<usize>("SCOUTBOT_MAX_WORKERS") {
            self.max_workers = v;
        }
        if let Some(v) = env_parse::<u64>("SCOUTBOT_TIMEOUT_PER_COMPANY") {
            self.timeout_per_company = v;
        }
        if let Ok(v) = std::env::var("SCOUTBOT_ENABLE_CACHE") {
            self.enable_cache = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("SCOUTBOT_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<f64>("SCOUTBOT_DAILY_BUDGET") {
            self.daily_budget = v;
        }
        if let Some(v) = env_parse::<f64>("SCOUTBOT_MONTHLY_BUDGET") {
            self.monthly_budget = v;
        }
        if let Some(v) = env_parse::<f64>("SCOUTBOT_PER_CALL_BUDGET") {
            self.per_call_budget = Some(v);
        }
    }

    /// 非法配置是致命错误：直接拒绝启动，而不是带病运行。
    pub fn validate(&self) -> Result<()> {
        if self.num_search_queries == 0 || self.num_search_queries > 20 {
            return Err(anyhow!(
                "num_search_queries must be in 1..=20, got {}",
                self.num_search_queries
            ));
        }
        if self.max_workers == 0 || self.max_workers > 64 {
            return Err(anyhow!(
                "max_workers must be in 1..=64, got {}",
                self.max_workers
            ));
        }
        if !(0.0..=100.0).contains(&self.quality_threshold) {
            return Err(anyhow!(
                "quality_threshold must be in 0..=100, got {}",
                self.quality_threshold
            ));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(anyhow!(
                "llm_temperature must be in 0.0..=2.0, got {}",
                self.llm_temperature
            ));
        }
        if self.timeout_per_company < 10 {
            return Err(anyhow!(
                "timeout_per_company must be at least 10s, got {}",
                self.timeout_per_company
            ));
        }
        if let Some(b) = self.per_call_budget
            && b <= 0.0
        {
            return Err(anyhow!("per_call_budget must be positive, got {b}"));
        }
        Ok(())
    }

    pub fn agent_max_tokens(&self, agent: &str, default: u32) -> u32 {
        self.agent_overrides
            .get(agent)
            .and_then(|o| o.max_tokens)
            .unwrap_or(default)
    }

    pub fn agent_temperature(&self, agent: &str, default: f32) -> f32 {
        self.agent_overrides
            .get(agent)
            .and_then(|o| o.temperature)
            .unwrap_or(default)
    }

    /// `--show-config` 输出。只报告各 API key 是否存在，绝不打印 key 本身。
    pub fn render(&self) -> String {
        let mut out = String::from("Resolved configuration:\n");
        out.push_str(&format!("  llm_model            = {}\n", self.llm_model));
        out.push_str(&format!(
            "  llm_temperature      = {}\n",
            self.llm_temperature
        ));
        out.push_str(&format!(
            "  llm_max_tokens       = {}\n",
            self.llm_max_tokens
        ));
        out.push_str(&format!(
            "  num_search_queries   = {}\n",
            self.num_search_queries
        ));
        out.push_str(&format!(
            "  max_search_results   = {}\n",
            self.max_search_results
        ));
        out.push_str(&format!(
            "  search_strategy      = {:?}\n",
            self.search_strategy
        ));
        out.push_str(&format!(
            "  quality_threshold    = {}\n",
            self.quality_threshold
        ));
        out.push_str(&format!(
            "  max_iterations       = {}\n",
            self.max_iterations
        ));
        out.push_str(&format!(
            "  output_dir           = {}\n",
            self.output_dir.display()
        ));
        out.push_str(&format!("  max_workers          = {}\n", self.max_workers));
        out.push_str(&format!(
            "  timeout_per_company  = {}s\n",
            self.timeout_per_company
        ));
        out.push_str(&format!(
            "  enable_cache         = {} ({})\n",
            self.enable_cache,
            self.cache_dir.display()
        ));
        out.push_str(&format!(
            "  budgets              = {:.2} USD/day, {:.2} USD/month\n",
            self.daily_budget, self.monthly_budget
        ));
        out.push_str("  api keys:\n");
        for (label, env) in PROVIDER_KEY_ENVS {
            let present = std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false);
            out.push_str(&format!(
                "    {label:<12} {}\n",
                if present { "configured" } else { "missing" }
            ));
        }
        out
    }
}

/// Provider key 环境变量清单（`--show-config` 与 dry-run 预检共用）。
pub const PROVIDER_KEY_ENVS: &[(&str, &str)] = &[
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("tavily", "TAVILY_API_KEY"),
    ("serper", "SERPER_API_KEY"),
    ("gnews", "GNEWS_API_KEY"),
    ("newsapi", "NEWSAPI_API_KEY"),
    ("mediastack", "MEDIASTACK_API_KEY"),
];

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn read_config_file(path: &std::path::Path) -> Result<ConfigFile> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Ok(ConfigFile::default());
    };
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}

// ── Company profiles (YAML) ───────────────────────────────────────────────────

/// `--profile` / `--market` 使用的公司画像文件。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub depth: Option<Depth>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CompanyProfile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read profile {}", path.display()))?;
        let profile: Self = serde_yml::from_str(&text)
            .with_context(|| format!("invalid profile {}", path.display()))?;
        if profile.name.trim().is_empty() {
            return Err(anyhow!("profile {} has an empty name", path.display()));
        }
        Ok(profile)
    }

    /// 读取目录下全部 `*.yaml` / `*.yml` 画像，按文件名排序。
    pub fn load_dir(dir: &std::path::Path) -> Result<Vec<Self>> {
        let mut profiles = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read market dir {}", dir.display()))?;
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();
        for path in paths {
            profiles.push(Self::load(&path)?);
        }
        if profiles.is_empty() {
            return Err(anyhow!("no profile files found in {}", dir.display()));
        }
        Ok(profiles)
    }
}
