mod agents;
mod cache;
mod config;
mod errors;
mod providers;
mod quality;
mod state;
mod tasks;
mod workflow;

use std::{path::PathBuf, sync::Arc};

use clap::{ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use config::{CompanyProfile, Depth, ResearchConfig};
use workflow::graph::WorkflowGraph;

// ── Exit codes ────────────────────────────────────────────────────────────────
// 0 成功；2 参数/配置错误（clap 解析错误同样是 2）；
// 3 没有任何可用 provider；4 所有工作流都失败。
const EXIT_BAD_ARGUMENT: i32 = 2;
const EXIT_NO_PROVIDER: i32 = 3;
const EXIT_ALL_FAILED: i32 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "scoutbot",
    version,
    about = "Multi-agent company research engine",
    group(ArgGroup::new("target").args(["company", "profile", "market"]))
)]
struct Cli {
    /// 研究单家公司（公司名）。
    #[arg(long)]
    company: Option<String>,

    /// 公司画像 YAML 文件。
    #[arg(long, value_name = "YAML")]
    profile: Option<PathBuf>,

    /// 画像目录：批量跑整个市场。
    #[arg(long, value_name = "DIR")]
    market: Option<PathBuf>,

    /// 研究深度。
    #[arg(long, value_enum, default_value_t = Depth::Standard)]
    depth: Depth,

    /// 产物输出目录（默认 outputs/）。
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// 使用图执行引擎（当前唯一引擎，保留该开关兼容旧脚本）。
    #[arg(long)]
    use_graph: bool,

    /// 市场模式下输出公司间对比。
    #[arg(long)]
    compare: bool,

    /// 打印解析后的配置（不含 key 值）后退出。
    #[arg(long)]
    show_config: bool,

    /// 只展示执行计划，不触网。
    #[arg(long)]
    dry_run: bool,

    #[arg(long, short)]
    verbose: bool,

    /// 关闭生成后质量门（报告一律接受）。
    #[arg(long)]
    no_quality_check: bool,

    /// 生成后可发布阈值（0..=100）。
    #[arg(long, value_name = "FLOAT")]
    quality_threshold: Option<f64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // API key 加载顺序：~/.scoutbot/.env，其次当前目录 .env，进程环境优先。
    let _ = dotenvy::from_path(config::scoutbot_home_dir().join(".env"));
    let _ = dotenvy::dotenv();

    let mut config = match ResearchConfig::resolve() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(EXIT_BAD_ARGUMENT);
        }
    };
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(threshold) = cli.quality_threshold {
        config.quality_threshold = threshold;
    }
    config.enable_quality_check = !cli.no_quality_check;
    if let Err(err) = config.validate() {
        eprintln!("configuration error: {err:#}");
        std::process::exit(EXIT_BAD_ARGUMENT);
    }

    if cli.show_config {
        print!("{}", config.render());
        print_local_state(&config);
        if cli.company.is_none() && cli.profile.is_none() && cli.market.is_none() {
            return;
        }
    }
    if cli.company.is_none() && cli.profile.is_none() && cli.market.is_none() {
        eprintln!("one of --company, --profile or --market is required");
        std::process::exit(EXIT_BAD_ARGUMENT);
    }

    if cli.use_graph {
        tracing::debug!("--use-graph: graph engine is the default executor");
    }
    if cli.dry_run {
        print_dry_run_plan(&cli, &config);
        return;
    }

    if !providers::llm::LlmRouter::any_provider_configured() {
        eprintln!(
            "no LLM provider available: set one of DEEPSEEK_API_KEY / ANTHROPIC_API_KEY / \
             OPENAI_API_KEY, or OLLAMA_BASE_URL for a local model"
        );
        std::process::exit(EXIT_NO_PROVIDER);
    }
    if let Err(err) = providers::init(&config) {
        eprintln!("provider initialisation failed: {err:#}");
        std::process::exit(EXIT_NO_PROVIDER);
    }

    let code = run(cli, Arc::new(config)).await;
    providers::shutdown();
    if code != 0 {
        std::process::exit(code);
    }
}

async fn run(cli: Cli, config: Arc<ResearchConfig>) -> i32 {
    if let Some(company) = &cli.company {
        return run_single(company, cli.depth, config).await;
    }
    if let Some(profile_path) = &cli.profile {
        let profile = match CompanyProfile::load(profile_path) {
            Ok(profile) => profile,
            Err(err) => {
                eprintln!("profile error: {err:#}");
                return EXIT_BAD_ARGUMENT;
            }
        };
        let depth = profile.depth.unwrap_or(cli.depth);
        return run_single(&profile.name, depth, config).await;
    }
    if let Some(market_dir) = &cli.market {
        return run_market_dir(market_dir, &cli, config).await;
    }
    unreachable!("target presence validated in main");
}

async fn run_single(company: &str, depth: Depth, config: Arc<ResearchConfig>) -> i32 {
    println!("Researching {company} ({} depth)...", depth.name());
    match workflow::run_research(company, depth, config).await {
        Ok(outcome) => {
            let quality = outcome
                .quality
                .as_ref()
                .map(|q| format!("{:.1} ({:?})", q.overall_score, q.level))
                .unwrap_or_else(|| format!("{:.1}", outcome.state.quality_score));
            println!(
                "{}: {} | quality {} | cost {:.4} USD | {} sources | {:.1}s",
                outcome.company,
                outcome.status.name(),
                quality,
                outcome.state.total_cost,
                outcome.state.sources.len(),
                outcome.duration_secs
            );
            if let Some(dir) = &outcome.output_dir {
                println!("outputs: {}", dir.display());
            }
            0
        }
        Err(err) => {
            eprintln!("workflow failed: {err:#}");
            EXIT_ALL_FAILED
        }
    }
}

async fn run_market_dir(dir: &std::path::Path, cli: &Cli, config: Arc<ResearchConfig>) -> i32 {
    match workflow::run_market(dir, cli.depth, config).await {
        Ok(result) => {
            println!(
                "market run: {} completed, {} blocked, {} failed | total cost {:.4} USD",
                result.completed(),
                result.blocked(),
                result.failed(),
                result.total_cost
            );
            println!("batch outputs: {}", result.output_dir.display());
            if cli.compare {
                match std::fs::read_to_string(result.output_dir.join("00_comparison.md")) {
                    Ok(comparison) => println!("\n{comparison}"),
                    Err(err) => tracing::warn!("comparison unavailable: {err}"),
                }
            }
            if result.all_failed() {
                EXIT_ALL_FAILED
            } else {
                0
            }
        }
        Err(err) => {
            eprintln!("market run failed: {err:#}");
            EXIT_ALL_FAILED
        }
    }
}

/// dry-run：图计划 + provider 链 + 关键配置，不发任何请求。
fn print_dry_run_plan(cli: &Cli, config: &ResearchConfig) {
    let depth = cli.depth;
    println!("dry run: {} depth, no network calls\n", depth.name());
    println!("execution plan:");
    for (i, wave) in WorkflowGraph::build(depth).waves().iter().enumerate() {
        let names: Vec<&str> = wave.iter().map(|n| n.name()).collect();
        let mode = if names.len() > 1 { "parallel" } else { "serial" };
        println!("  wave {i}: [{}] ({mode})", names.join(", "));
    }
    println!("\nstate reducers:");
    for (slot, reducer) in state::reducer::STATE_REDUCERS {
        println!("  {slot:<18} {reducer:?}");
    }
    println!("\nllm fallback chain:");
    for desc in providers::llm::LLM_PROVIDERS {
        let key_state = match desc.key_env {
            Some(env) => {
                if std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false) {
                    "key configured"
                } else {
                    "key missing"
                }
            }
            None => "no key needed",
        };
        println!("  {:<14} {:?} tier, {}", desc.name, desc.tier, key_state);
    }
    println!(
        "\nsearch providers: duckduckgo -> tavily -> serper ({:?})",
        config.search_strategy
    );
    println!(
        "iteration: max {}, quality threshold {}, per-company timeout {}s",
        config.max_iterations, config.quality_threshold, config.timeout_per_company
    );
    println!("output dir: {}", config.output_dir.display());
}

/// --show-config 的本地状态段：缓存覆盖与花费概览（纯本地读取）。
fn print_local_state(config: &ResearchConfig) {
    let cache = cache::ResearchCache::new(config.cache_dir.clone(), config.enable_cache);
    let stats = cache.get_statistics();
    println!(
        "  cache: {} companies, {} sections, {} urls tracked ({} marked useless)",
        stats.companies, stats.sections_total, stats.urls_tracked, stats.urls_useless
    );
    let ledger = providers::cost::CostLedger::load(
        config.data_dir.join("costs.json"),
        config.daily_budget,
        config.monthly_budget,
    );
    println!(
        "  spend: {:.4} USD today, {:.4} USD this month ({} recorded calls)",
        ledger.spent_today(),
        ledger.spent_this_month(),
        ledger.record_count()
    );
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ScoutBot={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_rejects_two_targets() {
        let result = Cli::try_parse_from(["scoutbot", "--company", "Acme", "--market", "dir"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_depth_values() {
        let cli =
            Cli::try_parse_from(["scoutbot", "--company", "Acme", "--depth", "quick"]).unwrap();
        assert_eq!(cli.depth, Depth::Quick);
        assert!(Cli::try_parse_from(["scoutbot", "--company", "A", "--depth", "bogus"]).is_err());
    }

    #[test]
    fn cli_defaults_to_standard_depth() {
        let cli = Cli::try_parse_from(["scoutbot", "--company", "Acme"]).unwrap();
        assert_eq!(cli.depth, Depth::Standard);
        assert!(!cli.dry_run);
        assert!(!cli.no_quality_check);
    }
}
