//! CLI entry point. Wires the core pipeline to three surfaces: a default
//! batch report over `<root>`, `top` (live view), and `detect` (one-shot
//! diagnostic dump). Config layering follows the teacher's pattern: built-in
//! defaults -> optional TOML file -> env vars -> CLI flags (applied here,
//! last and highest precedence).

use anyhow::Result;
use clap::{Parser, Subcommand};
use quota_monitor::batch::{BatchAnalyzer, DurationFilter, GroupBy};
use quota_monitor::cache::FileCache;
use quota_monitor::config::{get_config, Config};
use quota_monitor::detect_report::{render_detect_report, run_detect_report};
use quota_monitor::error::MonitorError;
use quota_monitor::logging;
use quota_monitor::models::Plan;
use quota_monitor::orchestrator::Orchestrator;
use quota_monitor::pricing::{CachedPricingProvider, DefaultPricingProvider, PricingProvider};
use quota_monitor::report::{render_batch_report, OutputFormat};
use quota_monitor::snapshot::SnapshotHandle;
use quota_monitor::timefmt::resolve_timezone;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "quota-monitor")]
#[command(about = "Quota-aware real-time usage monitor for an LLM coding assistant's on-disk journal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Journal root directory for the default batch report (overrides --dir)
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Journal root directory (default: ~/.claude/projects)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Duration filter for batch reports, e.g. `7d`, `2w`, `1d12h`
    #[arg(long)]
    duration: Option<String>,

    /// Batch report grouping axis
    #[arg(long = "group-by", default_value = "project")]
    group_by: String,

    /// Output format for batch reports and `detect`
    #[arg(long = "output", visible_alias = "format", default_value = "table")]
    output: String,

    /// Include per-model cost/token breakdown in table output
    #[arg(long)]
    breakdown: bool,

    /// IANA timezone name, or `Local`/`auto`
    #[arg(long, default_value = "Local")]
    timezone: String,

    /// Quota plan: pro, max5, max20, custom
    #[arg(long, default_value = "pro")]
    plan: String,

    /// Token ceiling for `--plan custom`
    #[arg(long = "custom-limit-tokens")]
    custom_limit_tokens: Option<u64>,

    /// Pricing source: default or remote
    #[arg(long = "pricing-source", default_value = "default")]
    pricing_source: String,

    /// Never attempt a network fetch for pricing; the disk cache is authoritative
    #[arg(long = "pricing-offline")]
    pricing_offline: bool,

    /// Data-refresh interval in seconds for `top`
    #[arg(long = "refresh-rate")]
    refresh_rate: Option<f64>,

    /// UI-render rate in Hz (0.1-20) for `top`
    #[arg(long = "refresh-per-second")]
    refresh_per_second: Option<f64>,

    /// Clock style for displayed times: 12h or 24h
    #[arg(long = "time-format", default_value = "24h")]
    time_format: String,

    /// Wipe persisted window history before running
    #[arg(long = "reset-windows")]
    reset_windows: bool,

    /// Wipe all persisted state (cache, window history, pricing cache) and exit
    #[arg(long)]
    reset: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Live, continuously-refreshing quota view
    Top,
    /// One-shot diagnostic dump of detector state
    Detect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _logging_guard = logging::init_logging();
    let mut config = get_config().clone();

    if let Some(dir) = &cli.dir {
        config.paths.journal_root = dir.clone();
    }
    if let Some(root) = &cli.root {
        config.paths.journal_root = root.clone();
    }
    if let Some(secs) = cli.refresh_rate {
        config.live.data_refresh_interval_secs = secs;
    }
    if let Some(hz) = cli.refresh_per_second {
        config.live.ui_refresh_hz = hz;
    }
    config.pricing.source = cli.pricing_source.clone();
    config.pricing.offline = cli.pricing_offline;
    config.output.time_format = cli.time_format.clone();
    config.output.timezone = cli.timezone.clone();

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    if cli.reset {
        if let Err(e) = reset_all_state(&config.paths.state_root) {
            eprintln!("Error: failed to reset state: {e}");
            std::process::exit(1);
        }
        println!("state reset");
        return Ok(());
    }

    let tz = match resolve_timezone(&config.output.timezone) {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let plan = match parse_plan(&cli.plan, cli.custom_limit_tokens) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    if cli.reset_windows {
        let history_path = config.paths.state_root.join("history");
        if history_path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&history_path) {
                warn!(error = %e, "failed to reset window history");
            }
        }
    }

    let pricing = match build_pricing_provider(&cli, &config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Some(Commands::Top) => {
            run_top(&config, plan, cli.custom_limit_tokens, tz, &cli.time_format, pricing).await
        }
        Some(Commands::Detect) => run_detect(&config, &cli, pricing),
        None => run_batch(&config, &cli, tz, pricing),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            let code = e
                .downcast_ref::<MonitorError>()
                .map(|m| m.exit_code())
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

fn parse_plan(raw: &str, custom_limit_tokens: Option<u64>) -> Result<Plan, MonitorError> {
    let plan = match raw {
        "pro" => Plan::Pro,
        "max5" => Plan::Max5,
        "max20" => Plan::Max20,
        "custom" => Plan::Custom,
        other => {
            return Err(MonitorError::ConfigError(format!(
                "unknown --plan value `{other}`"
            )))
        }
    };
    if plan != Plan::Custom && custom_limit_tokens.is_some() {
        warn!("--custom-limit-tokens is only used with --plan custom; ignoring");
    }
    Ok(plan)
}

fn build_pricing_provider(cli: &Cli, config: &Config) -> Result<Arc<dyn PricingProvider>, MonitorError> {
    match cli.pricing_source.as_str() {
        "default" => Ok(Arc::new(DefaultPricingProvider::new())),
        "remote" => build_remote_pricing_provider(config),
        other => Err(MonitorError::ConfigError(format!(
            "unknown --pricing-source value `{other}`"
        ))),
    }
}

#[cfg(feature = "pricing")]
fn build_remote_pricing_provider(config: &Config) -> Result<Arc<dyn PricingProvider>, MonitorError> {
    let remote = quota_monitor::pricing::RemotePricingProvider::new(config.pricing.catalog_url.clone());
    let cached = CachedPricingProvider::new(remote, &config.paths.state_root, config.pricing.offline);
    if !config.pricing.offline {
        if let Err(e) = cached.refresh() {
            warn!(error = %e, "remote pricing refresh failed, falling back to cache/default");
        }
    }
    Ok(Arc::new(cached))
}

#[cfg(not(feature = "pricing"))]
fn build_remote_pricing_provider(_config: &Config) -> Result<Arc<dyn PricingProvider>, MonitorError> {
    Err(MonitorError::ConfigError(
        "remote pricing requires building with --features pricing".to_string(),
    ))
}

fn reset_all_state(state_root: &std::path::Path) -> std::io::Result<()> {
    for sub in ["cache", "history"] {
        let dir = state_root.join(sub);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
    }
    let pricing_cache = state_root.join("pricing.json");
    if pricing_cache.exists() {
        std::fs::remove_file(&pricing_cache)?;
    }
    Ok(())
}

fn run_batch(config: &Config, cli: &Cli, tz: chrono_tz::Tz, pricing: Arc<dyn PricingProvider>) -> Result<()> {
    let duration = cli.duration.as_deref().map(DurationFilter::parse).transpose()?;
    let group_by = GroupBy::parse(&cli.group_by)?;
    let format = OutputFormat::parse(&cli.output)?;

    let mut cache = FileCache::new(config.paths.state_root.join("cache"));
    cache.load()?;

    let analyzer = BatchAnalyzer::new(config.paths.journal_root.clone());
    let now = current_unix_time();
    let report = analyzer.run(&mut cache, pricing.as_ref(), duration, group_by, tz, now)?;

    let rendered = render_batch_report(&report, format, tz, &cli.time_format, cli.breakdown)?;
    println!("{rendered}");
    Ok(())
}

fn run_detect(config: &Config, cli: &Cli, pricing: Arc<dyn PricingProvider>) -> Result<()> {
    let format = OutputFormat::parse(&cli.output)?;
    let now = current_unix_time();
    let report = run_detect_report(
        &config.paths.journal_root,
        &config.paths.state_root,
        pricing.as_ref(),
        now,
        config.live.data_refresh_interval_secs as i64,
    )?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", render_detect_report(&report)),
    }
    Ok(())
}

async fn run_top(
    config: &Config,
    plan: Plan,
    custom_limit_tokens: Option<u64>,
    tz: chrono_tz::Tz,
    time_format: &str,
    pricing: Arc<dyn PricingProvider>,
) -> Result<()> {
    #[cfg(not(feature = "live"))]
    {
        let _ = (config, plan, custom_limit_tokens, tz, time_format, pricing);
        anyhow::bail!("`top` requires building with --features live");
    }

    #[cfg(feature = "live")]
    {
        let token = CancellationToken::new();
        let handle = Arc::new(SnapshotHandle::new());
        let orchestrator = Orchestrator::new(config, plan, custom_limit_tokens, token.clone());
        let force_refresh = orchestrator.force_refresh_handle();

        let ctrl_c_token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c_token.cancel();
            }
        });

        let data_handle = handle.clone();
        let data_token = token.clone();
        let data_task = tokio::spawn(async move {
            if let Err(e) = orchestrator.run_data_cadence(data_handle, pricing).await {
                warn!(error = %e, "data cadence exited with error");
            }
            data_token.cancel();
        });

        let ui_result = quota_monitor::render::run_ui_cadence(
            handle,
            token.clone(),
            force_refresh,
            config.live.ui_refresh_hz,
            plan,
            tz,
            time_format.to_string(),
        )
        .await;

        token.cancel();
        let _ = data_task.await;
        info!("top shut down");
        ui_result
    }
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
