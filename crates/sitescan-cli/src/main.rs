//! Sitescan - whole-site page audit CLI
//!
//! ## Commands
//!
//! - `scan`: audit every route and print the grouped results
//! - `plan`: show which routes would be audited and how many samples each gets
//! - `config`: print the effective configuration as TOML

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};

use sitescan_core::{
    plan_samples, CommandAuditEngine, CommandEngineConfig, DiscoveryPlan, DiscoverySource, Group,
    LogFormat, MetricValue, PlannedRoute, Route, RouteResult, RouteStatus, ScanConfig, ScanSummary,
    Scanner, StaticDiscovery,
};

#[derive(Parser)]
#[command(name = "sitescan")]
#[command(version = sitescan_core::VERSION)]
#[command(about = "Audit every page of a site with a bounded pool of isolated workers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every in-scope route
    Scan {
        #[command(flatten)]
        target: TargetArgs,

        /// Audit command (default: lighthouse)
        #[arg(long)]
        engine_program: Option<String>,

        /// Audit command argument; repeat for several. Supports {url},
        /// {device}, {throttle}, {throttling-method} and {categories}
        #[arg(long = "engine-arg", allow_hyphen_values = true)]
        engine_args: Vec<String>,

        /// Print the summary and groups as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the sampling plan without auditing anything
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the effective configuration
    Config {
        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Where routes and configuration come from.
#[derive(Args, Debug, Default, Clone)]
struct TargetArgs {
    /// TOML configuration file
    #[arg(short, long, env = "SITESCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the site
    #[arg(long)]
    site: Option<String>,

    /// File with one route per line: `<path> [definition]`
    #[arg(long)]
    routes: Option<PathBuf>,

    /// Route to audit; repeat for several
    #[arg(long = "route")]
    extra_routes: Vec<String>,

    /// Fixed samples per route
    #[arg(long)]
    samples: Option<u32>,

    /// Worker pool size
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Route cap
    #[arg(long)]
    max_routes: Option<usize>,

    /// Retries per sample
    #[arg(long)]
    retry_limit: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    sitescan_core::init_tracing(cli.log_format.into(), level);

    match cli.command {
        Commands::Scan {
            target,
            engine_program,
            engine_args,
            json,
        } => {
            let engine = engine_config(engine_program, engine_args);
            let (scanner, summary) = cmd_scan(&target, engine).await?;
            if json {
                print_json(&summary, &scanner.groups())
            } else {
                print_groups(&summary, &scanner.groups());
                Ok(())
            }
        }
        Commands::Plan { target } => {
            let plan = cmd_plan(&target).await?;
            print_plan(&plan);
            Ok(())
        }
        Commands::Config { target } => {
            print!("{}", cmd_config(&target)?);
            Ok(())
        }
    }
}

/// Defaults, then the config file, then command-line overrides.
fn build_config(target: &TargetArgs) -> Result<ScanConfig> {
    let mut config = match &target.config {
        Some(path) => ScanConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ScanConfig::default(),
    };
    if let Some(site) = &target.site {
        config.site = Some(site.clone());
    }
    if let Some(samples) = target.samples {
        config.scanner.samples = Some(samples);
    }
    if let Some(n) = target.max_concurrency {
        config.cluster.max_concurrency = n;
    }
    if let Some(n) = target.max_routes {
        config.scanner.max_routes = n;
    }
    if let Some(n) = target.retry_limit {
        config.cluster.retry_limit = n;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn discovery(target: &TargetArgs) -> Result<DiscoveryPlan> {
    let mut plan = DiscoveryPlan::new();
    if let Some(path) = &target.routes {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read routes from {}", path.display()))?;
        plan = plan.with_source(Arc::new(StaticDiscovery::from_lines(DiscoverySource::Filesystem, &text)));
    }
    let mut manual: Vec<Route> = target
        .extra_routes
        .iter()
        .map(|p| Route::new(p, DiscoverySource::Manual))
        .collect();
    if target.routes.is_none() && manual.is_empty() {
        manual.push(Route::new("/", DiscoverySource::Manual));
    }
    if !manual.is_empty() {
        plan = plan.with_source(Arc::new(StaticDiscovery::new(DiscoverySource::Manual, manual)));
    }
    Ok(plan)
}

fn engine_config(program: Option<String>, args: Vec<String>) -> CommandEngineConfig {
    let mut engine = CommandEngineConfig::lighthouse();
    if let Some(program) = program {
        engine.program = program;
    }
    if !args.is_empty() {
        engine.args = args;
    }
    engine
}

async fn cmd_scan(target: &TargetArgs, engine: CommandEngineConfig) -> Result<(Scanner, ScanSummary)> {
    let config = build_config(target)?;
    let plan = discovery(target)?;
    info!(program = %engine.program, "using audit command");
    let scanner = Scanner::from_discovery(config, &plan, Arc::new(CommandAuditEngine::new(engine)))
        .await
        .context("Failed to prepare scan")?;
    let summary = scanner.run().await;
    Ok((scanner, summary))
}

async fn cmd_plan(target: &TargetArgs) -> Result<Vec<PlannedRoute>> {
    let config = build_config(target)?;
    let registry = discovery(target)?.collect(&config.scanner).await;
    Ok(plan_samples(&config, &registry.seal()))
}

fn cmd_config(target: &TargetArgs) -> Result<String> {
    let config = build_config(target)?;
    config.to_toml_string().context("Failed to render configuration")
}

fn print_plan(plan: &[PlannedRoute]) {
    let total: u32 = plan.iter().map(|p| p.samples).sum();
    println!("{} routes, {} audits", plan.len(), total);
    for planned in plan {
        println!("  {:<40} {:<30} x{}", planned.route.path, planned.group_key, planned.samples);
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a ScanSummary,
    groups: &'a [Group],
}

fn print_json(summary: &ScanSummary, groups: &[Group]) -> Result<()> {
    let out = serde_json::to_string_pretty(&JsonReport { summary, groups })
        .context("Failed to serialize scan results")?;
    println!("{out}");
    Ok(())
}

fn print_groups(summary: &ScanSummary, groups: &[Group]) {
    println!(
        "Scanned {} routes in {:.1}s: {} complete, {} failed ({} retries)",
        summary.routes,
        summary.duration_ms as f64 / 1000.0,
        summary.completed_routes,
        summary.failed_routes,
        summary.progress.retried,
    );
    for group in groups {
        let marker = if group.is_failed() { " [failed]" } else { "" };
        println!("\n{}{}", group.key, marker);
        for result in &group.routes {
            println!(
                "  {:<40} {:<9} {}/{} samples  FCP {}",
                result.path(),
                status_label(result.status),
                result.reports.len(),
                result.assigned_samples,
                fcp(result),
            );
        }
    }
}

fn status_label(status: RouteStatus) -> &'static str {
    match status {
        RouteStatus::Pending => "pending",
        RouteStatus::Partial => "partial",
        RouteStatus::Complete => "ok",
        RouteStatus::Failed => "failed",
    }
}

fn fcp(result: &RouteResult) -> String {
    let metric = result
        .representative
        .as_deref()
        .map(|r| MetricValue::from(r.metric("report.audits.first-contentful-paint.displayValue")))
        .unwrap_or(MetricValue::NoData);
    match metric {
        MetricValue::Text(s) => s,
        MetricValue::Number(n) => format!("{n}"),
        _ => "-".to_string(),
    }
}
