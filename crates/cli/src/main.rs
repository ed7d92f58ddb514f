//! Webscout CLI - Main Entry Point
//!
//! Runs investigation scenarios against a live target application, driving a
//! headless browser and persisting structured reports with evidence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use webscout_browser::{CdpClient, ChromeConfig, ChromeHandle};
use webscout_common::{HarnessConfig, RunId, TargetProfile};
use webscout_harness::visual::{VisualConfig, VisualTester};
use webscout_harness::{ReportSink, ScenarioRunner, ScenarioSpec};

mod output;

/// Webscout - browser-driven E2E investigation harness
#[derive(Parser)]
#[command(name = "webscout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the application under test
    #[arg(long, global = true, env = "WEBSCOUT_BASE_URL")]
    base_url: Option<String>,

    /// Base URL of the JSON API (defaults to the base URL)
    #[arg(long, global = true, env = "WEBSCOUT_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Target profile TOML (login paths and selectors)
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Attach to an existing CDP endpoint instead of spawning a browser
    #[arg(long, global = true, env = "WEBSCOUT_CDP_URL")]
    cdp_url: Option<String>,

    /// Browser binary to spawn
    #[arg(long, global = true, env = "WEBSCOUT_CHROME_BIN")]
    chrome_bin: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios matching the given names or globs
    Run(RunArgs),

    /// List discovered scenarios
    List(ListArgs),

    /// Probe target and browser reachability without running scenarios
    Check,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Scenario names or globs (empty = all)
    patterns: Vec<String>,

    /// Directory containing scenario YAML files
    #[arg(short, long, default_value = "scenarios")]
    spec_dir: PathBuf,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Output directory for reports and screenshots
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Default per-step timeout in milliseconds
    #[arg(long, env = "WEBSCOUT_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Whole-scenario timeout in milliseconds
    #[arg(long)]
    scenario_timeout_ms: Option<u64>,

    /// Whole-run timeout in milliseconds; outstanding scenarios are cancelled
    #[arg(long)]
    run_timeout_ms: Option<u64>,

    /// Maximum scenarios driven concurrently
    #[arg(long, default_value = "4")]
    max_concurrency: usize,

    /// Suppress failed-request evidence for URLs matching these patterns
    #[arg(long = "ignore-url")]
    ignore_urls: Vec<String>,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Baseline directory for visual comparison of `baseline` captures
    #[arg(long)]
    baseline_dir: Option<PathBuf>,

    /// Allowed visual diff percentage
    #[arg(long, default_value = "0.5")]
    visual_threshold: f64,

    /// Adopt current screenshots as baselines when none exist
    #[arg(long)]
    update_baselines: bool,
}

#[derive(clap::Args)]
struct ListArgs {
    /// Directory containing scenario YAML files
    #[arg(short, long, default_value = "scenarios")]
    spec_dir: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(dispatch(cli)) {
        Ok(all_passed) => std::process::exit(if all_passed { 0 } else { 1 }),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Run(args) => run_scenarios(cli.cdp_url, cli.chrome_bin, config, args).await,
        Commands::List(args) => {
            list_scenarios(&args.spec_dir)?;
            Ok(true)
        }
        Commands::Check => {
            check_reachability(&config, cli.cdp_url.as_deref(), cli.chrome_bin).await
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::default()
        .apply_env()
        .context("reading environment configuration")?;

    if let Some(url) = &cli.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
        config.api_base_url = config.base_url.clone();
    }
    if let Some(url) = &cli.api_base_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(path) = &cli.profile {
        config.profile = TargetProfile::from_file(path)
            .with_context(|| format!("loading target profile {}", path.display()))?;
    }

    Ok(config)
}

async fn run_scenarios(
    cdp_url: Option<String>,
    chrome_bin: Option<PathBuf>,
    mut config: HarnessConfig,
    args: RunArgs,
) -> anyhow::Result<bool> {
    if let Some(ms) = args.timeout_ms {
        config.step_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.scenario_timeout_ms {
        config.scenario_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.run_timeout_ms {
        config.run_timeout = Some(Duration::from_millis(ms));
    }
    config.max_concurrency = args.max_concurrency;
    config.ignore_url_patterns.extend(args.ignore_urls);
    config.output_dir = args.output;

    let specs = ScenarioSpec::load_dir(&args.spec_dir)
        .with_context(|| format!("loading scenarios from {}", args.spec_dir.display()))?;
    let specs = ScenarioSpec::filter(specs, &args.patterns, args.tag.as_deref());
    anyhow::ensure!(
        !specs.is_empty(),
        "no scenarios matched in {}",
        args.spec_dir.display()
    );

    // Spawn a browser unless the caller points at a running endpoint.
    let (_browser, endpoint) = match cdp_url {
        Some(url) => (None, url),
        None => {
            let chrome = ChromeHandle::spawn(ChromeConfig {
                binary: chrome_bin,
                headless: !args.headed,
                ..Default::default()
            })
            .await
            .context("spawning browser")?;
            let endpoint = chrome.endpoint().to_string();
            (Some(chrome), endpoint)
        }
    };

    let client = Arc::new(
        CdpClient::connect(&endpoint)
            .await
            .context("attaching to browser")?,
    );

    let sink = Arc::new(ReportSink::new(&config.output_dir, RunId::generate())?);
    let run_dir = sink.run_dir().to_path_buf();

    let mut runner = ScenarioRunner::new(client, Arc::new(config));
    if let Some(baseline_dir) = args.baseline_dir {
        runner = runner.with_visual(VisualTester::new(VisualConfig {
            baseline_dir,
            threshold: args.visual_threshold,
            auto_update: args.update_baselines,
        })?);
    }

    let summary = Arc::new(runner).run_many(specs, sink).await?;
    output::print_summary(&summary, &run_dir);

    Ok(summary.all_passed())
}

fn list_scenarios(spec_dir: &PathBuf) -> anyhow::Result<()> {
    let specs = ScenarioSpec::load_dir(spec_dir)
        .with_context(|| format!("loading scenarios from {}", spec_dir.display()))?;

    if specs.is_empty() {
        println!("No scenarios found in {}", spec_dir.display());
        return Ok(());
    }

    for spec in specs {
        let tags = if spec.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", spec.tags.join(", "))
        };
        println!("{}  ({} steps){}", spec.name, spec.steps.len(), tags);
        if !spec.description.is_empty() {
            println!("    {}", spec.description);
        }
    }
    Ok(())
}

async fn check_reachability(
    config: &HarnessConfig,
    cdp_url: Option<&str>,
    chrome_bin: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let mut healthy = true;

    let health_url = config.resolve_url(&config.profile.paths.health);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    match http.get(&health_url).send().await {
        Ok(resp) => println!("target   {}  {}", health_url, resp.status()),
        Err(e) => {
            healthy = false;
            println!("target   {}  unreachable: {}", health_url, e);
        }
    }

    match cdp_url {
        Some(endpoint) => match CdpClient::version(endpoint).await {
            Ok(version) => println!("browser  {}  {}", endpoint, version.browser),
            Err(e) => {
                healthy = false;
                println!("browser  {}  {}", endpoint, e);
            }
        },
        None => {
            // No endpoint given: verify we can spawn our own browser.
            match ChromeHandle::spawn(ChromeConfig {
                binary: chrome_bin,
                startup_timeout: Duration::from_secs(15),
                ..Default::default()
            })
            .await
            {
                Ok(chrome) => println!("browser  spawned ok at {}", chrome.endpoint()),
                Err(e) => {
                    healthy = false;
                    println!("browser  {}", e);
                }
            }
        }
    }

    Ok(healthy)
}
