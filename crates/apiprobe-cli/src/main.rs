//! apiprobe - API conformance & resilience harness CLI
//!
//! ## Commands
//!
//! - `run`: execute probes, compare baselines, write the report and gate on it
//! - `inputs`: list the probes a run would issue
//! - `replay-fuzz`: regenerate one fuzz input from its replay coordinates
//! - `baseline`: list stored baselines or accept them from a report

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use apiprobe_core::telemetry::init_tracing;
use apiprobe_core::{
    accept_baselines, fuzz_case, parse_strategies, plan_probes, validate, CancelHandle, Executor,
    FuzzCategory, FuzzOrigin, HarnessConfig, HttpTransport, LoadProfile, Probe,
    Report, RunCoordinator, Strategy, Transport, Verdict,
};
use apiprobe_store::{BaselineStore, FsBaselineStore};

#[derive(Parser)]
#[command(name = "apiprobe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "API conformance & resilience test harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "APIPROBE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run probes against the service and gate on the report
    Run(RunArgs),

    /// List the probes a run would issue, without sending anything
    Inputs {
        /// Comma-separated strategies, or `all`
        #[arg(short, long)]
        strategies: Option<String>,

        /// Fuzz seed
        #[arg(long)]
        seed: Option<u64>,

        /// Number of fuzz inputs
        #[arg(long)]
        fuzz_count: Option<usize>,
    },

    /// Regenerate a fuzz input from the coordinates recorded in a report
    ReplayFuzz {
        /// Fuzz category (e.g. `oversized`, `control_characters`)
        #[arg(long)]
        category: FuzzCategory,

        #[arg(long)]
        seed: u64,

        #[arg(long)]
        index: u64,

        /// Send the input to the service and validate the response
        #[arg(long)]
        send: bool,
    },

    /// Manage regression baselines
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
}

#[derive(Subcommand)]
enum BaselineAction {
    /// List stored baselines
    List,

    /// Accept the current results of passing regression probes in a report
    Accept {
        /// JSON report written by `apiprobe run`
        #[arg(short, long)]
        report: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Comma-separated strategies, or `all`
    #[arg(short, long)]
    strategies: Option<String>,

    /// Fuzz seed (recorded in the report for replay)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of fuzz inputs
    #[arg(long)]
    fuzz_count: Option<usize>,

    /// Fail the gate on regression drift or inconsistent variants
    #[arg(long)]
    strict: bool,

    /// Service endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum probes in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Wall-clock bound for the whole run in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Pacing profile for load probes (`polite` or `stress`)
    #[arg(long)]
    load_profile: Option<LoadProfile>,

    /// Baseline file
    #[arg(long)]
    baselines: Option<PathBuf>,

    /// Write the JSON report here
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Write the markdown summary here
    #[arg(long)]
    report_md: Option<PathBuf>,

    /// Do not record baselines for regression probes that have none
    #[arg(long)]
    no_persist: bool,
}

impl RunArgs {
    /// Command-line flags win over file and environment settings.
    fn apply(&self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(list) = &self.strategies {
            config.strategies = parse_strategies(list)?;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(n) = self.fuzz_count {
            config.fuzz_count = n;
        }
        if self.strict {
            config.strict = true;
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(n) = self.concurrency {
            config.executor.max_concurrency = n;
        }
        if let Some(ms) = self.timeout_ms {
            config.executor.per_request_timeout_ms = ms;
        }
        if let Some(ms) = self.deadline_ms {
            config.run_deadline_ms = Some(ms);
        }
        if let Some(profile) = self.load_profile {
            config.load_profile = Some(profile);
        }
        if let Some(path) = &self.baselines {
            config.baseline_path = path.clone();
        }
        if let Some(path) = &self.report_json {
            config.report_json = Some(path.clone());
        }
        if let Some(path) = &self.report_md {
            config.report_markdown = Some(path.clone());
        }
        if self.no_persist {
            config.persist_new_baselines = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config)?;
            config.validate().context("Invalid configuration")?;

            let transport = HttpTransport::new(
                &config.base_url,
                config.executor.per_request_timeout_ms,
            )
            .context("Failed to build HTTP transport")?;

            let cancel = CancelHandle::new();
            cancel_on_ctrl_c(cancel.clone());

            let report = cmd_run(&config, Arc::new(transport), &cancel).await?;
            if report.passed() {
                println!("\n✓ All checks passed!");
                Ok(())
            } else {
                anyhow::bail!("apiprobe gate failed")
            }
        }
        Commands::Inputs {
            strategies,
            seed,
            fuzz_count,
        } => {
            if let Some(list) = strategies {
                config.strategies = parse_strategies(&list)?;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if let Some(n) = fuzz_count {
                config.fuzz_count = n;
            }
            cmd_inputs(&config, cli.json)
        }
        Commands::ReplayFuzz {
            category,
            seed,
            index,
            send,
        } => {
            let transport = if send {
                Some(
                    HttpTransport::new(&config.base_url, config.executor.per_request_timeout_ms)
                        .context("Failed to build HTTP transport")?,
                )
            } else {
                None
            };
            cmd_replay_fuzz(
                category,
                seed,
                index,
                transport.as_ref().map(|t| t as &dyn Transport),
            )
            .await
            .map(|_| ())
        }
        Commands::Baseline { action } => {
            let store = open_store(&config.baseline_path)?;
            match action {
                BaselineAction::List => cmd_baseline_list(&store, cli.json).await,
                BaselineAction::Accept { report } => {
                    cmd_baseline_accept(&store, &report).await.map(|_| ())
                }
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HarnessConfig::from_env()),
    }
}

fn open_store(path: &Path) -> Result<FsBaselineStore> {
    FsBaselineStore::open(path)
        .with_context(|| format!("Failed to open baseline store at {}", path.display()))
}

fn cancel_on_ctrl_c(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight probes");
            cancel.cancel();
        }
    });
}

async fn cmd_run(
    config: &HarnessConfig,
    transport: Arc<dyn Transport>,
    cancel: &CancelHandle,
) -> Result<Report> {
    let store = Arc::new(open_store(&config.baseline_path)?);
    let executor = Executor::new(transport, config.executor_config())?;
    let coordinator = RunCoordinator::new(executor, store, config.run_config());

    println!("Running apiprobe against {}", config.base_url);
    println!("Strategies: {}", strategy_list(&config.strategies));
    println!("Seed: {}", config.seed);
    println!();

    let report = coordinator
        .run(cancel)
        .await
        .context("apiprobe run failed")?;

    if let Some(path) = &config.report_json {
        report.write_json(path)?;
        info!(path = %path.display(), "wrote JSON report");
    }
    if let Some(path) = &config.report_markdown {
        report.write_markdown(path)?;
        info!(path = %path.display(), "wrote markdown report");
    }

    print_report(&report);
    Ok(report)
}

fn print_report(report: &Report) {
    println!("Run ID: {}", report.run.run_id);
    println!("Duration: {}ms", report.run.duration_ms);
    println!();

    for verdict in Verdict::ALL {
        println!("  {:<16} {}", verdict, report.summary.count(verdict));
    }
    println!();

    for entry in report.problems() {
        let mark = if entry.verdict == Verdict::Anomaly {
            "!"
        } else {
            "✗"
        };
        let reason = entry
            .reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        println!(
            "  {} {} [{}] {:?}: {}",
            mark, entry.probe_id, entry.verdict, entry.input_preview, reason
        );
        if let Some(origin) = entry.origin {
            println!(
                "      replay: apiprobe replay-fuzz --category {} --seed {} --index {}",
                origin.category, origin.seed, origin.index
            );
        }
    }

    for drift in &report.drift {
        println!(
            "  ~ {} drifted: top {} -> {}, count {} -> {}",
            drift.probe_id,
            drift.baseline_top.as_deref().unwrap_or("none"),
            drift.current_top.as_deref().unwrap_or("none"),
            drift.baseline_count,
            drift.current_count,
        );
    }
    for flag in &report.consistency {
        println!(
            "  ~ variants of {:?} disagree: counts {:?}",
            flag.group, flag.prediction_counts
        );
    }

    println!();
    println!(
        "Summary: {}/{} probes passed",
        report.summary.count(Verdict::Pass),
        report.summary.total
    );
    println!(
        "Gate: {}",
        if report.passed() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
}

fn strategy_list(strategies: &[Strategy]) -> String {
    strategies
        .iter()
        .map(Strategy::name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Serialize)]
struct InputLine<'a> {
    id: &'a str,
    strategy: Strategy,
    input: &'a str,
    origin: Option<FuzzOrigin>,
}

fn cmd_inputs(config: &HarnessConfig, json: bool) -> Result<()> {
    let probes = plan_probes(&config.run_config())?;
    for probe in &probes {
        if json {
            let line = InputLine {
                id: &probe.id,
                strategy: probe.strategy,
                input: &probe.input,
                origin: probe.origin,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!(
                "{:<12} {:<28} {:?}",
                probe.strategy,
                probe.id,
                probe.input_preview()
            );
        }
    }
    if !json {
        println!("\n{} probe(s), seed {}", probes.len(), config.seed);
    }
    Ok(())
}

async fn cmd_replay_fuzz(
    category: FuzzCategory,
    seed: u64,
    index: u64,
    transport: Option<&dyn Transport>,
) -> Result<String> {
    let input = fuzz_case(category, seed, index);
    println!("Category: {}", category);
    println!("Length: {} bytes", input.len());
    println!("Input: {:?}", input);

    if let Some(transport) = transport {
        let probe = Probe::new(Strategy::Fuzz, input.clone()).with_origin(FuzzOrigin {
            category,
            seed,
            index,
        });
        let response = transport.send(&probe.input).await;
        let validation = validate(&probe, &response);
        match &response {
            Ok(r) => println!("Status: {}", r.status_code),
            Err(e) => println!("Transport error: {}", e),
        }
        let mark = if validation.verdict == Verdict::Pass {
            "✓"
        } else {
            "✗"
        };
        println!("Verdict: {} {}", mark, validation.verdict);
        if let Some(reason) = &validation.reason {
            println!("Reason: {}", reason);
        }
    }
    Ok(input)
}

async fn cmd_baseline_list(store: &dyn BaselineStore, json: bool) -> Result<()> {
    let baselines = store.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&baselines)?);
        return Ok(());
    }
    if baselines.is_empty() {
        println!("No baselines recorded.");
        return Ok(());
    }
    for b in &baselines {
        println!(
            "  {:<28} top={:<4} count={:<3} recorded {}",
            b.probe_id,
            b.top_prediction_id.as_deref().unwrap_or("-"),
            b.prediction_count,
            b.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} baseline(s)", baselines.len());
    Ok(())
}

async fn cmd_baseline_accept(store: &dyn BaselineStore, report_path: &Path) -> Result<usize> {
    let report = Report::read_json(report_path)?;
    let accepted = accept_baselines(store, &report)
        .await
        .context("Failed to accept baselines")?;
    println!(
        "✓ Accepted {} baseline(s) from run {}",
        accepted, report.run.run_id
    );
    Ok(accepted)
}
