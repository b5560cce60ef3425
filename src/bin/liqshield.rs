//! liqshield CLI
//!
//! Command-line interface for configuring and inspecting the protection engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::{style, Term};
use serde::Deserialize;

use liqshield::core::config::ShieldConfig;
use liqshield::core::position::PositionSnapshot;
use liqshield::core::subscription::{ProtectionType, Subscription, SubscriptionRequest};
use liqshield::dispatch::{CommandQueue, DispatchDecision, DomainEvent, EventDispatcher};
use liqshield::lending::{InMemoryLending, InMemoryVault, LendingProtocol};
use liqshield::monitoring::MetricsCollector;
use liqshield::protection::{ProtectionOrchestrator, RemediationPlanner};
use liqshield::risk::{RiskClassifier, RiskModel};
use liqshield::storage::{FileStore, StateManager};
use liqshield::utils::ids::{Address, AssetId, MarketId};
use liqshield::utils::math::{apply_bps, FixedPoint};
use liqshield::utils::time::{format_timestamp, unix_now};

/// liqshield - automated liquidation protection
#[derive(Parser)]
#[command(name = "liqshield")]
#[command(author = "liqshield Team")]
#[command(version = liqshield::VERSION)]
#[command(about = "Command-line interface for the liqshield protection engine", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "LIQSHIELD_DATA_DIR", default_value = "~/.liqshield")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration to the data directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,

        /// Use short testnet windows
        #[arg(long)]
        testnet: bool,
    },

    /// Configuration operations
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Explain the risk of a position snapshot
    Analyze {
        /// JSON file with a `snapshot` and an optional `subscription`
        file: PathBuf,

        /// Position age in seconds (unknown when omitted)
        #[arg(long)]
        age: Option<u64>,
    },

    /// Run the monitor and execution loop against an in-memory market
    Simulate {
        /// Periodic ticks to simulate
        #[arg(short, long, default_value = "12")]
        ticks: u64,

        /// Subscribed borrowers
        #[arg(short, long, default_value = "5")]
        users: u64,

        /// Collateral value lost per tick, in basis points
        #[arg(long, default_value = "150")]
        drop_bps: u64,
    },

    /// Dispatcher and subscription status from the data directory
    Status,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

/// Input accepted by `analyze`
#[derive(Deserialize)]
struct AnalyzeInput {
    snapshot: PositionSnapshot,
    #[serde(default)]
    subscription: Option<SubscriptionRequest>,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let term = Term::stdout();

    if let Err(e) = run_command(&cli, &term) {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init { force, testnet } => cmd_init(cli, *force, *testnet, term),
        Commands::Config(ConfigCommands::Show) => cmd_config_show(cli, term),
        Commands::Analyze { file, age } => cmd_analyze(cli, file, *age, term),
        Commands::Simulate { ticks, users, drop_bps } => {
            cmd_simulate(cli, *ticks, *users, *drop_bps, term)
        }
        Commands::Status => cmd_status(cli, term),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_init(cli: &Cli, force: bool, testnet: bool, term: &Term) -> anyhow::Result<()> {
    let _ = term.write_line(&format!(
        "{} Initializing liqshield configuration...",
        style("→").cyan()
    ));

    let data_dir = expand_path(&cli.data_dir)?;
    let config_path = data_dir.join("config.json");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let mut config = if testnet { ShieldConfig::testnet() } else { ShieldConfig::default() };
    config.data_dir = data_dir.join("state");
    config.save(&config_path)?;

    let _ = term.write_line(&format!(
        "{} Configuration created at: {}",
        style("✓").green(),
        config_path.display()
    ));
    let _ = term.write_line(&format!(
        "{} Trusted sender: {}",
        style("ℹ").blue(),
        style(config.trusted_sender.to_hex()).yellow()
    ));
    Ok(())
}

fn cmd_config_show(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let _ = term.write_line(&serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_analyze(cli: &Cli, file: &Path, age: Option<u64>, term: &Term) -> anyhow::Result<()> {
    let input: AnalyzeInput = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    let snapshot = input.snapshot;
    let now = unix_now();

    let threshold = input
        .subscription
        .as_ref()
        .map(|s| s.health_factor_threshold)
        .unwrap_or(FixedPoint::ONE);
    let analysis = RiskClassifier::classify(RiskModel::assess(&snapshot, age), threshold);
    let metrics = &analysis.metrics;

    let _ = term.write_line(&format!(
        "{} Position {} in {}",
        style("→").cyan(),
        style(snapshot.user.short()).yellow(),
        snapshot.market.short()
    ));
    let _ = term.write_line(&format!("  Health factor: {}", style(render_ratio(analysis.health_factor())).bold()));
    let _ = term.write_line(&format!("  LTV:           {:.2}%", metrics.ltv_bps as f64 / 100.0));
    let _ = term.write_line(&format!("  Leverage:      {}", render_ratio(metrics.leverage_ratio)));
    let _ = term.write_line(&format!("  Category:      {}", analysis.category.name()));
    let _ = term.write_line(&format!("  Reason:        {}", analysis.reason()));
    if cli.verbose {
        let _ = term.write_line(&format!("  Metrics:       {}", serde_json::to_string(metrics)?));
    }

    let verdict = if analysis.protection_needed {
        style("protection needed").red().bold()
    } else {
        style("healthy").green().bold()
    };
    let _ = term.write_line(&format!("  Verdict:       {}", verdict));

    if let Some(request) = input.subscription {
        request.validate()?;
        let subscription = Subscription::new(snapshot.user, request, now);
        let plan = RemediationPlanner::plan(&analysis, &subscription);
        if analysis.protection_needed && !plan.is_empty() {
            let estimate = RemediationPlanner::estimate_health_factor(
                &analysis,
                plan.amount,
                subscription.max_protection_amount,
            );
            let _ = term.write_line(&format!(
                "{} Plan: {:?} of {} (estimated health factor {})",
                style("ℹ").blue(),
                plan.action,
                style(plan.amount).cyan(),
                render_ratio(estimate)
            ));
        }
    }
    Ok(())
}

fn cmd_simulate(cli: &Cli, ticks: u64, users: u64, drop_bps: u64, term: &Term) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let lending = Arc::new(InMemoryLending::new());
    let vault = Arc::new(InMemoryVault::new());
    let metrics = Arc::new(MetricsCollector::new());
    let market = MarketId::derive("sim.weth-usdc");
    let usdc = AssetId::derive("sim.usdc");
    lending.add_market(market, AssetId::derive("sim.weth"), usdc)?;

    let orchestrator = ProtectionOrchestrator::new(&config, lending.clone(), vault.clone(), metrics.clone());
    let queue = Arc::new(CommandQueue::new());
    let mut dispatcher = EventDispatcher::new(
        config.dispatch.clone(),
        config.trusted_sender,
        config.operator,
        queue.clone(),
        metrics.clone(),
    );
    dispatcher.add_market(config.operator, market)?;

    let mut now = unix_now();
    let mut borrowers = Vec::new();
    for i in 0..users {
        let user = Address::derive(&format!("sim.user.{}", i));
        let debt = 5_000 + 500 * i as u128;
        lending.set_position(PositionSnapshot::simple(user, market, 10_000, debt))?;
        vault.mint(user, usdc, 5_000)?;
        vault.approve(user, config.engine, usdc, 5_000)?;
        orchestrator.subscribe(
            user,
            SubscriptionRequest {
                market,
                protection_type: ProtectionType::CollateralOnly,
                health_factor_threshold: FixedPoint::from_bps(13_000),
                target_health_factor: FixedPoint::from_bps(16_000),
                protection_asset: usdc,
                max_protection_amount: 1_500,
            },
            now,
        )?;
        borrowers.push(user);
    }

    let _ = term.write_line(&format!(
        "{} Simulating {} ticks, {} borrowers, -{} bps per tick",
        style("→").cyan(),
        ticks,
        users,
        drop_bps
    ));

    for tick in 1..=ticks {
        now += config.dispatch.periodic_interval_secs;
        for user in &borrowers {
            let mut position = lending.get_position(*user, market)?;
            position.deposits.y -= apply_bps(position.deposits.y, drop_bps);
            lending.set_position(position)?;
        }

        if let DispatchDecision::Dispatched { .. } = dispatcher.handle(DomainEvent::Tick, now)? {
            for envelope in queue.drain()? {
                let summary = orchestrator.handle_command(&envelope, now)?;
                let _ = term.write_line(&format!(
                    "  tick {:>3}  checked {:>3}  executed {:>3}  failed {:>3}",
                    tick, summary.checked, summary.executed, summary.failed
                ));
                if envelope.command.is_cycle() {
                    dispatcher.handle(
                        DomainEvent::CycleCompleted {
                            checked: summary.checked,
                            executed: summary.executed,
                            failed: summary.failed,
                        },
                        now,
                    )?;
                }
            }
        }
    }

    let stats = orchestrator.statistics(now)?;
    let _ = term.write_line(&format!("\n{} Final state", style("✓").green()));
    let _ = term.write_line(&format!(
        "  Average health factor: {}",
        stats.average_health_factor.map(render_ratio).unwrap_or_else(|| "n/a".into())
    ));
    let _ = term.write_line(&format!("  At risk:               {}", stats.at_risk_count));
    let _ = term.write_line(&format!("  Immediate action:      {}", stats.immediate_action_count));
    for (name, value) in metrics.counters() {
        let _ = term.write_line(&format!("  {:<28} {}", name, value));
    }
    Ok(())
}

fn cmd_status(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let state = StateManager::shared(FileStore::open(&config.data_dir)?);
    let subscriptions = state.load_subscriptions()?;
    let dispatch = state.load_dispatch_state()?.unwrap_or_default();
    let now = unix_now();

    let _ = term.write_line(&format!("{} liqshield {}", style("→").cyan(), liqshield::VERSION));
    let _ = term.write_line(&format!("  Data directory:     {}", config.data_dir.display()));
    let _ = term.write_line(&format!("  Subscriptions:      {}", subscriptions.iter().filter(|s| s.active).count()));
    let _ = term.write_line(&format!("  Monitored markets:  {}", dispatch.monitored_markets.len()));
    let _ = term.write_line(&format!("  Last periodic:      {}", render_time(dispatch.last_periodic)));
    let _ = term.write_line(&format!("  Last emergency:     {}", render_time(dispatch.last_emergency)));

    match dispatch.in_flight_for(now) {
        Some(elapsed) if elapsed > config.dispatch.stale_after_secs() => {
            let _ = term.write_line(&format!(
                "  Cycle:              {} ({}s, force-clear allowed)",
                style("stalled").red().bold(),
                elapsed
            ));
        }
        Some(elapsed) => {
            let _ = term.write_line(&format!("  Cycle:              {} ({}s)", style("in flight").yellow(), elapsed));
        }
        None => {
            let _ = term.write_line(&format!("  Cycle:              {}", style("idle").green()));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn expand_path(path: &Path) -> anyhow::Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str.starts_with('~') {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(path_str.replacen('~', &home, 1)))
    } else {
        Ok(path.to_path_buf())
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ShieldConfig> {
    let data_dir = expand_path(&cli.data_dir)?;
    let config_path = data_dir.join("config.json");

    if config_path.exists() {
        Ok(ShieldConfig::load(&config_path)?)
    } else {
        Ok(ShieldConfig { data_dir: data_dir.join("state"), ..ShieldConfig::default() })
    }
}

fn render_ratio(value: FixedPoint) -> String {
    if value.is_infinite() {
        return "∞".into();
    }
    match value.to_decimal() {
        Some(d) => d.round_dp(4).to_string(),
        None => value.to_string(),
    }
}

fn render_time(ts: Option<u64>) -> String {
    ts.map(format_timestamp).unwrap_or_else(|| "never".into())
}
