//! # sharegroup soak runner
//!
//! Builds and tears down sharing groups on the headless backend, then
//! audits the registry. Exits non-zero when anything leaked.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use sharegroup::config::{SharegroupConfig, TeardownOrder};
use sharegroup::logging::{self, LogLevel};
use sharegroup::soak::SoakRunner;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

#[derive(Parser)]
#[command(name = "sharegroup")]
#[command(about = "Soak-tests shared rendering-context lifecycles and audits for leaks")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/sharegroup/sharegroup.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override the number of iterations
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Override the number of groups per iteration
    #[arg(short, long)]
    groups: Option<usize>,

    /// Override the number of targets per group, master included
    #[arg(short, long)]
    members: Option<usize>,

    /// Teardown order: creation, reverse or shuffled
    #[arg(long)]
    teardown: Option<String>,

    /// Seed for shuffled teardown
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the mid-run context transplant
    #[arg(long)]
    no_transplant: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_config: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("❌ {:#}", e);
            eprintln!("sharegroup: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the soak was clean.
fn run(cli: Cli) -> Result<bool> {
    let (mut config, loaded) = match SharegroupConfig::load(&cli.config) {
        Ok(config) => (config, Ok(())),
        Err(e) => (SharegroupConfig::default(), Err(e)),
    };

    let mut logging_config = config.logging.clone();
    if cli.debug {
        logging_config = logging_config.with_level(LogLevel::Debug);
    }
    logging::init_logging(&logging_config);

    info!("🚀 Starting sharegroup soak runner");
    info!(
        "📄 Version: {} ({}, built {})",
        sharegroup::VERSION,
        option_env!("GIT_COMMIT").unwrap_or("unknown commit"),
        option_env!("BUILD_DATE").unwrap_or("unknown date")
    );
    match loaded {
        Ok(()) => info!("✅ Configuration loaded from: {}", cli.config),
        Err(e) => {
            warn!("⚠️ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
        }
    }

    apply_overrides(&cli, &mut config)?;
    config.validate().context("Invalid configuration after CLI overrides")?;

    if let Some(path) = &cli.write_config {
        config.save(path)?;
        info!("💾 Configuration written to {}", path);
        return Ok(true);
    }

    let runner = SoakRunner::new(config)?;
    let stop = runner.stop_handle();
    ctrlc::set_handler(move || {
        warn!("🛑 Interrupt received, stopping after the current iteration");
        stop.store(true, Ordering::Relaxed);
    })
    .context("Failed to install Ctrl-C handler")?;

    let report = runner.run()?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.audit);
    }
    Ok(report.is_clean())
}

fn apply_overrides(cli: &Cli, config: &mut SharegroupConfig) -> Result<()> {
    if let Some(iterations) = cli.iterations {
        config.soak.iterations = iterations;
    }
    if let Some(groups) = cli.groups {
        config.soak.groups = groups;
    }
    if let Some(members) = cli.members {
        config.soak.members_per_group = members;
    }
    if let Some(order) = &cli.teardown {
        config.soak.teardown_order = parse_teardown(order)?;
    }
    if let Some(seed) = cli.seed {
        config.soak.seed = Some(seed);
    }
    if cli.no_transplant {
        config.soak.transplant = false;
        info!("🚫 Transplant disabled via CLI flag");
    }
    Ok(())
}

fn parse_teardown(value: &str) -> Result<TeardownOrder> {
    match value.to_lowercase().as_str() {
        "creation" => Ok(TeardownOrder::Creation),
        "reverse" => Ok(TeardownOrder::Reverse),
        "shuffled" | "shuffle" | "random" => Ok(TeardownOrder::Shuffled),
        other => anyhow::bail!("Invalid teardown order: {}", other),
    }
}
