//! cirrusd: multi-cloud utilization auditing daemon
//!
//! Runs one collection job per cloud provider on a cron schedule, writes each
//! run's recommendations and errors under a fresh generation, and prints the
//! latest generation on demand.

use anyhow::Context;
use cirrus_persist::{latest_errors, latest_inventories, latest_recommendations};
use cirrus_proto::{ProfileId, Provider};
use cirrus_sched::Scheduler;
use cirrusd::{DaemonConfig, GenerationJob, build_collector, load_fixture, open_gateway, register_jobs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "cirrusd")]
#[command(about = "Multi-cloud utilization auditing daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/cirrus/cirrusd.json")]
        config: PathBuf,
    },

    /// Run one generation for a provider now and print its summary
    RunOnce {
        #[arg(short, long, default_value = "/etc/cirrus/cirrusd.json")]
        config: PathBuf,

        /// aws, gcp, oci or hetzner
        #[arg(short, long)]
        provider: Provider,
    },

    /// Print the latest (or a given) generation of a provider as JSON
    ///
    /// Examples:
    ///   cirrusd show --provider gcp
    ///   cirrusd show --provider aws --generation 12 --profile <uuid>
    ///   cirrusd show --provider aws --inventory
    Show {
        #[arg(short, long, default_value = "/etc/cirrus/cirrusd.json")]
        config: PathBuf,

        #[arg(short, long)]
        provider: Provider,

        /// Historical generation instead of the latest
        #[arg(long)]
        generation: Option<u64>,

        /// Restrict to these profiles (repeatable)
        #[arg(long = "profile")]
        profiles: Vec<ProfileId>,

        /// Print errors instead of recommendations
        #[arg(long, conflicts_with = "inventory")]
        errors: bool,

        /// Print per-profile resource counts instead of recommendations
        #[arg(long)]
        inventory: bool,
    },

    /// Generate a default config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/cirrus/cirrusd.json")]
        output: PathBuf,

        /// State directory for the JSON store
        #[arg(long, default_value = "/var/lib/cirrus")]
        state_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Keep stdout clean for commands that print JSON or text
    if matches!(cli.command, Commands::Serve { .. } | Commands::RunOnce { .. }) {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(
                EnvFilter::from_default_env()
                    .add_directive("cirrusd=info".parse()?)
                    .add_directive("cirrus_collect=info".parse()?)
                    .add_directive("cirrus_sched=info".parse()?),
            )
            .init();
    }

    match cli.command {
        Commands::Serve { config } => {
            serve(config).await?;
        }
        Commands::RunOnce { config, provider } => {
            run_once(config, provider).await?;
        }
        Commands::Show {
            config,
            provider,
            generation,
            profiles,
            errors,
            inventory,
        } => {
            let view = match (errors, inventory) {
                (true, _) => View::Errors,
                (_, true) => View::Inventory,
                _ => View::Recommendations,
            };
            show(config, provider, generation, profiles, view).await?;
        }
        Commands::InitConfig { output, state_path } => {
            init_config(output, state_path)?;
        }
    }

    Ok(())
}

// ─── Serve ────────────────────────────────────────────────────────────────────

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting cirrusd");

    let config = DaemonConfig::load(&config_path)?;
    let gateway = open_gateway(&config)?;
    let fixture = load_fixture(&config)?;
    info!(
        state = %config.state_path.display(),
        providers = config.enabled_providers().count(),
        fixture = fixture.is_some(),
        "loaded config"
    );

    let shutdown = CancellationToken::new();
    let mut scheduler = Scheduler::new().await?;
    let registered = register_jobs(&mut scheduler, &config, gateway, fixture.as_ref(), &shutdown).await;
    if registered == 0 {
        warn!("no jobs registered; waiting for shutdown anyway");
    }
    scheduler.start().await?;
    info!(jobs = ?scheduler.registered(), "scheduler running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested, cancelling in-flight runs");
    shutdown.cancel();
    scheduler.shutdown().await?;
    Ok(())
}

// ─── RunOnce ──────────────────────────────────────────────────────────────────

async fn run_once(config_path: PathBuf, provider: Provider) -> anyhow::Result<()> {
    let config = DaemonConfig::load(&config_path)?;
    let job = config
        .provider(provider)
        .with_context(|| format!("provider {provider} is not configured"))?;
    let gateway = open_gateway(&config)?;
    let fixture = load_fixture(&config)?;
    let collector = build_collector(&config, fixture.as_ref(), provider)?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let job = GenerationJob::new(gateway, collector, job.limits(), shutdown);
    let summary = job.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.fully_written() {
        anyhow::bail!("generation {} was only partially written", summary.generation);
    }
    Ok(())
}

// ─── Show ─────────────────────────────────────────────────────────────────────

enum View {
    Recommendations,
    Errors,
    Inventory,
}

async fn show(
    config_path: PathBuf,
    provider: Provider,
    generation: Option<u64>,
    profiles: Vec<ProfileId>,
    view: View,
) -> anyhow::Result<()> {
    let config = DaemonConfig::load(&config_path)?;
    let gateway = open_gateway(&config)?;
    let generation = generation.map(cirrus_proto::Generation);
    let gateway = gateway.as_ref();

    let out = match view {
        View::Recommendations => serde_json::to_string_pretty(
            &latest_recommendations(gateway, provider, &profiles, generation).await?,
        )?,
        View::Errors => serde_json::to_string_pretty(
            &latest_errors(gateway, provider, &profiles, generation).await?,
        )?,
        View::Inventory => serde_json::to_string_pretty(
            &latest_inventories(gateway, provider, &profiles, generation).await?,
        )?,
    };
    println!("{out}");
    Ok(())
}

// ─── InitConfig ───────────────────────────────────────────────────────────────

fn init_config(output: PathBuf, state_path: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig {
        state_path,
        ..DaemonConfig::default()
    };

    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Add profiles to {}/state/profiles.json, then run:", config.state_path.display());
    println!("  cirrusd serve --config {}", output.display());

    Ok(())
}
