//! Uplink PHY Tester
//!
//! Runs one uplink PHY component on a synthetic waveform described by a TOML
//! scenario and prints the result as JSON.

mod config;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::{Component, ScenarioConfig};
use scenario::NoiseSource;

/// Uplink PHY component tester
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to scenario file
    #[arg(short, long)]
    scenario: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the scenario noise seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Loading scenario {}", args.scenario);
    let scenario = ScenarioConfig::load(&args.scenario)?;
    let seed = args.seed.unwrap_or(scenario.seed);
    info!(
        "Scenario: component={:?}, snr={} dB, seed={}",
        scenario.component, scenario.snr_db, seed
    );

    let mut noise = NoiseSource::new(StdRng::seed_from_u64(seed), scenario.snr_db);
    let report = match scenario.component {
        Component::Prach => {
            let prach = scenario.prach.as_ref().context("Missing [prach] section")?;
            scenario::run_prach(prach, &mut noise)?
        }
        Component::ChannelEstimation => {
            let estimation = scenario
                .channel_estimation
                .as_ref()
                .context("Missing [channel_estimation] section")?;
            scenario::run_channel_estimation(estimation, &mut noise)?
        }
        Component::Pusch => {
            let pusch = scenario.pusch.as_ref().context("Missing [pusch] section")?;
            scenario::run_pusch(pusch, &mut noise)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("Scenario completed");
    Ok(())
}
