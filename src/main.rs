use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sylva::{
    engine::{EngineBuilder, EngineSettings},
    scenario::ScenarioLoader,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Individual-tree forest growth simulator")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/single_stand.yaml")]
    scenario: PathBuf,

    /// Override the number of simulated years
    #[arg(long)]
    years: Option<u32>,

    /// Override snapshot interval in years (0 disables snapshots)
    #[arg(long)]
    snapshot_interval: Option<u32>,

    /// Directory for snapshots
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Worker threads (defaults to the number of cores)
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sylva=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?;
    let mut landscape = scenario.build_landscape()?;
    let years = scenario.years(cli.years);
    let snapshot_interval = cli
        .snapshot_interval
        .unwrap_or(scenario.snapshot_interval_years);
    let snapshot_dir = cli
        .snapshot_dir
        .unwrap_or_else(|| PathBuf::from("snapshots"));

    let settings = EngineSettings {
        scenario_name: scenario.name.clone(),
        seed: scenario.seed,
        snapshot_interval_years: snapshot_interval,
        snapshot_dir,
    };
    let mut engine = EngineBuilder::new(settings).annual_cycle().build();
    engine.run(&mut landscape, years)?;

    let stats = landscape.context.statistics();
    println!(
        "Scenario '{}' completed for {} years. Living trees: {}, deaths: {}, best-effort diameter solutions: {}",
        scenario.name,
        years,
        landscape.living_trees(),
        stats.deaths(),
        stats.solver_best_effort
    );
    Ok(())
}
