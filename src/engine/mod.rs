use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    landscape::Landscape,
    rng::{RngManager, SystemRng},
    snapshot::SnapshotWriter,
    systems::{CleanupSystem, GrowthSystem, LightPatternSystem, LightReadSystem, ProductionSystem},
};

pub struct EngineSettings {
    pub scenario_name: String,
    pub seed: u64,
    pub snapshot_interval_years: u32,
    pub snapshot_dir: PathBuf,
}

pub struct EngineBuilder {
    settings: EngineSettings,
    systems: Vec<Box<dyn System>>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            systems: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn push_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    /// The five phases of a simulation year, in order.
    pub fn annual_cycle(self) -> Self {
        self.with_system(LightPatternSystem::new())
            .with_system(LightReadSystem::new())
            .with_system(ProductionSystem::new())
            .with_system(GrowthSystem::new())
            .with_system(CleanupSystem::new())
    }

    pub fn build(self) -> Engine {
        Engine {
            rng: RngManager::new(self.settings.seed),
            systems: self.systems,
            snapshot_writer: SnapshotWriter::new(
                &self.settings.snapshot_dir,
                self.settings.snapshot_interval_years,
            ),
            settings: self.settings,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
}

/// What happened in one simulated year.
#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub year: u32,
    pub living_trees: usize,
    pub deaths: u64,
    pub duration: Duration,
    pub phases: Vec<PhaseTiming>,
    pub snapshot: Option<PathBuf>,
}

pub struct Engine {
    rng: RngManager,
    systems: Vec<Box<dyn System>>,
    snapshot_writer: SnapshotWriter,
    settings: EngineSettings,
}

impl Engine {
    pub fn run(&mut self, landscape: &mut Landscape, years: u32) -> Result<()> {
        self.run_with_hook(landscape, years, |_| {})
    }

    /// Runs `years` years, calling `hook` after each one. The first error
    /// aborts the run.
    pub fn run_with_hook<F>(&mut self, landscape: &mut Landscape, years: u32, mut hook: F) -> Result<()>
    where
        F: FnMut(&YearSummary),
    {
        if landscape.year() == 0 {
            landscape.context.reset();
            debug!(trees = landscape.living_trees(), "run started");
        }
        for _ in 0..years {
            let year = landscape.year() + 1;
            let deaths_before = landscape.context.statistics().deaths();
            let started = Instant::now();
            let mut phases = Vec::with_capacity(self.systems.len());
            for system in &mut self.systems {
                let mut rng_stream = self.rng.stream(system.name());
                let ctx = SystemContext {
                    year,
                    scenario_name: &self.settings.scenario_name,
                };
                let phase_started = Instant::now();
                system
                    .run(&ctx, landscape, &mut rng_stream)
                    .with_context(|| format!("{} phase failed in year {year}", system.name()))?;
                let duration = phase_started.elapsed();
                debug!(
                    year,
                    phase = system.name(),
                    ms = duration.as_secs_f64() * 1000.0,
                    "phase finished"
                );
                phases.push(PhaseTiming {
                    name: system.name().to_string(),
                    duration,
                });
            }
            landscape.advance_time();
            let snapshot = self
                .snapshot_writer
                .maybe_write(landscape, &self.settings.scenario_name)?;

            let summary = YearSummary {
                year: landscape.year(),
                living_trees: landscape.living_trees(),
                deaths: landscape.context.statistics().deaths() - deaths_before,
                duration: started.elapsed(),
                phases,
                snapshot,
            };
            info!(
                year = summary.year,
                living_trees = summary.living_trees,
                deaths = summary.deaths,
                ms = summary.duration.as_secs_f64() * 1000.0,
                "year finished"
            );
            hook(&summary);
        }
        Ok(())
    }
}

pub struct SystemContext<'a> {
    /// The year being simulated, starting at 1.
    pub year: u32,
    pub scenario_name: &'a str,
}

pub trait System {
    fn name(&self) -> &str;
    fn run(
        &mut self,
        ctx: &SystemContext,
        landscape: &mut Landscape,
        rng: &mut SystemRng<'_>,
    ) -> Result<()>;
}
