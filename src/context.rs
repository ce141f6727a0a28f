use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::tree::{DeathCause, TreeId};

/// Run-wide state shared by all resource units: the tree id counter and
/// diagnostic counters. Counters are atomic so parallel phases can record
/// without locking.
#[derive(Debug, Default)]
pub struct SimulationContext {
    next_tree_id: AtomicU64,
    trees_created: AtomicU64,
    stamp_applications: AtomicU64,
    solver_best_effort: AtomicU64,
    deaths_intrinsic: AtomicU64,
    deaths_stress: AtomicU64,
    deaths_disturbance: AtomicU64,
    deaths_harvested: AtomicU64,
    deaths_cut_down: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunStatistics {
    pub trees_created: u64,
    pub stamp_applications: u64,
    pub solver_best_effort: u64,
    pub deaths_intrinsic: u64,
    pub deaths_stress: u64,
    pub deaths_disturbance: u64,
    pub deaths_harvested: u64,
    pub deaths_cut_down: u64,
}

impl RunStatistics {
    pub fn deaths(&self) -> u64 {
        self.deaths_intrinsic
            + self.deaths_stress
            + self.deaths_disturbance
            + self.deaths_harvested
            + self.deaths_cut_down
    }
}

impl SimulationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the run counters when a run starts. Tree ids keep counting so
    /// trees planted during setup stay unique.
    pub fn reset(&self) {
        for counter in [
            &self.trees_created,
            &self.stamp_applications,
            &self.solver_best_effort,
            &self.deaths_intrinsic,
            &self.deaths_stress,
            &self.deaths_disturbance,
            &self.deaths_harvested,
            &self.deaths_cut_down,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn next_tree_id(&self) -> TreeId {
        self.trees_created.fetch_add(1, Ordering::Relaxed);
        TreeId::new(self.next_tree_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn record_stamp_applications(&self, count: u64) {
        self.stamp_applications.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_solver_best_effort(&self) {
        self.solver_best_effort.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_death(&self, cause: &DeathCause) {
        let counter = match cause {
            DeathCause::Intrinsic => &self.deaths_intrinsic,
            DeathCause::Stress => &self.deaths_stress,
            DeathCause::Disturbance(_) => &self.deaths_disturbance,
            DeathCause::Harvested(_) => &self.deaths_harvested,
            DeathCause::CutDown => &self.deaths_cut_down,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statistics(&self) -> RunStatistics {
        RunStatistics {
            trees_created: self.trees_created.load(Ordering::Relaxed),
            stamp_applications: self.stamp_applications.load(Ordering::Relaxed),
            solver_best_effort: self.solver_best_effort.load(Ordering::Relaxed),
            deaths_intrinsic: self.deaths_intrinsic.load(Ordering::Relaxed),
            deaths_stress: self.deaths_stress.load(Ordering::Relaxed),
            deaths_disturbance: self.deaths_disturbance.load(Ordering::Relaxed),
            deaths_harvested: self.deaths_harvested.load(Ordering::Relaxed),
            deaths_cut_down: self.deaths_cut_down.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_stay_unique_across_a_reset() {
        let ctx = SimulationContext::new();
        let a = ctx.next_tree_id();
        let b = ctx.next_tree_id();
        assert_ne!(a, b);
        ctx.record_death(&DeathCause::Stress);
        assert_eq!(ctx.statistics().trees_created, 2);
        assert_eq!(ctx.statistics().deaths(), 1);

        ctx.reset();
        assert_eq!(ctx.statistics(), RunStatistics::default());
        let c = ctx.next_tree_id();
        assert!(c != a && c != b);
        assert_eq!(ctx.statistics().trees_created, 1);
    }
}
