//! Receiving side for dead biomass.
//!
//! The growth core only hands biomass over; decay and soil dynamics live
//! elsewhere. `SnagLedger` keeps cumulative totals per destination.

use serde::{Deserialize, Serialize};

/// Biomass of a tree (kg) at the moment it leaves the living stand.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TreeBiomass {
    pub species: usize,
    pub stem: f64,
    pub branch: f64,
    pub foliage: f64,
    pub fine_root: f64,
    pub coarse_root: f64,
}

impl TreeBiomass {
    pub fn total(&self) -> f64 {
        self.stem + self.branch + self.foliage + self.fine_root + self.coarse_root
    }
}

/// Shares of a harvested tree taken off site.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HarvestFractions {
    pub stem_removed: f64,
    pub branch_removed: f64,
    pub foliage_removed: f64,
}

impl HarvestFractions {
    /// Regular harvest: stems leave the site, crowns stay.
    pub fn stem_only() -> Self {
        Self {
            stem_removed: 1.0,
            ..Self::default()
        }
    }
}

/// Routing of a tree killed by a disturbance agent. Whatever is neither
/// sent to soil nor snags is lost to the disturbance (e.g. burnt).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DisturbanceFractions {
    pub stem_to_soil: f64,
    pub stem_to_snag: f64,
    pub branch_to_soil: f64,
    pub branch_to_snag: f64,
    pub foliage_to_soil: f64,
}

pub trait CarbonSink: Send {
    /// Yearly senescence of foliage and fine roots.
    fn add_turnover_litter(&mut self, species: usize, foliage: f64, fine_root: f64);
    /// Woody turnover (coarse roots above their allometric maximum).
    fn add_turnover_wood(&mut self, species: usize, woody: f64);
    fn add_mortality(&mut self, tree: &TreeBiomass);
    fn add_harvest(&mut self, tree: &TreeBiomass, fractions: &HarvestFractions);
    fn add_disturbance(&mut self, tree: &TreeBiomass, fractions: &DisturbanceFractions);
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SnagLedger {
    /// Standing dead wood.
    pub snags: f64,
    /// Litter and dead roots on or in the soil.
    pub soil: f64,
    /// Biomass taken off site by management.
    pub extern_removed: f64,
    /// Biomass consumed by disturbances.
    pub disturbance_loss: f64,
    pub died: u32,
    pub harvested: u32,
    pub disturbed: u32,
}

impl SnagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> f64 {
        self.snags + self.soil + self.extern_removed + self.disturbance_loss
    }

    fn roots_to_soil(&mut self, tree: &TreeBiomass) {
        self.soil += tree.fine_root + tree.coarse_root;
    }
}

impl CarbonSink for SnagLedger {
    fn add_turnover_litter(&mut self, _species: usize, foliage: f64, fine_root: f64) {
        self.soil += foliage + fine_root;
    }

    fn add_turnover_wood(&mut self, _species: usize, woody: f64) {
        self.soil += woody;
    }

    fn add_mortality(&mut self, tree: &TreeBiomass) {
        self.died += 1;
        self.roots_to_soil(tree);
        self.snags += tree.stem + tree.branch;
        self.soil += tree.foliage;
    }

    fn add_harvest(&mut self, tree: &TreeBiomass, fractions: &HarvestFractions) {
        self.harvested += 1;
        self.roots_to_soil(tree);
        let removed = tree.stem * fractions.stem_removed
            + tree.branch * fractions.branch_removed
            + tree.foliage * fractions.foliage_removed;
        self.extern_removed += removed;
        self.soil += tree.stem + tree.branch + tree.foliage - removed;
    }

    fn add_disturbance(&mut self, tree: &TreeBiomass, fractions: &DisturbanceFractions) {
        self.disturbed += 1;
        self.roots_to_soil(tree);
        let to_soil = tree.stem * fractions.stem_to_soil
            + tree.branch * fractions.branch_to_soil
            + tree.foliage * fractions.foliage_to_soil;
        let to_snag = tree.stem * fractions.stem_to_snag + tree.branch * fractions.branch_to_snag;
        self.soil += to_soil;
        self.snags += to_snag;
        self.disturbance_loss += tree.stem + tree.branch + tree.foliage - to_soil - to_snag;
    }
}
