//! Individual trees: state, setup, and the alive -> dead transition.
//!
//! Stamping and reading the light grid lives in [`light`], yearly growth and
//! mortality in [`growth`].

pub mod growth;
pub mod light;

use std::fmt;

use serde::Serialize;

use crate::context::SimulationContext;
use crate::error::{Result, SimError};
use crate::grid::GridPoint;
use crate::snag::{CarbonSink, DisturbanceFractions, HarvestFractions, TreeBiomass};
use crate::species::Species;
use crate::stamp::{Stamp, StampStore};

pub use growth::{GrowthEnv, GrowthTotals};
pub use light::Boundary;

/// Dimensions accepted for new trees.
const MAX_DBH: f64 = 500.0;
const MAX_HEIGHT: f64 = 150.0;
/// Diameter increment (cm) assumed for the first year's linearization.
const INITIAL_DBH_DELTA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TreeId(u64);

impl TreeId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a tree died. Set once, when the tree leaves the living stand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DeathCause {
    Intrinsic,
    Stress,
    Disturbance(DisturbanceFractions),
    Harvested(HarvestFractions),
    CutDown,
}

/// Markers owned by management rules; growth never reads or writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TreeMarks {
    pub for_harvest: bool,
    pub for_cut: bool,
    pub crop_tree: bool,
    pub crop_competitor: bool,
}

/// Description of a tree to be created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeInit {
    pub species: usize,
    /// Light cell of the stem.
    pub position: GridPoint,
    /// cm
    pub dbh: f64,
    /// m
    pub height: f64,
    /// Years; estimated from height when absent or zero.
    pub age: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    id: TreeId,
    species: usize,
    unit: usize,
    position: GridPoint,
    dbh: f64,
    height: f64,
    age: u32,
    foliage_mass: f64,
    woody_mass: f64,
    fine_root_mass: f64,
    coarse_root_mass: f64,
    npp_reserve: f64,
    leaf_area: f64,
    opacity: f64,
    dbh_delta: f64,
    light_resource_index: f64,
    light_response: f64,
    stress_index: f64,
    stamp: usize,
    death: Option<DeathCause>,
    marks: TreeMarks,
}

impl Tree {
    /// Creates a tree with allometric biomass pools for its dimensions.
    pub fn new(
        id: TreeId,
        init: &TreeInit,
        unit: usize,
        species: &Species,
        stamps: &StampStore,
        opacity_coefficient: f64,
    ) -> Result<Self> {
        validate_dimensions(id, init.dbh, init.height)?;
        let age = match init.age {
            Some(age) if age > 0 => age,
            _ => species.estimate_age(init.height),
        };
        let foliage = species.biomass_foliage(init.dbh);
        let frf = species.fineroot_foliage_ratio();
        let mut tree = Self {
            id,
            species: species.index(),
            unit,
            position: init.position,
            dbh: init.dbh,
            height: init.height,
            age,
            foliage_mass: foliage,
            woody_mass: species.biomass_woody(init.dbh),
            fine_root_mass: foliage * frf,
            coarse_root_mass: species.biomass_coarse_root(init.dbh),
            npp_reserve: (1.0 + frf) * foliage,
            leaf_area: foliage * species.specific_leaf_area(),
            opacity: 0.0,
            dbh_delta: INITIAL_DBH_DELTA,
            light_resource_index: 0.0,
            light_response: 0.0,
            stress_index: 0.0,
            stamp: 0,
            death: None,
            marks: TreeMarks::default(),
        };
        tree.refresh_stamp(species, stamps, opacity_coefficient)?;
        Ok(tree)
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn species(&self) -> usize {
        self.species
    }

    /// Index of the owning resource unit.
    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn position(&self) -> GridPoint {
        self.position
    }

    pub fn dbh(&self) -> f64 {
        self.dbh
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn foliage_mass(&self) -> f64 {
        self.foliage_mass
    }

    pub fn woody_mass(&self) -> f64 {
        self.woody_mass
    }

    pub fn fine_root_mass(&self) -> f64 {
        self.fine_root_mass
    }

    pub fn coarse_root_mass(&self) -> f64 {
        self.coarse_root_mass
    }

    pub fn npp_reserve(&self) -> f64 {
        self.npp_reserve
    }

    /// Sum of all living pools including the reserve (kg).
    pub fn total_mass(&self) -> f64 {
        self.foliage_mass
            + self.woody_mass
            + self.fine_root_mass
            + self.coarse_root_mass
            + self.npp_reserve
    }

    pub fn leaf_area(&self) -> f64 {
        self.leaf_area
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    /// Last diameter increment (cm).
    pub fn dbh_delta(&self) -> f64 {
        self.dbh_delta
    }

    pub fn light_resource_index(&self) -> f64 {
        self.light_resource_index
    }

    pub fn light_response(&self) -> f64 {
        self.light_response
    }

    pub fn stress_index(&self) -> f64 {
        self.stress_index
    }

    /// Index of the writer stamp within the species' stamp set.
    pub fn stamp(&self) -> usize {
        self.stamp
    }

    pub fn writer_stamp<'s>(&self, stamps: &'s StampStore) -> Result<&'s Stamp> {
        stamps
            .writer(self.species, self.stamp)
            .ok_or_else(|| self.missing_stamp(stamps))
    }

    pub fn reader_stamp<'s>(&self, stamps: &'s StampStore) -> Result<&'s Stamp> {
        let writer = self.writer_stamp(stamps)?;
        stamps
            .reader(writer)
            .ok_or_else(|| self.missing_stamp(stamps))
    }

    /// Crown radius of the current stamp (m).
    pub fn crown_radius(&self, stamps: &StampStore) -> Result<f64> {
        Ok(f64::from(self.writer_stamp(stamps)?.crown_radius()))
    }

    pub fn basal_area(&self) -> f64 {
        let r = self.dbh / 200.0;
        std::f64::consts::PI * r * r
    }

    pub fn volume(&self, species: &Species) -> f64 {
        let d = self.dbh / 100.0;
        species.volume_factor() * d * d * self.height
    }

    pub fn death_cause(&self) -> Option<&DeathCause> {
        self.death.as_ref()
    }

    pub fn is_dead(&self) -> bool {
        self.death.is_some()
    }

    pub fn marks(&self) -> &TreeMarks {
        &self.marks
    }

    pub fn marks_mut(&mut self) -> &mut TreeMarks {
        &mut self.marks
    }

    /// Biomass by compartment as handed to the snag/soil sink.
    pub fn biomass(&self, species: &Species) -> TreeBiomass {
        let branch = species.biomass_branch(self.dbh).min(self.woody_mass);
        TreeBiomass {
            species: self.species,
            stem: self.woody_mass - branch,
            branch,
            foliage: self.foliage_mass,
            fine_root: self.fine_root_mass,
            coarse_root: self.coarse_root_mass,
        }
    }

    /// Harvest: removed fractions leave the site. Returns false if the tree
    /// was already dead.
    pub fn remove_harvest(
        &mut self,
        species: &Species,
        fractions: HarvestFractions,
        sink: &mut dyn CarbonSink,
        ctx: &SimulationContext,
    ) -> bool {
        self.die(DeathCause::Harvested(fractions), species, sink, ctx)
    }

    /// Cut and leave everything on site.
    pub fn cut_down(
        &mut self,
        species: &Species,
        sink: &mut dyn CarbonSink,
        ctx: &SimulationContext,
    ) -> bool {
        self.die(DeathCause::CutDown, species, sink, ctx)
    }

    pub fn remove_disturbance(
        &mut self,
        species: &Species,
        fractions: DisturbanceFractions,
        sink: &mut dyn CarbonSink,
        ctx: &SimulationContext,
    ) -> bool {
        self.die(DeathCause::Disturbance(fractions), species, sink, ctx)
    }

    /// The single alive -> dead transition; routes the biomass to `sink`.
    pub(crate) fn die(
        &mut self,
        cause: DeathCause,
        species: &Species,
        sink: &mut dyn CarbonSink,
        ctx: &SimulationContext,
    ) -> bool {
        if self.is_dead() {
            return false;
        }
        let biomass = self.biomass(species);
        match &cause {
            DeathCause::Intrinsic | DeathCause::Stress => sink.add_mortality(&biomass),
            DeathCause::Disturbance(fractions) => sink.add_disturbance(&biomass, fractions),
            DeathCause::Harvested(fractions) => sink.add_harvest(&biomass, fractions),
            DeathCause::CutDown => sink.add_harvest(&biomass, &HarvestFractions::default()),
        }
        ctx.record_death(&cause);
        self.death = Some(cause);
        true
    }

    /// Re-selects the stamp for the current dimensions and updates opacity.
    fn refresh_stamp(
        &mut self,
        species: &Species,
        stamps: &StampStore,
        opacity_coefficient: f64,
    ) -> Result<()> {
        self.stamp = stamps
            .species(self.species)
            .and_then(|set| set.stamp_for(self.dbh, self.height))
            .ok_or_else(|| SimError::MissingStamp {
                species: species.id().to_string(),
                dbh: self.dbh,
                height: self.height,
            })?;
        let crown_area = f64::from(self.writer_stamp(stamps)?.crown_area());
        self.opacity = 1.0 - (-opacity_coefficient * self.leaf_area / crown_area).exp();
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_dimensions(self.id, self.dbh, self.height)
    }

    fn missing_stamp(&self, stamps: &StampStore) -> SimError {
        SimError::MissingStamp {
            species: stamps
                .species(self.species)
                .map(|set| set.description().to_string())
                .unwrap_or_else(|| self.species.to_string()),
            dbh: self.dbh,
            height: self.height,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_foliage_mass(&mut self, mass: f64) {
        self.foliage_mass = mass;
    }

    #[cfg(test)]
    pub(crate) fn set_height(&mut self, height: f64) {
        self.height = height;
    }
}

fn validate_dimensions(id: TreeId, dbh: f64, height: f64) -> Result<()> {
    let reason = if !dbh.is_finite() || dbh <= 0.0 || dbh > MAX_DBH {
        format!("diameter {dbh} cm outside (0, {MAX_DBH}]")
    } else if !height.is_finite() || height <= 0.0 || height > MAX_HEIGHT {
        format!("height {height} m outside (0, {MAX_HEIGHT}]")
    } else {
        return Ok(());
    };
    Err(SimError::InvalidTree { id, reason })
}
