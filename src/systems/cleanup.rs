use anyhow::Result;
use rayon::prelude::*;

use crate::{
    engine::{System, SystemContext},
    landscape::Landscape,
    rng::SystemRng,
    species::SpeciesSet,
};

/// Removes trees that died this year and updates the stand statistics.
pub struct CleanupSystem;

impl CleanupSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CleanupSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for CleanupSystem {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn run(
        &mut self,
        _ctx: &SystemContext,
        landscape: &mut Landscape,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let Landscape { units, species, .. } = landscape;
        let species: &SpeciesSet = species;
        units.par_iter_mut().for_each(|unit| {
            unit.clean_tree_list();
            unit.after_grow();
            unit.update_statistics(species);
        });
        Ok(())
    }
}
