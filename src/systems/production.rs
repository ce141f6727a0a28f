use anyhow::Result;
use rayon::prelude::*;

use crate::{
    engine::{System, SystemContext},
    grid::HeightGrid,
    landscape::Landscape,
    production::ProductionModel,
    rng::SystemRng,
    species::SpeciesSet,
    stamp::StampStore,
};

/// Stocked area, interception and per-species production of every unit.
pub struct ProductionSystem;

impl ProductionSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProductionSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for ProductionSystem {
    fn name(&self) -> &str {
        "production"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        landscape: &mut Landscape,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let extinction = landscape.model().light_extinction_coefficient;
        let year = ctx.year;
        let Landscape {
            heights,
            units,
            species,
            stamps,
            production,
            ..
        } = landscape;
        let heights: &HeightGrid = heights;
        let (species, stamps): (&SpeciesSet, &StampStore) = (species, stamps);
        let model: &dyn ProductionModel = &**production;
        units.par_iter_mut().try_for_each(|unit| {
            unit.count_stocked_pixels(heights);
            unit.production(model, species, stamps, year, extinction)
        })?;
        Ok(())
    }
}
