use anyhow::Result;
use rayon::prelude::*;

use crate::{
    engine::{System, SystemContext},
    grid::{HeightGrid, LightGrid},
    landscape::Landscape,
    rng::SystemRng,
    species::SpeciesSet,
    stamp::StampStore,
};

/// Reads the finished light grid back for every tree (LRI) and sums the
/// leaf area aggregates of each unit.
pub struct LightReadSystem;

impl LightReadSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LightReadSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for LightReadSystem {
    fn name(&self) -> &str {
        "light_read"
    }

    fn run(
        &mut self,
        _ctx: &SystemContext,
        landscape: &mut Landscape,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let boundary = landscape.boundary();
        let Landscape {
            light,
            heights,
            units,
            species,
            stamps,
            ..
        } = landscape;
        let (light, heights): (&LightGrid, &HeightGrid) = (light, heights);
        let (species, stamps): (&SpeciesSet, &StampStore) = (species, stamps);
        units
            .par_iter_mut()
            .try_for_each(|unit| unit.read_stamps(stamps, light, heights, species, boundary))?;
        Ok(())
    }
}
