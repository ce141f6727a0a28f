use anyhow::Result;
use rand::RngCore;
use rayon::prelude::*;

use crate::{
    context::SimulationContext,
    engine::{System, SystemContext},
    landscape::Landscape,
    rng::{unit_rng, SystemRng},
    species::SpeciesSet,
    stamp::StampStore,
};

/// Light response, growth and mortality of all trees.
///
/// Each unit draws from its own generator seeded from the year's stream and
/// the unit index, so results do not depend on thread scheduling.
pub struct GrowthSystem;

impl GrowthSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GrowthSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for GrowthSystem {
    fn name(&self) -> &str {
        "growth"
    }

    fn run(
        &mut self,
        _ctx: &SystemContext,
        landscape: &mut Landscape,
        rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let year_seed = rng.next_u64();
        let settings = landscape.model().growth();
        let Landscape {
            units,
            species,
            stamps,
            context,
            ..
        } = landscape;
        let (species, stamps): (&SpeciesSet, &StampStore) = (species, stamps);
        let context: &SimulationContext = context;
        units.par_iter_mut().try_for_each(|unit| {
            let mut unit_rng = unit_rng(year_seed, unit.index());
            unit.grow_trees(species, stamps, settings, context, &mut unit_rng)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landscape::tests::landscape;
    use crate::rng::RngManager;

    #[test]
    fn invalid_dimensions_fail_the_phase() {
        let mut landscape = landscape(1, 1, false, false);
        let id = landscape.add_tree("piab", 50.0, 50.0, 30.0, 25.0, None).unwrap();
        landscape.units[0].tree_mut(id).unwrap().set_height(0.0);

        let mut rng = RngManager::new(1);
        let ctx = SystemContext {
            year: 1,
            scenario_name: "growth",
        };
        let err = GrowthSystem::new()
            .run(&ctx, &mut landscape, &mut rng.stream("growth"))
            .err()
            .expect("growth must refuse a tree without height");
        assert!(format!("{err:#}").contains("height 0 m"), "{err:#}");
    }
}
