use anyhow::Result;
use rayon::prelude::*;

use crate::{
    context::SimulationContext,
    engine::{System, SystemContext},
    grid::{HeightGrid, HEIGHT_PER_RU, LIGHT_PER_HEIGHT, LIGHT_PER_RU},
    landscape::{for_each_unit_banded, Landscape},
    resource_unit::ResourceUnit,
    rng::SystemRng,
    stamp::StampStore,
};

/// Starts the year: drops trees that died since the last year, resets the
/// grids and writes the dominant height field and all light stamps.
pub struct LightPatternSystem;

impl LightPatternSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LightPatternSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for LightPatternSystem {
    fn name(&self) -> &str {
        "light_pattern"
    }

    fn run(
        &mut self,
        _ctx: &SystemContext,
        landscape: &mut Landscape,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        landscape.units.par_iter_mut().for_each(|unit| {
            unit.clean_tree_list();
            unit.new_year();
        });
        landscape.reset_grids();

        let boundary = landscape.boundary();
        let buffer = landscape.buffer();
        let margin = landscape.margin();
        let columns = landscape.settings().columns;
        let Landscape {
            light,
            heights,
            units,
            stamps,
            context,
            ..
        } = landscape;
        let stamps: &StampStore = stamps;
        let context: &SimulationContext = context;
        let units: &[ResourceUnit] = units;

        for_each_unit_banded(
            heights,
            units,
            columns,
            HEIGHT_PER_RU,
            buffer / LIGHT_PER_HEIGHT,
            1,
            |unit, band| unit.height_field(stamps, boundary, band),
        )?;

        // the height field is complete before the first stamp is applied
        let heights: &HeightGrid = heights;
        for_each_unit_banded(
            light,
            units,
            columns,
            LIGHT_PER_RU,
            buffer,
            margin,
            |unit, band| unit.apply_stamps(stamps, heights, boundary, band, context),
        )?;
        Ok(())
    }
}
