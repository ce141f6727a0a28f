//! The simulated landscape: co-registered grids, resource units and the
//! shared model state every annual phase works on.

use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::SimulationContext;
use crate::error::{Result, SimError};
use crate::grid::{
    interleaved_rows, Grid, GridBand, GridPoint, HeightCell, HeightGrid, LightGrid,
    HEIGHT_CELL_SIZE, HEIGHT_PER_RU, LIGHT_CELL_SIZE, LIGHT_PER_HEIGHT, LIGHT_PER_RU, RU_SIZE,
};
use crate::production::ProductionModel;
use crate::resource_unit::ResourceUnit;
use crate::snag::{DisturbanceFractions, HarvestFractions};
use crate::species::SpeciesSet;
use crate::stamp::StampStore;
use crate::tree::growth::GrowthSettings;
use crate::tree::{Boundary, TreeId, TreeInit};

/// Unit rows are split into this many interleaved passes for parallel writes.
pub const WRITE_PASSES: usize = 3;
/// Light cells over which a radiating border cell fades out.
const RADIATE_DISTANCE: i64 = 7;

fn default_extinction() -> f64 {
    0.5
}

fn default_opacity() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_lri_correction() -> f64 {
    1.0
}

fn default_buffer_cells() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Beer-Lambert extinction coefficient of the stand canopy.
    #[serde(default = "default_extinction")]
    pub light_extinction_coefficient: f64,
    /// Extinction coefficient used for individual crown opacity.
    #[serde(default = "default_opacity")]
    pub opacity_coefficient: f64,
    #[serde(default = "default_true")]
    pub growth_enabled: bool,
    #[serde(default = "default_true")]
    pub mortality_enabled: bool,
    #[serde(default = "default_lri_correction")]
    pub lri_correction_strength: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            light_extinction_coefficient: default_extinction(),
            opacity_coefficient: default_opacity(),
            growth_enabled: true,
            mortality_enabled: true,
            lri_correction_strength: default_lri_correction(),
        }
    }
}

impl ModelSettings {
    pub fn growth(&self) -> GrowthSettings {
        GrowthSettings {
            growth_enabled: self.growth_enabled,
            mortality_enabled: self.mortality_enabled,
            opacity_coefficient: self.opacity_coefficient,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandscapeSettings {
    /// Resource units along x.
    pub columns: usize,
    /// Resource units along y.
    pub rows: usize,
    /// Width of the buffer around the project area, in height cells.
    #[serde(default = "default_buffer_cells")]
    pub buffer_cells: usize,
    #[serde(default)]
    pub torus: bool,
    /// Treat the buffer as forest that shades into the project area.
    #[serde(default)]
    pub forest_outside: bool,
}

impl Default for LandscapeSettings {
    fn default() -> Self {
        Self {
            columns: 1,
            rows: 1,
            buffer_cells: default_buffer_cells(),
            torus: false,
            forest_outside: false,
        }
    }
}

pub struct Landscape {
    pub light: LightGrid,
    pub heights: HeightGrid,
    pub units: Vec<ResourceUnit>,
    pub species: SpeciesSet,
    pub stamps: StampStore,
    pub production: Box<dyn ProductionModel>,
    pub context: SimulationContext,
    settings: LandscapeSettings,
    model: ModelSettings,
    year: u32,
    radiating: Vec<GridPoint>,
}

impl Landscape {
    pub fn new(
        settings: LandscapeSettings,
        model: ModelSettings,
        species: SpeciesSet,
        stamps: StampStore,
        production: Box<dyn ProductionModel>,
    ) -> Result<Self> {
        if settings.columns == 0 || settings.rows == 0 {
            return Err(SimError::InvalidLandscape(
                "landscape needs at least one resource unit".into(),
            ));
        }
        if stamps.species_count() < species.len() {
            return Err(SimError::InvalidLandscape(format!(
                "{} species but stamps for only {}",
                species.len(),
                stamps.species_count()
            )));
        }
        let margin = stamps.max_writer_offset();
        let buffer = settings.buffer_cells * LIGHT_PER_HEIGHT;
        if margin > LIGHT_PER_RU {
            return Err(SimError::InvalidLandscape(format!(
                "stamp offset {margin} exceeds the resource unit width of {LIGHT_PER_RU} cells"
            )));
        }
        if buffer < margin {
            return Err(SimError::InvalidLandscape(format!(
                "buffer of {buffer} light cells is narrower than the stamp offset {margin}"
            )));
        }

        let height_width = settings.columns * HEIGHT_PER_RU + 2 * settings.buffer_cells;
        let height_height = settings.rows * HEIGHT_PER_RU + 2 * settings.buffer_cells;
        let mut heights = Grid::new(
            height_width,
            height_height,
            HEIGHT_CELL_SIZE,
            HeightCell::outside(settings.forest_outside),
        );
        for y in settings.buffer_cells..height_height - settings.buffer_cells {
            for x in settings.buffer_cells..height_width - settings.buffer_cells {
                heights[GridPoint::new(x, y)] = HeightCell::default();
            }
        }
        let radiating = mark_radiating(&mut heights);

        let light = Grid::new(
            height_width * LIGHT_PER_HEIGHT,
            height_height * LIGHT_PER_HEIGHT,
            LIGHT_CELL_SIZE,
            1.0,
        );

        let mut units = Vec::with_capacity(settings.columns * settings.rows);
        for row in 0..settings.rows {
            for column in 0..settings.columns {
                let origin = GridPoint::new(
                    buffer + column * LIGHT_PER_RU,
                    buffer + row * LIGHT_PER_RU,
                );
                let mut unit =
                    ResourceUnit::new(units.len(), column, row, origin, species.len());
                unit.set_stockable_pixels(valid_cells(&heights, origin.to_height_cell()));
                units.push(unit);
            }
        }
        let stockable: f64 = units.iter().map(ResourceUnit::stockable_area).sum();
        debug!(
            units = units.len(),
            stockable_ha = stockable / 10_000.0,
            radiating = radiating.len(),
            "landscape set up"
        );

        let mut landscape = Self {
            light,
            heights,
            units,
            species,
            stamps,
            production,
            context: SimulationContext::new(),
            settings,
            model,
            year: 0,
            radiating,
        };
        landscape.reset_grids();
        Ok(landscape)
    }

    pub fn settings(&self) -> &LandscapeSettings {
        &self.settings
    }

    pub fn model(&self) -> &ModelSettings {
        &self.model
    }

    /// Completed simulation years.
    pub fn year(&self) -> u32 {
        self.year
    }

    pub fn advance_time(&mut self) {
        self.year += 1;
    }

    /// Buffer width in light cells.
    pub fn buffer(&self) -> usize {
        self.settings.buffer_cells * LIGHT_PER_HEIGHT
    }

    pub fn boundary(&self) -> Boundary {
        if self.settings.torus {
            Boundary::Torus {
                buffer: self.buffer(),
            }
        } else {
            Boundary::Open
        }
    }

    /// Rows a stamp may reach beyond its own unit.
    pub fn margin(&self) -> usize {
        self.stamps.max_writer_offset()
    }

    pub fn radiating_cells(&self) -> &[GridPoint] {
        &self.radiating
    }

    pub fn living_trees(&self) -> usize {
        self.units.iter().map(|u| u.living_trees().count()).sum()
    }

    /// Resets the height grid and sets the light grid to full light, with
    /// the shading of forest outside the project area.
    pub fn reset_grids(&mut self) {
        self.heights.cells_mut().iter_mut().for_each(HeightCell::reset);
        self.light.fill(1.0);
        self.radiate_light_grid();
    }

    fn radiate_light_grid(&mut self) {
        let centre = (LIGHT_PER_HEIGHT / 2) as i64;
        let per_cell = LIGHT_PER_HEIGHT as i64;
        for cell in &self.radiating {
            let cx = cell.x as i64 * per_cell + centre;
            let cy = cell.y as i64 * per_cell + centre;
            for dy in -RADIATE_DISTANCE..=RADIATE_DISTANCE {
                for dx in -RADIATE_DISTANCE..=RADIATE_DISTANCE {
                    let (x, y) = (cx + dx, cy + dy);
                    let inside = self
                        .heights
                        .get_signed(x.div_euclid(per_cell), y.div_euclid(per_cell))
                        .is_some_and(|h| h.is_valid());
                    if !inside || x < 0 || y < 0 {
                        continue;
                    }
                    let value = dx.abs().max(dy.abs()) as f32 / RADIATE_DISTANCE as f32;
                    if let Some(light) = self.light.get_mut(x as usize, y as usize) {
                        if *light > value {
                            *light = value;
                        }
                    }
                }
            }
        }
    }

    /// Adds a tree at `x`, `y` (metres from the lower left corner of the
    /// project area).
    pub fn add_tree(
        &mut self,
        species: &str,
        x: f64,
        y: f64,
        dbh: f64,
        height: f64,
        age: Option<u32>,
    ) -> Result<TreeId> {
        let width = self.settings.columns as f64 * RU_SIZE;
        let depth = self.settings.rows as f64 * RU_SIZE;
        if !(0.0..width).contains(&x) || !(0.0..depth).contains(&y) {
            return Err(SimError::InvalidLandscape(format!(
                "tree position ({x:.1}, {y:.1}) m lies outside the project area"
            )));
        }
        let species = self.species.by_id(species)?.index();
        let buffer = self.buffer();
        let position = GridPoint::new(
            buffer + (x / LIGHT_CELL_SIZE) as usize,
            buffer + (y / LIGHT_CELL_SIZE) as usize,
        );
        let unit = (y / RU_SIZE) as usize * self.settings.columns + (x / RU_SIZE) as usize;
        let init = TreeInit {
            species,
            position,
            dbh,
            height,
            age,
        };
        self.units[unit].new_tree(
            &init,
            &self.species,
            &self.stamps,
            self.model.opacity_coefficient,
            &self.context,
        )
    }

    fn unit_of(&self, id: TreeId) -> Option<usize> {
        self.units
            .iter()
            .position(|u| u.tree(id).is_some_and(|t| !t.is_dead()))
    }

    pub fn harvest_tree(&mut self, id: TreeId, fractions: HarvestFractions) -> Result<bool> {
        match self.unit_of(id) {
            Some(unit) => self.units[unit].harvest_tree(id, fractions, &self.species, &self.context),
            None => Ok(false),
        }
    }

    pub fn cut_down_tree(&mut self, id: TreeId) -> Result<bool> {
        match self.unit_of(id) {
            Some(unit) => self.units[unit].cut_down_tree(id, &self.species, &self.context),
            None => Ok(false),
        }
    }

    pub fn disturb_tree(&mut self, id: TreeId, fractions: DisturbanceFractions) -> Result<bool> {
        match self.unit_of(id) {
            Some(unit) => self.units[unit].disturb_tree(id, fractions, &self.species, &self.context),
            None => Ok(false),
        }
    }
}

fn valid_cells(heights: &HeightGrid, origin: GridPoint) -> u32 {
    let mut count = 0;
    for y in origin.y..origin.y + HEIGHT_PER_RU {
        for x in origin.x..origin.x + HEIGHT_PER_RU {
            if heights.get(x, y).is_some_and(HeightCell::is_valid) {
                count += 1;
            }
        }
    }
    count
}

/// Flags forest-outside cells next to the project area as radiating.
fn mark_radiating(heights: &mut HeightGrid) -> Vec<GridPoint> {
    let mut radiating = Vec::new();
    for y in 0..heights.height() {
        for x in 0..heights.width() {
            let p = GridPoint::new(x, y);
            if !heights[p].is_forest_outside() {
                continue;
            }
            let (sx, sy) = (x as i64, y as i64);
            let borders_forest = (-1..=1)
                .flat_map(|dy| (-1..=1).map(move |dx| (dx, dy)))
                .filter(|&d| d != (0, 0))
                .any(|(dx, dy)| {
                    heights
                        .get_signed(sx + dx, sy + dy)
                        .is_some_and(HeightCell::is_valid)
                });
            if borders_forest {
                heights[p].set_radiating(true);
                radiating.push(p);
            }
        }
    }
    radiating
}

/// Runs `f` for every unit on disjoint row bands of `grid`.
///
/// Unit rows are processed in [`WRITE_PASSES`] interleaved passes; inside a
/// pass every unit row gets its own band of `rows_per_unit` grid rows plus
/// `margin` rows on either side, and bands run in parallel. Units of one row
/// are handled in index order.
pub fn for_each_unit_banded<T, F>(
    grid: &mut Grid<T>,
    units: &[ResourceUnit],
    columns: usize,
    rows_per_unit: usize,
    offset: usize,
    margin: usize,
    f: F,
) -> Result<()>
where
    T: Send,
    F: Fn(&ResourceUnit, &mut GridBand<'_, T>) -> Result<()> + Sync,
{
    if columns == 0 {
        return Ok(());
    }
    let unit_rows = units.len() / columns;
    for pass in 0..WRITE_PASSES {
        let rows = interleaved_rows(unit_rows, rows_per_unit, offset, margin, WRITE_PASSES, pass);
        let ranges: Vec<Range<usize>> = rows.iter().map(|(_, range)| range.clone()).collect();
        let bands = grid.bands_mut(&ranges);
        bands
            .into_par_iter()
            .zip(rows.par_iter())
            .try_for_each(|(mut band, (row, _))| {
                units[row * columns..(row + 1) * columns]
                    .iter()
                    .try_for_each(|unit| f(unit, &mut band))
            })?;
    }
    Ok(())
}
