//! Resource units: 1 ha cells owning their trees and stand aggregates.

use rand::RngCore;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::SimulationContext;
use crate::error::{Result, SimError};
use crate::grid::{
    GridBand, GridPoint, HeightCell, HeightGrid, LightGrid, HEIGHT_CELL_AREA, HEIGHT_PER_RU,
    LIGHT_PER_HEIGHT, LIGHT_PER_RU,
};
use crate::production::{ProductionModel, SiteConditions, SpeciesProduction};
use crate::snag::{CarbonSink, DisturbanceFractions, HarvestFractions, SnagLedger};
use crate::species::{Species, SpeciesSet};
use crate::stamp::StampStore;
use crate::tree::growth::GrowthSettings;
use crate::tree::{Boundary, GrowthEnv, GrowthTotals, Tree, TreeId, TreeInit};

/// Capacity above which a sparsely used tree list is shrunk.
const SHRINK_CAPACITY: usize = 100;
const SHRINK_UTILISATION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StandStatistics {
    pub trees: usize,
    /// m2
    pub basal_area: f64,
    /// m3
    pub volume: f64,
    pub leaf_area: f64,
    pub leaf_area_index: f64,
    pub mean_dbh: f64,
    pub mean_height: f64,
    pub npp: f64,
    pub aboveground_npp: f64,
    pub deaths: u32,
}

#[derive(Debug, Clone)]
pub struct ResourceUnit {
    index: usize,
    column: usize,
    row: usize,
    /// Lower left light cell of the unit.
    origin: GridPoint,
    trees: Vec<Tree>,
    has_dead_trees: bool,

    leaf_area: f64,
    weighted_leaf_area: f64,
    light_response_sum: f64,
    aging_sum: f64,
    average_aging: f64,

    stockable_pixels: u32,
    pixel_count: u32,
    stocked_pixels: u32,
    stocked_area: f64,
    effective_area: f64,
    lri_modifier: f64,
    effective_area_per_wla: f64,
    production: Vec<SpeciesProduction>,

    growth: GrowthTotals,
    snags: SnagLedger,
    statistics: StandStatistics,
}

impl ResourceUnit {
    pub fn new(index: usize, column: usize, row: usize, origin: GridPoint, species_count: usize) -> Self {
        Self {
            index,
            column,
            row,
            origin,
            trees: Vec::new(),
            has_dead_trees: false,
            leaf_area: 0.0,
            weighted_leaf_area: 0.0,
            light_response_sum: 0.0,
            aging_sum: 0.0,
            average_aging: 0.0,
            stockable_pixels: 0,
            pixel_count: 0,
            stocked_pixels: 0,
            stocked_area: 0.0,
            effective_area: 0.0,
            lri_modifier: 0.0,
            effective_area_per_wla: 0.0,
            production: vec![SpeciesProduction::default(); species_count],
            growth: GrowthTotals::default(),
            snags: SnagLedger::new(),
            statistics: StandStatistics::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn origin(&self) -> GridPoint {
        self.origin
    }

    /// Whether `p` (light cell) lies inside the unit.
    pub fn contains(&self, p: GridPoint) -> bool {
        (self.origin.x..self.origin.x + LIGHT_PER_RU).contains(&p.x)
            && (self.origin.y..self.origin.y + LIGHT_PER_RU).contains(&p.y)
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn living_trees(&self) -> impl Iterator<Item = &Tree> {
        self.trees.iter().filter(|t| !t.is_dead())
    }

    pub fn tree(&self, id: TreeId) -> Option<&Tree> {
        self.trees.iter().find(|t| t.id() == id)
    }

    pub fn tree_mut(&mut self, id: TreeId) -> Option<&mut Tree> {
        self.trees.iter_mut().find(|t| t.id() == id)
    }

    pub fn has_dead_trees(&self) -> bool {
        self.has_dead_trees
    }

    pub fn leaf_area(&self) -> f64 {
        self.leaf_area
    }

    pub fn weighted_leaf_area(&self) -> f64 {
        self.weighted_leaf_area
    }

    pub fn stockable_area(&self) -> f64 {
        f64::from(self.stockable_pixels) * HEIGHT_CELL_AREA
    }

    pub fn stocked_area(&self) -> f64 {
        self.stocked_area
    }

    /// Intercepting area of the stand (m2).
    pub fn effective_area(&self) -> f64 {
        self.effective_area
    }

    pub fn leaf_area_index(&self) -> f64 {
        let stockable = self.stockable_area();
        if stockable > 0.0 {
            self.leaf_area / stockable
        } else {
            0.0
        }
    }

    pub fn lri_modifier(&self) -> f64 {
        self.lri_modifier
    }

    pub fn effective_area_per_wla(&self) -> f64 {
        self.effective_area_per_wla
    }

    pub fn average_aging(&self) -> f64 {
        self.average_aging
    }

    pub fn species_production(&self) -> &[SpeciesProduction] {
        &self.production
    }

    pub fn snags(&self) -> &SnagLedger {
        &self.snags
    }

    pub fn statistics(&self) -> &StandStatistics {
        &self.statistics
    }

    pub(crate) fn set_stockable_pixels(&mut self, pixels: u32) {
        self.stockable_pixels = pixels;
    }

    /// Adds a tree; `init.position` must lie inside the unit.
    pub fn new_tree(
        &mut self,
        init: &TreeInit,
        species_set: &SpeciesSet,
        stamps: &StampStore,
        opacity_coefficient: f64,
        ctx: &SimulationContext,
    ) -> Result<TreeId> {
        let species = species_set
            .get(init.species)
            .ok_or_else(|| SimError::UnknownSpecies(format!("species index {}", init.species)))?;
        let id = ctx.next_tree_id();
        if !self.contains(init.position) {
            return Err(SimError::OutOfGrid {
                id,
                x: init.position.x as i64,
                y: init.position.y as i64,
            });
        }
        let tree = Tree::new(id, init, self.index, species, stamps, opacity_coefficient)?;
        self.trees.push(tree);
        Ok(id)
    }

    pub fn harvest_tree(
        &mut self,
        id: TreeId,
        fractions: HarvestFractions,
        species_set: &SpeciesSet,
        ctx: &SimulationContext,
    ) -> Result<bool> {
        self.remove_tree(id, species_set, |tree, species, sink| {
            tree.remove_harvest(species, fractions, sink, ctx)
        })
    }

    pub fn cut_down_tree(
        &mut self,
        id: TreeId,
        species_set: &SpeciesSet,
        ctx: &SimulationContext,
    ) -> Result<bool> {
        self.remove_tree(id, species_set, |tree, species, sink| {
            tree.cut_down(species, sink, ctx)
        })
    }

    pub fn disturb_tree(
        &mut self,
        id: TreeId,
        fractions: DisturbanceFractions,
        species_set: &SpeciesSet,
        ctx: &SimulationContext,
    ) -> Result<bool> {
        self.remove_tree(id, species_set, |tree, species, sink| {
            tree.remove_disturbance(species, fractions, sink, ctx)
        })
    }

    /// Applies `remove` to the tree `id` of this unit. Returns false if
    /// there is no such living tree.
    fn remove_tree<F>(&mut self, id: TreeId, species_set: &SpeciesSet, remove: F) -> Result<bool>
    where
        F: FnOnce(&mut Tree, &Species, &mut dyn CarbonSink) -> bool,
    {
        let Some(tree) = self.trees.iter_mut().find(|t| t.id() == id) else {
            return Ok(false);
        };
        let species = species_set
            .get(tree.species())
            .ok_or_else(|| SimError::UnknownSpecies(format!("species index {}", tree.species())))?;
        let died = remove(tree, species, &mut self.snags);
        self.has_dead_trees |= died;
        Ok(died)
    }

    /// Swap-removes dead trees; list order is not kept.
    pub fn clean_tree_list(&mut self) {
        if !self.has_dead_trees {
            return;
        }
        let mut last = self.trees.len();
        while last > 0 && self.trees[last - 1].is_dead() {
            last -= 1;
        }
        let mut current = 0;
        while current < last {
            if self.trees[current].is_dead() {
                last -= 1;
                self.trees.swap(current, last);
                // trees[current] is alive now, so this stops at the latest there
                while self.trees[last - 1].is_dead() {
                    last -= 1;
                }
            }
            current += 1;
        }

        if last != self.trees.len() {
            self.trees.truncate(last);
            let capacity = self.trees.capacity();
            if capacity > SHRINK_CAPACITY
                && (self.trees.len() as f64) / (capacity as f64) < SHRINK_UTILISATION
            {
                debug!(
                    unit = self.index,
                    from = capacity,
                    to = self.trees.len(),
                    "shrinking tree storage"
                );
                self.trees.shrink_to_fit();
            }
        }
        self.has_dead_trees = false;
    }

    /// Clears the per-year aggregates.
    pub fn new_year(&mut self) {
        self.leaf_area = 0.0;
        self.weighted_leaf_area = 0.0;
        self.light_response_sum = 0.0;
        self.effective_area = 0.0;
        self.pixel_count = 0;
        self.stocked_pixels = 0;
        self.growth = GrowthTotals::default();
    }

    pub fn add_weighted_leaf_area(&mut self, leaf_area: f64, lri: f64) {
        self.leaf_area += leaf_area;
        self.weighted_leaf_area += leaf_area * lri;
    }

    pub fn add_light_response(&mut self, leaf_area: f64, response: f64) {
        self.light_response_sum += leaf_area * response;
    }

    pub fn height_field(
        &self,
        stamps: &StampStore,
        boundary: Boundary,
        band: &mut GridBand<'_, HeightCell>,
    ) -> Result<()> {
        for tree in self.living_trees() {
            tree.height_field(stamps, boundary, band)?;
        }
        Ok(())
    }

    pub fn apply_stamps(
        &self,
        stamps: &StampStore,
        heights: &HeightGrid,
        boundary: Boundary,
        band: &mut GridBand<'_, f32>,
        ctx: &SimulationContext,
    ) -> Result<()> {
        let mut applied = 0;
        for tree in self.living_trees() {
            tree.apply_stamp(stamps, heights, boundary, band)?;
            applied += 1;
        }
        ctx.record_stamp_applications(applied);
        Ok(())
    }

    pub fn read_stamps(
        &mut self,
        stamps: &StampStore,
        light: &LightGrid,
        heights: &HeightGrid,
        species_set: &SpeciesSet,
        boundary: Boundary,
    ) -> Result<()> {
        for tree in self.trees.iter_mut().filter(|t| !t.is_dead()) {
            let lri = tree.read_stamp(stamps, light, heights, species_set, boundary)?;
            self.leaf_area += tree.leaf_area();
            self.weighted_leaf_area += tree.leaf_area() * lri;
        }
        Ok(())
    }

    /// Counts valid and stocked (tree-bearing) height cells of the unit.
    pub fn count_stocked_pixels(&mut self, heights: &HeightGrid) {
        let hx = self.origin.x / LIGHT_PER_HEIGHT;
        let hy = self.origin.y / LIGHT_PER_HEIGHT;
        self.pixel_count = 0;
        self.stocked_pixels = 0;
        for y in hy..hy + HEIGHT_PER_RU {
            for x in hx..hx + HEIGHT_PER_RU {
                if let Some(cell) = heights.get(x, y).filter(|c| c.is_valid()) {
                    self.pixel_count += 1;
                    if cell.count() > 0 {
                        self.stocked_pixels += 1;
                    }
                }
            }
        }
    }

    /// Stand-level production: stocked area, interception, LRI modifier and
    /// per-species production of the year.
    pub fn production(
        &mut self,
        model: &dyn ProductionModel,
        species_set: &SpeciesSet,
        stamps: &StampStore,
        year: u32,
        extinction_coefficient: f64,
    ) -> Result<()> {
        self.production.fill(SpeciesProduction::default());
        self.effective_area = 0.0;
        self.lri_modifier = 0.0;
        self.stocked_area = 0.0;
        if self.weighted_leaf_area == 0.0 || self.pixel_count == 0 {
            return Ok(());
        }

        let pixel_area = f64::from(self.stocked_pixels) * HEIGHT_CELL_AREA;
        let mut stocked = pixel_area;
        let lai = self.leaf_area_index();
        if lai < 3.0 {
            let mut crown_area = 0.0;
            for tree in self.living_trees() {
                crown_area += f64::from(tree.reader_stamp(stamps)?.crown_area());
            }
            let crown_limited = crown_area.min(pixel_area);
            stocked = if lai < 1.0 {
                crown_limited
            } else {
                let pixel_fraction = (lai - 1.0) / 2.0;
                pixel_area * pixel_fraction + crown_limited * (1.0 - pixel_fraction)
            };
        }
        self.stocked_area = stocked;
        if stocked == 0.0 {
            return Ok(());
        }

        let stocked_lai = self.leaf_area / stocked;
        let interception = 1.0 - (-extinction_coefficient * stocked_lai).exp();
        self.effective_area = stocked * interception;
        self.lri_modifier = interception * stocked / self.weighted_leaf_area;
        if self.lri_modifier == 0.0 && self.leaf_area > 0.0 {
            warn!(unit = self.index, "LRI modifier is zero despite leaf area");
        }

        let site = SiteConditions {
            unit: self.index,
            year,
            leaf_area_index: stocked_lai,
            stocked_area: stocked,
            interception_fraction: interception,
        };
        let mut present = vec![false; self.production.len()];
        for tree in self.living_trees() {
            if let Some(flag) = present.get_mut(tree.species()) {
                *flag = true;
            }
        }
        for species in species_set.iter() {
            if present.get(species.index()).copied().unwrap_or(false) {
                self.production[species.index()] = model.produce(&site, species);
            }
        }
        Ok(())
    }

    pub fn calculate_light_responses(&mut self, species_set: &SpeciesSet) -> Result<()> {
        for tree in self.trees.iter_mut().filter(|t| !t.is_dead()) {
            let response = tree.calc_light_response(species_set, self.lri_modifier)?;
            self.light_response_sum += tree.leaf_area() * response;
        }
        Ok(())
    }

    pub fn calculate_intercepted_area(&mut self) {
        self.effective_area_per_wla = if self.light_response_sum == 0.0 {
            0.0
        } else {
            self.effective_area / self.light_response_sum
        };
    }

    pub fn before_grow(&mut self) {
        self.aging_sum = 0.0;
    }

    /// Light response, intercepted area and growth of all trees, processed
    /// in list order with `rng`.
    pub fn grow_trees(
        &mut self,
        species_set: &SpeciesSet,
        stamps: &StampStore,
        settings: GrowthSettings,
        ctx: &SimulationContext,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        self.before_grow();
        self.calculate_light_responses(species_set)?;
        self.calculate_intercepted_area();

        let mut env = GrowthEnv {
            species_set,
            stamps,
            production: &self.production,
            lri_modifier: self.lri_modifier,
            effective_area_per_wla: self.effective_area_per_wla,
            settings,
            ctx,
            sink: &mut self.snags,
            rng,
            totals: GrowthTotals::default(),
        };
        for tree in self.trees.iter_mut() {
            tree.grow(&mut env)?;
        }
        let totals = env.totals;
        self.aging_sum += totals.weighted_aging;
        self.growth.npp += totals.npp;
        self.growth.aboveground_npp += totals.aboveground_npp;
        self.growth.deaths += totals.deaths;
        self.has_dead_trees |= totals.deaths > 0;
        Ok(())
    }

    pub fn after_grow(&mut self) {
        self.average_aging = if self.leaf_area > 0.0 {
            self.aging_sum / self.leaf_area
        } else {
            0.0
        };
    }

    pub fn update_statistics(&mut self, species_set: &SpeciesSet) {
        let mut stats = StandStatistics {
            npp: self.growth.npp,
            aboveground_npp: self.growth.aboveground_npp,
            deaths: self.growth.deaths,
            ..StandStatistics::default()
        };
        for tree in self.living_trees() {
            stats.trees += 1;
            stats.basal_area += tree.basal_area();
            if let Some(species) = species_set.get(tree.species()) {
                stats.volume += tree.volume(species);
            }
            stats.leaf_area += tree.leaf_area();
            stats.mean_dbh += tree.dbh();
            stats.mean_height += tree.height();
        }
        if stats.trees > 0 {
            stats.mean_dbh /= stats.trees as f64;
            stats.mean_height /= stats.trees as f64;
        }
        let stockable = self.stockable_area();
        if stockable > 0.0 {
            stats.leaf_area_index = stats.leaf_area / stockable;
        }
        self.statistics = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, HEIGHT_CELL_SIZE, LIGHT_CELL_SIZE};
    use crate::production::FixedProduction;
    use crate::tree::tests::fixtures;

    fn unit_with_trees(count: usize) -> (ResourceUnit, SpeciesSet, StampStore, SimulationContext) {
        let (species, stamps) = fixtures();
        let ctx = SimulationContext::new();
        let mut unit = ResourceUnit::new(0, 0, 0, GridPoint::new(30, 30), species.len());
        unit.set_stockable_pixels(100);
        for i in 0..count {
            let init = TreeInit {
                species: 0,
                position: GridPoint::new(32 + (i * 7) % 46, 32 + (i * 13) % 46),
                dbh: 15.0 + (i % 30) as f64,
                height: 14.0 + 0.5 * (i % 30) as f64,
                age: Some(40),
            };
            unit.new_tree(&init, &species, &stamps, 0.5, &ctx).unwrap();
        }
        (unit, species, stamps, ctx)
    }

    #[test]
    fn compaction_removes_only_dead_trees() {
        let (mut unit, species, _, ctx) = unit_with_trees(10);
        let ids: Vec<TreeId> = unit.trees().iter().map(|t| t.id()).collect();
        for id in [ids[0], ids[3], ids[4], ids[9]] {
            assert!(unit.cut_down_tree(id, &species, &ctx).unwrap());
        }
        assert!(!unit.cut_down_tree(ids[0], &species, &ctx).unwrap());
        assert!(unit.has_dead_trees());

        unit.clean_tree_list();
        assert!(!unit.has_dead_trees());
        assert_eq!(unit.trees().len(), 6);
        assert!(unit.trees().iter().all(|t| !t.is_dead()));
        let mut left: Vec<TreeId> = unit.trees().iter().map(|t| t.id()).collect();
        left.sort();
        assert_eq!(left, vec![ids[1], ids[2], ids[5], ids[6], ids[7], ids[8]]);
    }

    #[test]
    fn compaction_handles_all_dead() {
        let (mut unit, species, _, ctx) = unit_with_trees(3);
        let ids: Vec<TreeId> = unit.trees().iter().map(|t| t.id()).collect();
        for id in ids {
            unit.harvest_tree(id, HarvestFractions::stem_only(), &species, &ctx)
                .unwrap();
        }
        unit.clean_tree_list();
        assert!(unit.trees().is_empty());
        assert_eq!(unit.snags().harvested, 3);
    }

    #[test]
    fn sparse_storage_is_shrunk() {
        let (mut unit, species, _, ctx) = unit_with_trees(150);
        let ids: Vec<TreeId> = unit.trees().iter().map(|t| t.id()).collect();
        for id in &ids[..140] {
            unit.cut_down_tree(*id, &species, &ctx).unwrap();
        }
        unit.clean_tree_list();
        assert_eq!(unit.trees().len(), 10);
        assert!(unit.trees.capacity() < 100);
    }

    #[test]
    fn trees_must_be_placed_inside_the_unit() {
        let (mut unit, species, stamps, ctx) = unit_with_trees(0);
        let init = TreeInit {
            species: 0,
            position: GridPoint::new(80, 40),
            dbh: 20.0,
            height: 18.0,
            age: None,
        };
        let result = unit.new_tree(&init, &species, &stamps, 0.5, &ctx);
        assert!(matches!(result, Err(SimError::OutOfGrid { .. })));
    }

    #[test]
    fn production_follows_beer_lambert() {
        let (mut unit, species, stamps, ctx) = unit_with_trees(40);
        let side = LIGHT_PER_RU + 60;
        let mut light: LightGrid = Grid::new(side, side, LIGHT_CELL_SIZE, 1.0);
        let mut heights: HeightGrid = Grid::new(
            side / LIGHT_PER_HEIGHT,
            side / LIGHT_PER_HEIGHT,
            HEIGHT_CELL_SIZE,
            HeightCell::default(),
        );
        unit.new_year();
        unit.height_field(&stamps, Boundary::Open, &mut heights.as_band())
            .unwrap();
        unit.apply_stamps(&stamps, &heights, Boundary::Open, &mut light.as_band(), &ctx)
            .unwrap();
        unit.read_stamps(&stamps, &light, &heights, &species, Boundary::Open)
            .unwrap();
        unit.count_stocked_pixels(&heights);

        let model = FixedProduction {
            gpp_per_area: 2.0,
            root_fraction: 0.3,
        };
        unit.production(&model, &species, &stamps, 1, 0.5).unwrap();

        assert!(unit.stocked_area() > 0.0 && unit.stocked_area() <= 10_000.0);
        let lai = unit.leaf_area() / unit.stocked_area();
        let expected = unit.stocked_area() * (1.0 - (-0.5 * lai).exp());
        assert!((unit.effective_area() - expected).abs() < 1e-9);
        assert!(
            (unit.lri_modifier() * unit.weighted_leaf_area() - expected).abs() < 1e-6,
            "modifier {}",
            unit.lri_modifier()
        );
        assert_eq!(unit.species_production()[0].gpp_per_area, 2.0);
        assert_eq!(ctx.statistics().stamp_applications, 40);

        unit.calculate_light_responses(&species).unwrap();
        unit.calculate_intercepted_area();
        let intercepted: f64 = unit
            .trees()
            .iter()
            .map(|t| unit.effective_area_per_wla() * t.leaf_area() * t.light_response())
            .sum();
        assert!((intercepted - unit.effective_area()).abs() < 1e-6);
    }

    #[test]
    fn empty_units_produce_nothing() {
        let (mut unit, species, stamps, _) = unit_with_trees(0);
        let model = FixedProduction {
            gpp_per_area: 2.0,
            root_fraction: 0.3,
        };
        unit.new_year();
        unit.production(&model, &species, &stamps, 1, 0.5).unwrap();
        assert_eq!(unit.effective_area(), 0.0);
        assert_eq!(unit.stocked_area(), 0.0);
        unit.calculate_intercepted_area();
        assert_eq!(unit.effective_area_per_wla(), 0.0);
        unit.update_statistics(&species);
        assert_eq!(unit.statistics().trees, 0);
    }
}
