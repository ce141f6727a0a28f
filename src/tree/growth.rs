//! Yearly growth of a single tree: production, allocation, diameter and
//! height increment, mortality.

use rand::{Rng, RngCore};
use tracing::warn;

use crate::context::SimulationContext;
use crate::error::{Result, SimError};
use crate::production::SpeciesProduction;
use crate::snag::CarbonSink;
use crate::solver::{solve_diameter_increment, StemGrowth};
use crate::species::{Species, SpeciesSet};
use crate::stamp::StampStore;

use super::{DeathCause, Tree};

/// Share of GPP left after autotrophic respiration.
pub const NPP_GPP_RATIO: f64 = 0.47;
/// Foliage mass (kg) below which a tree collapses.
pub const FOLIAGE_COLLAPSE_THRESHOLD: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthSettings {
    pub growth_enabled: bool,
    pub mortality_enabled: bool,
    /// Beer-Lambert coefficient of crown opacity.
    pub opacity_coefficient: f64,
}

impl Default for GrowthSettings {
    fn default() -> Self {
        Self {
            growth_enabled: true,
            mortality_enabled: true,
            opacity_coefficient: 0.5,
        }
    }
}

/// Sums collected while the trees of one unit grow.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GrowthTotals {
    /// Leaf area weighted aging factor.
    pub weighted_aging: f64,
    pub npp: f64,
    pub aboveground_npp: f64,
    pub deaths: u32,
}

/// Everything a tree needs from its unit and the run while growing.
pub struct GrowthEnv<'a> {
    pub species_set: &'a SpeciesSet,
    pub stamps: &'a StampStore,
    /// Production of the unit, indexed by species.
    pub production: &'a [SpeciesProduction],
    pub lri_modifier: f64,
    /// Effective (intercepting) area per unit of response-weighted leaf area.
    pub effective_area_per_wla: f64,
    pub settings: GrowthSettings,
    pub ctx: &'a SimulationContext,
    pub sink: &'a mut dyn CarbonSink,
    pub rng: &'a mut dyn RngCore,
    pub totals: GrowthTotals,
}

impl<'a> GrowthEnv<'a> {
    fn species(&self, index: usize) -> Result<&'a Species> {
        self.species_set
            .get(index)
            .ok_or_else(|| SimError::UnknownSpecies(format!("species index {index}")))
    }

    fn production(&self, species: usize) -> SpeciesProduction {
        self.production.get(species).copied().unwrap_or_default()
    }
}

impl Tree {
    /// Light response from this year's LRI scaled by the unit's modifier.
    pub fn calc_light_response(&mut self, species_set: &SpeciesSet, lri_modifier: f64) -> Result<f64> {
        let species = species_set
            .get(self.species)
            .ok_or_else(|| SimError::UnknownSpecies(format!("species index {}", self.species)))?;
        let lri = (self.light_resource_index * lri_modifier).clamp(0.0, 1.0);
        self.light_response = species_set.light_response(lri, species.light_response_class());
        Ok(self.light_response)
    }

    /// One year of growth. Dead trees are left untouched.
    pub fn grow(&mut self, env: &mut GrowthEnv<'_>) -> Result<()> {
        if self.is_dead() {
            return Ok(());
        }
        self.validate()?;
        let species = env.species(self.species)?;
        self.age += 1;
        let aging = species.aging(self.height, self.age);
        env.totals.weighted_aging += self.leaf_area * aging;

        let effective_area = env.effective_area_per_wla * self.leaf_area * self.light_response;
        let gpp = env.production(self.species).gpp_per_area * effective_area * aging;
        self.allocate(gpp * NPP_GPP_RATIO, env)
    }

    /// Allocates `npp` (kg) to the pools, grows the stem and checks
    /// mortality. Dead trees are left untouched.
    pub fn allocate(&mut self, npp: f64, env: &mut GrowthEnv<'_>) -> Result<()> {
        if self.is_dead() {
            return Ok(());
        }
        self.validate()?;
        let species = env.species(self.species)?;
        if self.foliage_mass < FOLIAGE_COLLAPSE_THRESHOLD {
            self.stress_index = 1.0;
            self.kill(DeathCause::Intrinsic, species, env);
            return Ok(());
        }

        let root_fraction = env.production(self.species).root_fraction.clamp(0.0, 1.0);
        let mut stress = 0.0;
        if env.settings.growth_enabled {
            if npp > 0.0 {
                stress = self.partition(npp, root_fraction, species, env)?;
                env.totals.aboveground_npp += npp * (1.0 - root_fraction);
            } else {
                stress = self.reserve_stress(species);
            }
        }
        env.totals.npp += npp;

        if env.settings.mortality_enabled {
            self.check_mortality(stress, species, env);
        }
        self.stress_index = stress;
        Ok(())
    }

    /// Splits NPP plus reserve among the compartments. Returns the stress
    /// index.
    fn partition(
        &mut self,
        npp: f64,
        root_fraction: f64,
        species: &Species,
        env: &mut GrowthEnv<'_>,
    ) -> Result<f64> {
        let available = npp + self.npp_reserve;
        let foliage_allometric = species.biomass_foliage(self.dbh);
        let frf = species.fineroot_foliage_ratio();
        let reserve_size = foliage_allometric * (1.0 + frf);
        let reserve_refill = reserve_size.min((1.0 + frf) * self.foliage_mass);

        let to_foliage = species.turnover_leaf();
        let to_root = species.turnover_root();
        let to_wood = reserve_refill / (self.woody_mass + reserve_refill);
        let params = species.params();
        let wood_foliage = params.woody.b / params.foliage.b;

        let wood_fraction = (foliage_allometric * to_wood / available
            + wood_foliage * (1.0 - root_fraction)
            - wood_foliage * foliage_allometric * to_foliage / available)
            / (foliage_allometric / self.woody_mass + wood_foliage);
        if !wood_fraction.is_finite() {
            return Err(SimError::InvalidTree {
                id: self.id,
                reason: format!("allocation to wood is not finite (npp {npp})"),
            });
        }
        let wood_fraction = wood_fraction.clamp(0.0, 1.0 - root_fraction);
        let foliage_fraction = 1.0 - root_fraction - wood_fraction;

        let root_senescence = self.fine_root_mass * to_root;
        let foliage_senescence = self.foliage_mass * to_foliage;
        env.sink
            .add_turnover_litter(self.species, foliage_senescence, root_senescence);

        // roots: refill fine roots first, the rest goes to coarse roots
        self.fine_root_mass -= root_senescence;
        let mut root_allocation = root_fraction * available;
        let fine_root_deficit = self.foliage_mass * frf - self.fine_root_mass;
        if fine_root_deficit > 0.0 {
            let refill = fine_root_deficit.min(root_allocation);
            self.fine_root_mass += refill;
            root_allocation -= refill;
        }
        let max_coarse_root = species.biomass_coarse_root(self.dbh);
        self.coarse_root_mass += root_allocation;
        if self.coarse_root_mass > max_coarse_root {
            env.sink
                .add_turnover_wood(self.species, self.coarse_root_mass - max_coarse_root);
            self.coarse_root_mass = max_coarse_root;
        }

        self.foliage_mass =
            (self.foliage_mass + foliage_fraction * available - foliage_senescence).max(0.0);
        self.leaf_area = self.foliage_mass * species.specific_leaf_area();

        let stress = (1.0
            - available
                / (to_foliage * foliage_allometric
                    + to_root * foliage_allometric * frf
                    + reserve_size))
            .max(0.0);

        // wood: refill the reserve, the remainder is stem and branch growth
        let woody_allocation = wood_fraction * available;
        let to_reserve = reserve_size.min(woody_allocation);
        self.npp_reserve = to_reserve;
        let net_woody = woody_allocation - to_reserve;

        let previous_increment = self.dbh_delta;
        self.dbh_delta = 0.0;
        if net_woody > 0.0 {
            let net_stem = net_woody * species.fraction_stem(self.dbh);
            self.woody_mass += net_woody;
            self.grow_diameter(net_stem, previous_increment, species, env)?;
        }
        Ok(stress)
    }

    /// Stress of a tree without positive production: only the reserve is
    /// left to cover turnover.
    fn reserve_stress(&self, species: &Species) -> f64 {
        let foliage_allometric = species.biomass_foliage(self.dbh);
        let frf = species.fineroot_foliage_ratio();
        let required = species.turnover_leaf() * foliage_allometric
            + species.turnover_root() * foliage_allometric * frf
            + foliage_allometric * (1.0 + frf);
        (1.0 - self.npp_reserve / required).max(0.0)
    }

    /// Height/diameter ratio of this year's increment; shaded trees grow
    /// slender.
    fn increment_hd_ratio(&self, species: &Species, lri_modifier: f64) -> f64 {
        let hd_low = species.hd_low(self.dbh);
        let hd_high = species.hd_high(self.dbh);
        let lri = (self.light_resource_index * lri_modifier).clamp(0.0, 1.0);
        hd_high - (hd_high - hd_low) * lri
    }

    fn grow_diameter(
        &mut self,
        net_stem_mass: f64,
        previous_increment: f64,
        species: &Species,
        env: &mut GrowthEnv<'_>,
    ) -> Result<()> {
        let hd_growth = self.increment_hd_ratio(species, env.lri_modifier);
        let solution = solve_diameter_increment(&StemGrowth {
            diameter: self.dbh / 100.0,
            height: self.height,
            previous_increment: previous_increment / 100.0,
            net_stem_mass,
            hd_growth,
            mass_factor: species.volume_factor() * species.wood_density(),
        });
        if solution.is_best_effort() {
            env.ctx.record_solver_best_effort();
            warn!(
                tree = %self.id,
                residual = solution.residual,
                "diameter increment did not converge, using best estimate"
            );
        }

        let increment = solution.increment;
        self.dbh += 100.0 * increment;
        self.dbh_delta = 100.0 * increment;
        self.height += increment * hd_growth;
        self.refresh_stamp(species, env.stamps, env.settings.opacity_coefficient)
    }

    /// One uniform draw against intrinsic plus stress hazard.
    fn check_mortality(&mut self, stress: f64, species: &Species, env: &mut GrowthEnv<'_>) {
        if self.foliage_mass < FOLIAGE_COLLAPSE_THRESHOLD {
            self.kill(DeathCause::Intrinsic, species, env);
            return;
        }
        let intrinsic = species.death_prob_intrinsic();
        let total = intrinsic + species.death_prob_stress(stress);
        let draw: f64 = env.rng.gen();
        if draw < total {
            let cause = if draw < intrinsic {
                DeathCause::Intrinsic
            } else {
                DeathCause::Stress
            };
            self.kill(cause, species, env);
        }
    }

    fn kill(&mut self, cause: DeathCause, species: &Species, env: &mut GrowthEnv<'_>) {
        if self.die(cause, species, env.sink, env.ctx) {
            env.totals.deaths += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_light_resource_index(&mut self, lri: f64) {
        self.light_resource_index = lri;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPoint;
    use crate::snag::SnagLedger;
    use crate::tree::tests::{fixtures, tree_at};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Harness {
        species: SpeciesSet,
        stamps: StampStore,
        production: Vec<SpeciesProduction>,
        ctx: SimulationContext,
        ledger: SnagLedger,
        rng: ChaCha8Rng,
    }

    impl Harness {
        fn new() -> Self {
            let (species, stamps) = fixtures();
            Self {
                species,
                stamps,
                production: vec![SpeciesProduction {
                    gpp_per_area: 1.0,
                    root_fraction: 0.3,
                    environmental_factor: 1.0,
                }],
                ctx: SimulationContext::new(),
                ledger: SnagLedger::new(),
                rng: ChaCha8Rng::seed_from_u64(7),
            }
        }

        fn env(&mut self, settings: GrowthSettings) -> GrowthEnv<'_> {
            GrowthEnv {
                species_set: &self.species,
                stamps: &self.stamps,
                production: &self.production,
                lri_modifier: 1.0,
                effective_area_per_wla: 1.0,
                settings,
                ctx: &self.ctx,
                sink: &mut self.ledger,
                rng: &mut self.rng,
                totals: GrowthTotals::default(),
            }
        }
    }

    /// RNG whose every `f64` draw is (nearly) the same value.
    struct FixedDraw(u64);

    impl RngCore for FixedDraw {
        fn next_u32(&mut self) -> u32 {
            (self.0 >> 32) as u32
        }

        fn next_u64(&mut self) -> u64 {
            self.0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn no_mortality() -> GrowthSettings {
        GrowthSettings {
            mortality_enabled: false,
            ..GrowthSettings::default()
        }
    }

    #[test]
    fn fixed_npp_grows_diameter_and_conserves_mass() {
        let mut h = Harness::new();
        let mut tree = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        tree.set_light_resource_index(1.0);
        let sp = h.species.get(0).unwrap().clone();

        for _ in 0..5 {
            let (dbh, height) = (tree.dbh(), tree.height());
            let before = tree.total_mass();
            let routed = h.ledger.total();
            let mut env = h.env(no_mortality());
            tree.allocate(5.0, &mut env).unwrap();
            drop(env);

            assert!(tree.dbh() > dbh);
            assert!(tree.height() >= height);
            let sent = h.ledger.total() - routed;
            assert!((tree.total_mass() - (before + 5.0 - sent)).abs() < 1e-8);
            assert_eq!(tree.stress_index(), 0.0);
        }
        assert!(tree.dbh() > 20.5 && tree.dbh() < 20.8, "dbh {}", tree.dbh());
        let ratio = tree.foliage_mass() / sp.biomass_foliage(tree.dbh());
        assert!((ratio - 1.0).abs() < 0.01, "foliage ratio {ratio}");
        assert!(tree.leaf_area() > 0.0);
        assert_eq!(h.ctx.statistics().solver_best_effort, 0);
    }

    #[test]
    fn shaded_trees_grow_slender() {
        let mut h = Harness::new();
        let mut open = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        let mut shaded = open.clone();
        open.set_light_resource_index(1.0);
        shaded.set_light_resource_index(0.1);
        open.allocate(5.0, &mut h.env(no_mortality())).unwrap();
        shaded.allocate(5.0, &mut h.env(no_mortality())).unwrap();
        let hd_open = (open.height() - 18.0) / (open.dbh() - 20.0);
        let hd_shaded = (shaded.height() - 18.0) / (shaded.dbh() - 20.0);
        assert!(hd_shaded > hd_open);
    }

    #[test]
    fn collapsed_foliage_dies_before_growing() {
        let mut h = Harness::new();
        let mut tree = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        tree.set_foliage_mass(0.0);
        let mut env = h.env(no_mortality());
        tree.allocate(5.0, &mut env).unwrap();
        assert_eq!(env.totals.deaths, 1);
        drop(env);
        assert_eq!(tree.death_cause(), Some(&DeathCause::Intrinsic));
        assert_eq!(h.ledger.died, 1);

        let frozen = tree.clone();
        tree.allocate(5.0, &mut h.env(GrowthSettings::default())).unwrap();
        tree.grow(&mut h.env(GrowthSettings::default())).unwrap();
        assert_eq!(tree, frozen);
        assert_eq!(h.ctx.statistics().deaths(), 1);
    }

    #[test]
    fn a_single_draw_decides_death_and_its_cause() {
        let h = Harness::new();
        let sp = h.species.get(0).unwrap().clone();
        let base = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        let (species, stamps, ctx) = (&h.species, &h.stamps, &h.ctx);

        let run = |draw: u64, stress: f64| {
            let mut rng = FixedDraw(draw);
            let mut ledger = SnagLedger::new();
            let mut env = GrowthEnv {
                species_set: species,
                stamps,
                production: &[],
                lri_modifier: 1.0,
                effective_area_per_wla: 1.0,
                settings: GrowthSettings::default(),
                ctx,
                sink: &mut ledger,
                rng: &mut rng,
                totals: GrowthTotals::default(),
            };
            let mut tree = base.clone();
            tree.check_mortality(stress, &sp, &mut env);
            tree.death_cause().copied()
        };

        assert_eq!(run(0, 0.0), Some(DeathCause::Intrinsic));
        assert_eq!(run(u64::MAX / 2, 1.0), Some(DeathCause::Stress));
        assert_eq!(run(u64::MAX / 2, 0.0), None);
    }

    #[test]
    fn disabled_growth_leaves_pools_alone() {
        let mut h = Harness::new();
        let mut tree = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        let before = tree.clone();
        let settings = GrowthSettings {
            growth_enabled: false,
            mortality_enabled: false,
            ..GrowthSettings::default()
        };
        tree.allocate(5.0, &mut h.env(settings)).unwrap();
        assert_eq!(tree.total_mass(), before.total_mass());
        assert_eq!(tree.dbh(), before.dbh());
    }

    #[test]
    fn without_production_only_stress_changes() {
        let mut h = Harness::new();
        let mut tree = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        let before = tree.clone();
        tree.allocate(0.0, &mut h.env(no_mortality())).unwrap();

        assert_eq!(tree.total_mass(), before.total_mass());
        assert_eq!(tree.npp_reserve(), before.npp_reserve());
        assert_eq!(tree.dbh(), before.dbh());
        assert_eq!(h.ledger.total(), 0.0);
        // a full reserve still falls short of turnover plus the reserve target
        assert!(tree.stress_index() > 0.0 && tree.stress_index() < 1.0);
    }

    #[test]
    fn grow_uses_light_response_and_ages_the_tree() {
        let mut h = Harness::new();
        let mut tree = tree_at(&h.species, &h.stamps, 1, GridPoint::new(55, 55), 20.0, 18.0);
        tree.set_light_resource_index(0.8);
        let response = tree.calc_light_response(&h.species, 1.0).unwrap();
        assert!(response > 0.0 && response <= 1.0);
        let age = tree.age();
        let dbh = tree.dbh();
        let mut env = h.env(no_mortality());
        tree.grow(&mut env).unwrap();
        assert!(env.totals.weighted_aging > 0.0);
        assert!(env.totals.npp > 0.0);
        assert_eq!(tree.age(), age + 1);
        assert!(tree.dbh() > dbh);
    }
}
