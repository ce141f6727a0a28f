use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Power function `a * dbh^b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allometry {
    pub a: f64,
    pub b: f64,
}

impl Allometry {
    pub fn eval(&self, dbh: f64) -> f64 {
        self.a * dbh.powf(self.b)
    }

    fn is_zero(&self) -> bool {
        self.a == 0.0 || self.b == 0.0
    }
}

fn default_aging_midpoint() -> f64 {
    0.95
}

fn default_aging_steepness() -> f64 {
    4.0
}

/// Calibration curve `1 / (1 + (x / midpoint)^steepness)` applied to the
/// harmonic mean of relative age and relative height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgingCurve {
    #[serde(default = "default_aging_midpoint")]
    pub midpoint: f64,
    #[serde(default = "default_aging_steepness")]
    pub steepness: f64,
}

impl Default for AgingCurve {
    fn default() -> Self {
        Self {
            midpoint: default_aging_midpoint(),
            steepness: default_aging_steepness(),
        }
    }
}

impl AgingCurve {
    pub fn eval(&self, x: f64) -> f64 {
        1.0 / (1.0 + (x / self.midpoint).powf(self.steepness))
    }
}

/// Species parameters as they appear in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesParams {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Foliage biomass (kg) from dbh (cm).
    pub foliage: Allometry,
    /// Aboveground woody biomass (kg) from dbh (cm).
    pub woody: Allometry,
    pub coarse_root: Allometry,
    pub branch: Allometry,
    /// m2 leaf area per kg foliage.
    pub specific_leaf_area: f64,
    pub fineroot_foliage_ratio: f64,
    /// Yearly turnover fraction of foliage.
    pub turnover_leaf: f64,
    /// Yearly turnover fraction of fine roots.
    pub turnover_root: f64,
    /// Lower bound of the height/diameter ratio (full light).
    pub hd_low: Allometry,
    /// Upper bound of the height/diameter ratio (deep shade).
    pub hd_high: Allometry,
    /// kg/m3
    pub wood_density: f64,
    pub form_factor: f64,
    pub max_age: f64,
    pub max_height: f64,
    #[serde(default)]
    pub aging: AgingCurve,
    /// Fraction of a cohort surviving to `max_age` without stress.
    pub survival_to_max_age: f64,
    /// Shape of the stress mortality hazard `1 - exp(-k * stress)`.
    pub stress_mortality: f64,
    /// 1 (very shade intolerant) ..= 5 (very shade tolerant).
    pub light_response_class: f64,
    /// Optional binary stamp asset; a generated set is used otherwise.
    #[serde(default)]
    pub stamps: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Species {
    index: usize,
    params: SpeciesParams,
    death_prob_intrinsic: f64,
    volume_factor: f64,
}

impl Species {
    pub fn new(index: usize, params: SpeciesParams) -> Result<Self> {
        let invalid = |reason: &str| SimError::InvalidSpecies {
            species: params.id.clone(),
            reason: reason.to_string(),
        };
        if params.foliage.is_zero()
            || params.woody.is_zero()
            || params.coarse_root.is_zero()
            || params.branch.is_zero()
            || params.hd_low.a == 0.0
            || params.hd_high.a == 0.0
            || params.wood_density == 0.0
            || params.form_factor == 0.0
            || params.specific_leaf_area == 0.0
            || params.fineroot_foliage_ratio == 0.0
        {
            return Err(invalid("an allometric or wood parameter is zero"));
        }
        if params.max_age * params.max_height == 0.0 {
            return Err(invalid("aging parameters (max_age, max_height) must be positive"));
        }
        if params.survival_to_max_age * params.stress_mortality == 0.0
            || !(0.0..=1.0).contains(&params.survival_to_max_age)
        {
            return Err(invalid("mortality parameters are invalid"));
        }
        if !(1.0..=5.0).contains(&params.light_response_class) {
            return Err(invalid("light response class must be within 1..5"));
        }
        let death_prob_intrinsic = 1.0 - params.survival_to_max_age.powf(1.0 / params.max_age);
        let volume_factor = params.form_factor * std::f64::consts::FRAC_PI_4;
        Ok(Self {
            index,
            params,
            death_prob_intrinsic,
            volume_factor,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> &str {
        &self.params.id
    }

    pub fn params(&self) -> &SpeciesParams {
        &self.params
    }

    pub fn biomass_foliage(&self, dbh: f64) -> f64 {
        self.params.foliage.eval(dbh)
    }

    pub fn biomass_woody(&self, dbh: f64) -> f64 {
        self.params.woody.eval(dbh)
    }

    pub fn biomass_coarse_root(&self, dbh: f64) -> f64 {
        self.params.coarse_root.eval(dbh)
    }

    pub fn biomass_branch(&self, dbh: f64) -> f64 {
        self.params.branch.eval(dbh)
    }

    pub fn specific_leaf_area(&self) -> f64 {
        self.params.specific_leaf_area
    }

    pub fn fineroot_foliage_ratio(&self) -> f64 {
        self.params.fineroot_foliage_ratio
    }

    pub fn turnover_leaf(&self) -> f64 {
        self.params.turnover_leaf
    }

    pub fn turnover_root(&self) -> f64 {
        self.params.turnover_root
    }

    pub fn hd_low(&self, dbh: f64) -> f64 {
        self.params.hd_low.eval(dbh)
    }

    pub fn hd_high(&self, dbh: f64) -> f64 {
        self.params.hd_high.eval(dbh)
    }

    pub fn wood_density(&self) -> f64 {
        self.params.wood_density
    }

    /// `form_factor * pi / 4`; stem volume is `volume_factor * d^2 * h`.
    pub fn volume_factor(&self) -> f64 {
        self.volume_factor
    }

    pub fn light_response_class(&self) -> f64 {
        self.params.light_response_class
    }

    /// Share of woody growth that goes to the stem (vs. branches) at `dbh`.
    pub fn fraction_stem(&self, dbh: f64) -> f64 {
        let branch = self.params.branch;
        let woody = self.params.woody;
        1.0 - (branch.a * branch.b * dbh.powf(branch.b - 1.0))
            / (woody.a * woody.b * dbh.powf(woody.b - 1.0))
    }

    /// Aging factor in [0, 1] for a tree of the given height (m) and age (years).
    pub fn aging(&self, height: f64, age: u32) -> f64 {
        let rel_height = (height / self.params.max_height).min(0.999999);
        let rel_age = (f64::from(age) / self.params.max_age).min(0.999999);
        let x = 1.0 - 2.0 / (1.0 / (1.0 - rel_height) + 1.0 / (1.0 - rel_age));
        self.params.aging.eval(x).clamp(0.0, 1.0)
    }

    /// Age guess from height when a stand description lacks ages.
    pub fn estimate_age(&self, height: f64) -> u32 {
        (self.params.max_age * height / self.params.max_height).max(0.0) as u32
    }

    pub fn death_prob_intrinsic(&self) -> f64 {
        self.death_prob_intrinsic
    }

    pub fn death_prob_stress(&self, stress_index: f64) -> f64 {
        if stress_index == 0.0 {
            return 0.0;
        }
        1.0 - (-self.params.stress_mortality * stress_index).exp()
    }
}

fn default_lri_correction_strength() -> f64 {
    1.0
}

/// Settings shared by all species of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LightResponseSettings {
    /// Exponent scaling of the relative-height LRI correction; 0 disables it.
    #[serde(default = "default_lri_correction_strength")]
    pub lri_correction_strength: f64,
}

impl Default for LightResponseSettings {
    fn default() -> Self {
        Self {
            lri_correction_strength: default_lri_correction_strength(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpeciesSet {
    species: Vec<Species>,
    settings: LightResponseSettings,
}

impl SpeciesSet {
    pub fn new(params: Vec<SpeciesParams>, settings: LightResponseSettings) -> Result<Self> {
        let mut species = Vec::with_capacity(params.len());
        for (index, p) in params.into_iter().enumerate() {
            if species.iter().any(|s: &Species| s.id() == p.id) {
                return Err(SimError::InvalidSpecies {
                    species: p.id,
                    reason: "duplicate species id".into(),
                });
            }
            species.push(Species::new(index, p)?);
        }
        Ok(Self { species, settings })
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Species> {
        self.species.get(index)
    }

    pub fn by_id(&self, id: &str) -> Result<&Species> {
        self.species
            .iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| SimError::UnknownSpecies(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }

    /// Light response for an LRI already scaled by the stand modifier.
    ///
    /// Interpolates between the shade intolerant (class 1) and tolerant
    /// (class 5) response curves.
    pub fn light_response(&self, lri: f64, class: f64) -> f64 {
        let intolerant = 1.0 - (-5.5 * (lri - 0.05)).exp();
        let tolerant = (10.0 * lri).min((0.1613 * lri + 0.7871).max(lri));
        (intolerant + 0.25 * (class - 1.0) * (tolerant - intolerant)).clamp(0.0, 1.0)
    }

    /// Reduces the LRI of trees below the local dominant height.
    pub fn lri_correction(&self, lri: f64, relative_height: f64) -> f64 {
        if relative_height >= 1.0 || lri <= 0.0 {
            return lri;
        }
        let exponent =
            1.0 + self.settings.lri_correction_strength * (1.0 - relative_height.max(0.0));
        lri.powf(exponent)
    }
}
