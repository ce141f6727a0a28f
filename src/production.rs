//! Stand-level production per resource unit and species.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::species::Species;

/// Biomass carbon fraction used to convert gC to kg biomass.
pub const BIOMASS_C_FRACTION: f64 = 0.5;

/// State of a resource unit after interception has been computed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SiteConditions {
    pub unit: usize,
    pub year: u32,
    pub leaf_area_index: f64,
    pub stocked_area: f64,
    pub interception_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SpeciesProduction {
    /// Yearly GPP per m2 of effective (intercepting) area, kg biomass.
    pub gpp_per_area: f64,
    /// Share of NPP allocated below ground.
    pub root_fraction: f64,
    /// Environmental modifier in [0, 1].
    pub environmental_factor: f64,
}

pub trait ProductionModel: Send + Sync {
    fn produce(&self, site: &SiteConditions, species: &Species) -> SpeciesProduction;
}

fn default_radiation() -> f64 {
    1500.0
}

fn default_epsilon() -> f64 {
    1.8
}

fn default_environmental_factor() -> f64 {
    0.6
}

fn default_nitrogen_response() -> f64 {
    0.8
}

/// Light-use-efficiency production with a constant environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiationUseModel {
    /// Utilizable PAR per year (MJ/m2).
    #[serde(default = "default_radiation")]
    pub utilizable_radiation: f64,
    /// Light use efficiency (gC/MJ).
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_environmental_factor")]
    pub environmental_factor: f64,
    #[serde(default = "default_nitrogen_response")]
    pub nitrogen_response: f64,
    /// Per-species environmental factors overriding the default.
    #[serde(default)]
    pub species_factors: HashMap<String, f64>,
}

impl Default for RadiationUseModel {
    fn default() -> Self {
        Self {
            utilizable_radiation: default_radiation(),
            epsilon: default_epsilon(),
            environmental_factor: default_environmental_factor(),
            nitrogen_response: default_nitrogen_response(),
            species_factors: HashMap::new(),
        }
    }
}

impl ProductionModel for RadiationUseModel {
    fn produce(&self, _site: &SiteConditions, species: &Species) -> SpeciesProduction {
        let environmental_factor = self
            .species_factors
            .get(species.id())
            .copied()
            .unwrap_or(self.environmental_factor)
            .clamp(0.0, 1.0);
        let gc_to_kg_biomass = 1.0 / (BIOMASS_C_FRACTION * 1000.0);
        let gpp_per_area =
            self.utilizable_radiation * self.epsilon * environmental_factor * gc_to_kg_biomass;
        let root_fraction =
            0.8 / (1.0 + 2.5 * self.nitrogen_response * environmental_factor.max(1e-6));
        SpeciesProduction {
            gpp_per_area,
            root_fraction: root_fraction.clamp(0.0, 1.0),
            environmental_factor,
        }
    }
}

/// Constant production; useful to isolate the allocation from site effects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FixedProduction {
    pub gpp_per_area: f64,
    pub root_fraction: f64,
}

impl ProductionModel for FixedProduction {
    fn produce(&self, _site: &SiteConditions, _species: &Species) -> SpeciesProduction {
        SpeciesProduction {
            gpp_per_area: self.gpp_per_area,
            root_fraction: self.root_fraction,
            environmental_factor: 1.0,
        }
    }
}

/// Production section of a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ProductionSettings {
    RadiationUse(RadiationUseModel),
    Fixed(FixedProduction),
}

impl Default for ProductionSettings {
    fn default() -> Self {
        Self::RadiationUse(RadiationUseModel::default())
    }
}

impl ProductionSettings {
    pub fn build(&self) -> Box<dyn ProductionModel> {
        match self {
            Self::RadiationUse(model) => Box::new(model.clone()),
            Self::Fixed(model) => Box::new(*model),
        }
    }
}
