use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::{
    grid::RU_SIZE,
    landscape::{Landscape, LandscapeSettings, ModelSettings},
    production::ProductionSettings,
    rng::{RngExt, RngManager},
    species::{LightResponseSettings, SpeciesParams, SpeciesSet},
    stamp::{io as stamp_io, synthetic, SpeciesStamps, StampStore},
};

fn default_snapshot_interval_years() -> u32 {
    10
}

fn default_hd_ratio() -> f64 {
    80.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub seed: u64,
    #[serde(default)]
    pub years: Option<u32>,
    #[serde(default = "default_snapshot_interval_years")]
    pub snapshot_interval_years: u32,
    pub landscape: LandscapeSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub production: ProductionSettings,
    /// Binary reader stamp set; generated when omitted.
    #[serde(default)]
    pub reader_stamps: Option<PathBuf>,
    pub species: Vec<SpeciesParams>,
    #[serde(default)]
    pub stands: Vec<StandInit>,
    /// Directory relative paths in the file are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Initial trees of one resource unit.
#[derive(Debug, Clone, Deserialize)]
pub struct StandInit {
    pub column: usize,
    pub row: usize,
    #[serde(default)]
    pub trees: Vec<TreeSpec>,
    #[serde(default)]
    pub cohorts: Vec<CohortSpec>,
}

/// A single tree; `x` and `y` are metres inside the resource unit.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeSpec {
    pub species: String,
    pub x: f64,
    pub y: f64,
    pub dbh: f64,
    pub height: f64,
    #[serde(default)]
    pub age: Option<u32>,
}

/// Randomly placed trees with normally distributed diameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CohortSpec {
    pub species: String,
    pub count: usize,
    pub dbh_mean: f64,
    #[serde(default)]
    pub dbh_sd: f64,
    #[serde(default = "default_hd_ratio")]
    pub hd_ratio: f64,
    #[serde(default)]
    pub age: Option<u32>,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let mut scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        scenario.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir.clone());
        Ok(scenario)
    }
}

impl Scenario {
    pub fn years(&self, override_years: Option<u32>) -> u32 {
        override_years.or(self.years).unwrap_or(100)
    }

    pub fn build_landscape(&self) -> Result<Landscape> {
        let species = SpeciesSet::new(
            self.species.clone(),
            LightResponseSettings {
                lri_correction_strength: self.model.lri_correction_strength,
            },
        )
        .with_context(|| format!("Invalid species in scenario {}", self.name))?;
        let stamps = self.build_stamps()?;
        let mut landscape = Landscape::new(
            self.landscape.clone(),
            self.model.clone(),
            species,
            stamps,
            self.production.build(),
        )
        .with_context(|| format!("Invalid landscape in scenario {}", self.name))?;

        let mut rng = RngManager::new(self.seed);
        let mut stream = rng.stream("stands");
        for stand in &self.stands {
            self.plant_stand(&mut landscape, stand, &mut stream)?;
        }
        debug!(
            scenario = %self.name,
            trees = landscape.living_trees(),
            "stands initialized"
        );
        Ok(landscape)
    }

    fn build_stamps(&self) -> Result<StampStore> {
        let readers = match &self.reader_stamps {
            Some(path) => self.load_stamps(path)?,
            None => synthetic::reader_stamps(),
        };
        let mut store = StampStore::new(readers);
        for params in &self.species {
            let set = match &params.stamps {
                Some(path) => self.load_stamps(path)?,
                None => synthetic::species_stamps(&params.id),
            };
            store.push_species(set);
        }
        Ok(store)
    }

    fn load_stamps(&self, path: &Path) -> Result<SpeciesStamps> {
        let path = self.base_dir.join(path);
        stamp_io::load(&path).with_context(|| format!("Failed to load stamps {}", path.display()))
    }

    fn plant_stand(
        &self,
        landscape: &mut Landscape,
        stand: &StandInit,
        rng: &mut impl Rng,
    ) -> Result<()> {
        let (x0, y0) = (stand.column as f64 * RU_SIZE, stand.row as f64 * RU_SIZE);
        for tree in &stand.trees {
            if !(0.0..RU_SIZE).contains(&tree.x) || !(0.0..RU_SIZE).contains(&tree.y) {
                bail!(
                    "tree at ({}, {}) lies outside stand ({}, {})",
                    tree.x,
                    tree.y,
                    stand.column,
                    stand.row
                );
            }
            landscape
                .add_tree(
                    &tree.species,
                    x0 + tree.x,
                    y0 + tree.y,
                    tree.dbh,
                    tree.height,
                    tree.age,
                )
                .with_context(|| format!("Invalid tree in stand ({}, {})", stand.column, stand.row))?;
        }
        for cohort in &stand.cohorts {
            for _ in 0..cohort.count {
                let x = rng.uniform(0.0, RU_SIZE);
                let y = rng.uniform(0.0, RU_SIZE);
                let dbh = rng.normal(cohort.dbh_mean, cohort.dbh_sd).max(1.0);
                let height = dbh * cohort.hd_ratio / 100.0;
                landscape
                    .add_tree(&cohort.species, x0 + x, y0 + y, dbh, height, cohort.age)
                    .with_context(|| {
                        format!("Invalid cohort in stand ({}, {})", stand.column, stand.row)
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: minimal
seed: 3
landscape:
  columns: 1
  rows: 1
production:
  model: fixed
  gpp_per_area: 2.0
  root_fraction: 0.3
species:
  - id: piab
    foliage: { a: 0.01, b: 1.8304 }
    woody: { a: 0.0811, b: 2.4147 }
    coarse_root: { a: 0.0198, b: 2.4015 }
    branch: { a: 0.0171, b: 2.3101 }
    specific_leaf_area: 5.8
    fineroot_foliage_ratio: 0.4
    turnover_leaf: 0.2
    turnover_root: 0.33
    hd_low: { a: 80.0, b: -0.15 }
    hd_high: { a: 200.0, b: -0.2 }
    wood_density: 370.0
    form_factor: 0.5
    max_age: 500.0
    max_height: 50.0
    survival_to_max_age: 0.01
    stress_mortality: 5.0
    light_response_class: 3.0
stands:
  - column: 0
    row: 0
    trees:
      - { species: piab, x: 50.0, y: 50.0, dbh: 30.0, height: 25.0 }
    cohorts:
      - { species: piab, count: 20, dbh_mean: 20.0, dbh_sd: 4.0 }
"#;

    fn minimal() -> Scenario {
        serde_yaml::from_str(MINIMAL).unwrap()
    }

    #[test]
    fn defaults_are_filled_in() {
        let scenario = minimal();
        assert_eq!(scenario.landscape.buffer_cells, 6);
        assert!(!scenario.landscape.torus);
        assert_eq!(scenario.model.light_extinction_coefficient, 0.5);
        assert_eq!(scenario.snapshot_interval_years, 10);
        assert_eq!(scenario.years(None), 100);
        assert_eq!(scenario.years(Some(5)), 5);
    }

    #[test]
    fn stands_are_planted_reproducibly() {
        let scenario = minimal();
        let a = scenario.build_landscape().unwrap();
        let b = scenario.build_landscape().unwrap();
        assert_eq!(a.living_trees(), 21);
        let dbh = |l: &Landscape| l.units[0].trees().iter().map(|t| t.dbh()).collect::<Vec<_>>();
        assert_eq!(dbh(&a), dbh(&b));
        assert!(a.units[0].trees().iter().all(|t| t.dbh() >= 1.0));
    }

    #[test]
    fn trees_outside_their_stand_are_rejected() {
        let mut scenario = minimal();
        scenario.stands[0].trees[0].x = 120.0;
        assert!(scenario.build_landscape().is_err());
    }
}
