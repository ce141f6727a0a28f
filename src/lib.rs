pub mod context;
pub mod engine;
pub mod error;
pub mod grid;
pub mod landscape;
pub mod production;
pub mod resource_unit;
pub mod rng;
pub mod scenario;
pub mod snag;
pub mod snapshot;
pub mod solver;
pub mod species;
pub mod stamp;
pub mod systems;
pub mod tree;

pub use engine::{Engine, EngineBuilder, EngineSettings, YearSummary};
pub use error::SimError;
pub use landscape::Landscape;
pub use scenario::{Scenario, ScenarioLoader};
