mod cleanup;
mod growth;
mod light_pattern;
mod light_read;
mod production;

pub use cleanup::CleanupSystem;
pub use growth::GrowthSystem;
pub use light_pattern::LightPatternSystem;
pub use light_read::LightReadSystem;
pub use production::ProductionSystem;
