use thiserror::Error;

use crate::tree::TreeId;

pub type Result<T, E = SimError> = std::result::Result<T, E>;

/// Structural failures. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid parameters for species '{species}': {reason}")]
    InvalidSpecies { species: String, reason: String },

    #[error("tree {id} is invalid: {reason}")]
    InvalidTree { id: TreeId, reason: String },

    #[error("no stamp for species '{species}' (dbh {dbh:.2} cm, height {height:.2} m)")]
    MissingStamp {
        species: String,
        dbh: f64,
        height: f64,
    },

    #[error("tree {id} reaches outside the grid at cell ({x}, {y})")]
    OutOfGrid { id: TreeId, x: i64, y: i64 },

    #[error("invalid landscape: {0}")]
    InvalidLandscape(String),

    #[error("unknown species '{0}'")]
    UnknownSpecies(String),

    #[error("malformed stamp data: {0}")]
    StampFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
