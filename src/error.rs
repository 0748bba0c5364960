use crate::id::Id;
use crate::store::EntityKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Reference already exists: {0}")]
    ReferenceAlreadyExists(String),

    #[error("Update of reference '{name}' still conflicted after {attempts} attempts")]
    ReferenceConflict { name: String, attempts: u32 },

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Id },

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
