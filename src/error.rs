//! Error type for the display engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("entity id must not contain whitespace: {0:?}")]
    InvalidId(String),

    #[error("entity id already registered: {0}")]
    DuplicateId(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("entity has not been spawned: {0}")]
    NotSpawned(String),

    #[error("entity {0} does not have a text appearance")]
    NotText(String),

    #[error("animation for {0} has no frames")]
    EmptyAnimation(String),

    #[error("brightness out of range (block={block}, sky={sky}); both must be 0..=15")]
    InvalidBrightness { block: i32, sky: i32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DisplayError>;

/// Ids are user-chosen strings; whitespace is the only thing rejected.
pub fn validate_id(id: &str) -> Result<()> {
    if id.chars().any(char::is_whitespace) {
        return Err(DisplayError::InvalidId(id.to_string()));
    }
    Ok(())
}
