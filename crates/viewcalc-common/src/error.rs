use thiserror::Error;

/// Errors raised while constructing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("duplicate value property `{0}`")]
    DuplicateProperty(String),
}
