//! Error types for scene mutation and operation parsing.

use thiserror::Error;

use crate::mesh::ElementClass;

/// Failures raised by a [`Scene`](crate::scene::Scene) implementation.
///
/// None of these are fatal: the focus manager and the codec log and skip
/// the offending step, leaving prior state intact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("Entity not found: {0}")]
    MissingEntity(String),
    #[error("{class:?} index {index} not found on edit target")]
    MissingElement { class: ElementClass, index: usize },
    #[error("No active entity to edit")]
    NoEditTarget,
    #[error("Name already in use: {0}")]
    NameTaken(String),
}

/// Failures raised while turning a wire payload into an [`Operation`](crate::operation::Operation).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Malformed operation: {0}")]
    Malformed(String),
}
