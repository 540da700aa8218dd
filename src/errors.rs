//! # Error Types Module
//!
//! Error taxonomy for the pantry core. Validation and not-found errors are
//! raised immediately; storage failures are wrapped unchanged so callers see
//! the original cause.

use thiserror::Error;

use crate::shopping::TransferReport;

/// Errors raised by the pantry core
#[derive(Error, Debug)]
pub enum PantryError {
    /// Malformed ingredient name, unit or quantity
    #[error("Invalid ingredient: {0}")]
    InvalidIngredient(String),

    /// Unknown recipe id
    #[error("Recipe not found: {0}")]
    RecipeNotFound(i64),

    /// Entity missing or not owned by the requesting user
    #[error("Not found: {0}")]
    NotFound(String),

    /// A transfer batch stopped on a storage failure after applying part of it
    #[error("Transfer interrupted after {} applied entries: {source}", .applied.transferred.len())]
    TransferInterrupted {
        applied: TransferReport,
        #[source]
        source: anyhow::Error,
    },

    /// Failure reported by the storage collaborator
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PantryError {
    /// Shorthand for an ownership/lookup miss on a user's row
    pub fn not_found(kind: &str, id: i64, user_id: i64) -> Self {
        PantryError::NotFound(format!("{kind} {id} for user {user_id}"))
    }
}

/// Convenience Result type using the pantry error
pub type Result<T> = std::result::Result<T, PantryError>;
