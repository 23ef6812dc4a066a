//! Error taxonomy for the node core (see SPEC_FULL.md §7).

use crate::ids::ModifierId;
use thiserror::Error;

/// A single typed failure, always naming the offending modifier when one
/// exists. Never swallowed: every fallible core operation returns this (or
/// `anyhow::Error` at the storage boundary, converted via
/// [`CoreError::storage`]).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Static transaction or header defect, independent of current state.
    #[error("semantically invalid modifier {id}: {message}")]
    SemanticInvalid { id: ModifierId, message: String },

    /// Box missing, unlock failure, balance negative, state-root mismatch.
    #[error("state-invalid modifier {id}: {message}")]
    StateInvalid { id: ModifierId, message: String },

    /// Proof-of-work check failed.
    #[error("proof-of-work invalid for {id}: {message}")]
    PowInvalid { id: ModifierId, message: String },

    /// Parent missing, height off by one, timestamp drift, etc.
    #[error("chain-structural error at {id}: {message}")]
    ChainStructural { id: ModifierId, message: String },

    /// Mempool full, rollback too deep.
    #[error("capacity exceeded: {message}")]
    Capacity { message: String },

    /// KV or prover I/O, digest mismatch, unknown rollback digest.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Unrecognised modifier type.
    #[error("unknown modifier type for {id}: {message}")]
    UnknownType { id: ModifierId, message: String },
}

impl CoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        CoreError::Storage {
            message: message.into(),
        }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        CoreError::Capacity {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::storage(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
