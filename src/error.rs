//! Error handling for the acquisition engine
//!
//! One error enum covers the whole crate. Overflow, would-block and timeout
//! conditions are ordinary recoverable values reported to the caller through
//! `Result`; nothing in the engine panics on them. Configuration mistakes
//! (unknown attribute or backend names) are rejected at the surface where
//! they arrive and never reach the trigger or buffer state machines.

use thiserror::Error;

/// Result alias used throughout the crate
pub type DaqResult<T> = Result<T, DaqError>;

/// Errors reported by the acquisition engine
#[derive(Debug, Error)]
pub enum DaqError {
    /// Write attempted on a read-only attribute; the stored value is unchanged
    #[error("attribute '{name}' is read-only")]
    ReadOnlyAttr { name: String },

    /// Attribute name not defined for the addressed entity
    #[error("{owner} has no attribute '{name}'")]
    UnknownAttr { owner: String, name: String },

    /// Backend name not recognized during a hot-swap
    #[error("unknown {kind} backend '{name}'")]
    UnknownBackend { kind: &'static str, name: String },

    /// Block rejected by a full buffer; the producer keeps going
    #[error("buffer full, block {seq} dropped")]
    Overflow { seq: u32 },

    /// Non-blocking read found no block queued
    #[error("no block ready, operation would block")]
    WouldBlock,

    /// Blocking read gave up after the requested wait
    #[error("no block ready within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// Raw control read with a size other than the full record
    #[error("control record is {expected} bytes, request was {requested}")]
    TornRead { expected: usize, requested: usize },

    /// Manual fire command sent to a backend that has its own timing source
    #[error("trigger backend '{backend}' does not accept fire commands")]
    FireNotSupported { backend: &'static str },

    /// Device specification rejected at construction
    #[error("invalid device spec: {reason}")]
    InvalidSpec { reason: String },
}

impl DaqError {
    /// True for conditions a consumer loop is expected to see and retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DaqError::Overflow { .. } | DaqError::WouldBlock | DaqError::Timeout { .. }
        )
    }
}
