//! Error types for fleet synchronization.
//!
//! Errors reach a caller only from configuration loading, transport emission
//! and requests to a stopped tracker. Everything on the data path (bad
//! reports, frames for unknown entities, a missing render surface) is absorbed
//! locally with a log line and a stats counter.

use thiserror::Error;

use crate::protocol::EntityKey;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed report for {key}: {reason}")]
    MalformedReport { key: EntityKey, reason: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Render surface not attached")]
    SurfaceUnavailable,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for fleet-sync operations
pub type SyncResult<T> = Result<T, SyncError>;
