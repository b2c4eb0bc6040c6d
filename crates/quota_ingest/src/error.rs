//! Error types crossing component boundaries.

use crate::codec::DecodeError;
use thiserror::Error;

/// Errors produced by the ingestion data plane and its collaborators.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The external document store could not be reached.
    #[error("document store unreachable: {0}")]
    ConnectionFailed(String),

    /// The initial summary snapshot could not be loaded at startup.
    #[error("initial summary load failed: {0}")]
    LoadFailed(String),

    /// A JSON document or configuration file did not match the expected shape.
    #[error("parse failed: {0}")]
    Parse(String),

    /// The document store returned nil for a key that was expected to exist.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A document store command failed for a reason other than connectivity.
    #[error("store command failed: {0}")]
    CommandFailed(String),

    /// A frame failed structural or cross-field validation.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// The frame's transaction code has no registered handler.
    #[error("unknown transaction code {0:?}")]
    UnknownTransactionCode(String),

    /// An overpunch-encoded numeric field could not be decoded.
    #[error("back-office numeric field: {0}")]
    BackOfficeIntParse(#[from] DecodeError),

    /// The ingress TCP listener could not be started.
    #[error("tcp listener failed to start: {0}")]
    TcpStartFailed(String),

    /// An internal invariant was violated.
    #[error("unexpected internal state: {0}")]
    Unexpected(String),
}

impl FeedError {
    /// Init-time failures abort the process with a non-zero exit; everything
    /// else is a per-frame or per-publish error the consumer survives.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::LoadFailed(_) | Self::TcpStartFailed(_)
        )
    }
}
