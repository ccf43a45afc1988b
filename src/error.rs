//! Error types for the bridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Malformed description: {0}")]
    MalformedDescription(String),

    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    #[error("Remote description rejected: {0}")]
    Negotiation(String),

    #[error("Answer generation failed: {0}")]
    AnswerGeneration(String),

    #[error("Local description rejected: {0}")]
    LocalDescription(String),

    #[error("ICE gathering did not complete within {0} ms")]
    GatheringTimeout(u64),

    #[error("Couldn't bind {kind} socket: {source}")]
    Bind {
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecoverable transport error: {0}")]
    UnrecoverableTransport(String),

    #[error("Invalid handle {0:#x}")]
    InvalidHandle(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
