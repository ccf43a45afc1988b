//! RTP -> WebRTC bridge.
//!
//! A host process that produces RTP on loopback UDP creates a session,
//! hands it the remote peer's offer, returns our answer to that peer and
//! then starts the session, which forwards every datagram it receives onto
//! the negotiated WebRTC tracks. The C ABI lives in [`ffi`]; the same
//! operations are available to Rust callers through [`peer::Session`].

pub mod config;
pub mod error;
pub mod ffi;
pub mod logger;
pub mod peer;
pub mod registry;
pub mod utils;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use peer::{build_description, PendingDescription, PortPair, Session};
pub use registry::{Handle, HandleRegistry};
