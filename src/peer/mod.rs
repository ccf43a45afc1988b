pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod lifecycle;
pub mod ports;
pub mod relay;
pub mod signaling;
pub mod state;
pub mod types;

pub use connection::Session;
pub use lifecycle::StopSignal;
pub use signaling::{build_description, PendingDescription};
pub use state::{BRIDGE_CONFIG, DESCRIPTIONS, SESSIONS};
pub use types::{LifecycleState, MediaKind, PortPair, ServerConfig, SignalingState};
