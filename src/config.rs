use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::peer::types::ServerConfig;

// Logging is on by default only in debug builds. Release builds stay quiet
// unless the host sets RTP2RTC_LOG.
#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "RTP2RTC_LOG";

/// Largest datagram a forward pump reads in one go. Anything longer is
/// truncated by the socket.
pub const MAX_DATAGRAM_SIZE: usize = 1600;

/// Upper bound on datagrams forwarded from the socket queue once a pump has
/// been told to close.
pub const MAX_DRAINED_DATAGRAMS: usize = 256;

/// Buffer size used when draining RTCP feedback.
pub const FEEDBACK_BUFFER_SIZE: usize = 1500;

pub const DEFAULT_TEARDOWN_GRACE_MS: u64 = 2000;

/// Process-wide bridge settings, applied to sessions created after the
/// last `configure` call.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub include_loopback_candidates: bool,
    /// `None` waits for ICE gathering indefinitely.
    pub gathering_timeout_ms: Option<u64>,
    pub teardown_grace_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            include_loopback_candidates: false,
            gathering_timeout_ms: None,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE_MS,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_slice(raw)
            .map_err(|e| BridgeError::Config(format!("couldn't parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(BridgeError::Config(format!(
                    "ICE server {} has an empty URL",
                    server.id
                )));
            }
            if server.r#type == "turn"
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(BridgeError::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn gathering_timeout(&self) -> Option<Duration> {
        self.gathering_timeout_ms.map(Duration::from_millis)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
