use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::peer::connection::Session;
use crate::peer::signaling::PendingDescription;
use crate::registry::HandleRegistry;

// ========== GLOBAL STATE ==========

/// Live sessions, addressed by the handles given to the host.
pub static SESSIONS: Lazy<HandleRegistry<Arc<Session>>> = Lazy::new(HandleRegistry::new);

/// Parsed offers waiting to be signaled.
pub static DESCRIPTIONS: Lazy<HandleRegistry<PendingDescription>> =
    Lazy::new(HandleRegistry::new);

/// Settings used for every session created from now on.
pub static BRIDGE_CONFIG: Lazy<Mutex<BridgeConfig>> =
    Lazy::new(|| Mutex::new(BridgeConfig::default()));

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Shared runtime that drives every session. Built on first use.
pub fn runtime() -> Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("rtp2rtc-worker")
            .build()
            .map_err(|e| BridgeError::Construction(format!("couldn't build runtime: {e}")))
    })
}

pub fn current_config() -> BridgeConfig {
    BRIDGE_CONFIG.lock().clone()
}
