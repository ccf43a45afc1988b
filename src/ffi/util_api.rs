use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, info};

use crate::config::BridgeConfig;
use crate::logger::init_logging;
use crate::peer::state::BRIDGE_CONFIG;

/// Runs an entry point body, turning a panic into `fallback`.
pub(crate) fn ffi_guard<T>(name: &str, fallback: T, body: impl FnOnce() -> T) -> T {
    init_logging();
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(_) => {
            error!("{name} panicked, returning sentinel");
            fallback
        }
    }
}

/// Borrows `len` bytes from the caller. Null means "no input".
///
/// # Safety
/// `ptr` must be null or valid for reads of `len` bytes.
pub(crate) unsafe fn borrow_bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(ptr, len))
    }
}

/// Replaces the process-wide configuration with the given JSON document.
/// Sessions created afterwards use it. Returns false and keeps the old
/// configuration if the document is invalid.
///
/// # Safety
/// `json` must be null or valid for reads of `json_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rtp2rtc_configure(json: *const u8, json_len: usize) -> bool {
    ffi_guard("rtp2rtc_configure", false, || {
        let Some(raw) = (unsafe { borrow_bytes(json, json_len) }) else {
            error!("rtp2rtc_configure called with a null pointer");
            return false;
        };
        match BridgeConfig::from_json(raw) {
            Ok(config) => {
                info!(
                    "Configured {} ICE servers, gathering timeout {:?}",
                    config.ice_servers.len(),
                    config.gathering_timeout_ms
                );
                *BRIDGE_CONFIG.lock() = config;
                true
            }
            Err(e) => {
                error!("{e}");
                false
            }
        }
    })
}

/// Frees a string returned by this library. Null is ignored.
///
/// # Safety
/// `cstring` must be null or a pointer obtained from this library that has
/// not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn rtp2rtc_free_cstring(cstring: *mut c_char) {
    if cstring.is_null() {
        return;
    }
    drop(CString::from_raw(cstring));
}
