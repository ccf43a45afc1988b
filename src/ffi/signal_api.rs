use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

use tracing::{debug, error};

use crate::error::{BridgeError, Result};
use crate::ffi::util_api::{borrow_bytes, ffi_guard};
use crate::peer::signaling::build_description;
use crate::peer::state::{runtime, DESCRIPTIONS, SESSIONS};
use crate::registry::{raw_handle, Handle};

/// Parses a remote offer (`{"type":"offer","sdp":"..."}`, raw or base64).
/// Returns a description handle, or `0` if the input is malformed or
/// invalid. Nothing is registered on failure.
///
/// # Safety
/// `offer` must be null or valid for reads of `offer_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rtp2rtc_build_offer(offer: *const u8, offer_len: usize) -> u64 {
    ffi_guard("rtp2rtc_build_offer", 0, || {
        let Some(raw) = (unsafe { borrow_bytes(offer, offer_len) }) else {
            error!("rtp2rtc_build_offer called with a null pointer");
            return 0;
        };
        match build_description(raw) {
            Ok(desc) => raw_handle(Some(DESCRIPTIONS.register(desc))),
            Err(e) => {
                error!("{e}");
                0
            }
        }
    })
}

/// Signals the offer behind `desc` to `session` and returns the answer
/// JSON, ICE candidates included. Blocks until ICE gathering finishes.
///
/// The description is consumed once the session handle checks out, whether
/// or not signaling succeeds. Returns null on any failure. The returned
/// string must be released with `rtp2rtc_free_cstring`.
#[no_mangle]
pub extern "C" fn rtp2rtc_signal_offer(session: u64, desc: u64) -> *mut c_char {
    ffi_guard("rtp2rtc_signal_offer", ptr::null_mut(), || {
        match signal_offer(session, desc) {
            Ok(answer) => answer.into_raw(),
            Err(e) => {
                error!("Signaling failed: {e}");
                ptr::null_mut()
            }
        }
    })
}

fn signal_offer(session: u64, desc: u64) -> Result<CString> {
    let session_handle = Handle::from_raw(session).ok_or(BridgeError::InvalidHandle(session))?;
    let session = SESSIONS.resolve(session_handle)?;

    let desc_handle = Handle::from_raw(desc).ok_or(BridgeError::InvalidHandle(desc))?;
    let offer = DESCRIPTIONS.take(desc_handle)?;

    let answer = runtime()?.block_on(session.signal(offer))?;
    CString::new(answer)
        .map_err(|e| BridgeError::LocalDescription(format!("answer contains NUL: {e}")))
}

/// Drops a description that was never signaled. Unknown handles and `0`
/// are ignored.
#[no_mangle]
pub extern "C" fn rtp2rtc_free_description(desc: u64) {
    ffi_guard("rtp2rtc_free_description", (), || {
        let released = Handle::from_raw(desc).and_then(|h| DESCRIPTIONS.release(h));
        if released.is_none() {
            debug!("rtp2rtc_free_description: {desc:#x} already released");
        }
    })
}
