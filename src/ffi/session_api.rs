use std::os::raw::c_void;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{BridgeError, Result};
use crate::ffi::util_api::ffi_guard;
use crate::peer::connection::Session;
use crate::peer::data_channel::InputCallback;
use crate::peer::state::{current_config, runtime, SESSIONS};
use crate::peer::types::LifecycleState;
use crate::registry::{raw_handle, Handle};

/// Receives the bound ingress ports, once per `rtp2rtc_start`, before any
/// datagram is forwarded.
pub type PortsCallback = extern "C" fn(video: u16, audio: u16, user_data: *mut c_void);

/// Receives one input-event message from the remote peer. Called from a
/// worker thread; the buffer is only valid for the duration of the call.
pub type InputEventCallback = extern "C" fn(data: *const u8, len: usize);

/// Creates a session: peer connection, video and audio tracks, input
/// channel handler. Returns `0` if any part of that fails.
#[no_mangle]
pub extern "C" fn rtp2rtc_init() -> u64 {
    ffi_guard("rtp2rtc_init", 0, || match init() {
        Ok(handle) => raw_handle(Some(handle)),
        Err(e) => {
            error!("RTP2RTC init failed: {e}");
            0
        }
    })
}

fn init() -> Result<Handle> {
    let session = runtime()?.block_on(Session::new(current_config()))?;
    Ok(SESSIONS.register(session))
}

fn resolve(raw: u64) -> Result<Arc<Session>> {
    let handle = Handle::from_raw(raw).ok_or(BridgeError::InvalidHandle(raw))?;
    SESSIONS.resolve(handle)
}

/// Runs the relay. Binds two loopback UDP ports, reports them through
/// `ports_callback`, forwards RTP until `rtp2rtc_stop` is called, tears
/// everything down and returns.
///
/// Errors after this call has started (bind failures, transport failures)
/// end the session and are logged; they never abort the process.
#[no_mangle]
pub extern "C" fn rtp2rtc_start(
    session: u64,
    ports_callback: Option<PortsCallback>,
    ports_callback_user_data: *mut c_void,
    input_callback: Option<InputEventCallback>,
) {
    ffi_guard("rtp2rtc_start", (), || {
        if let Err(e) = start(session, ports_callback, ports_callback_user_data, input_callback) {
            error!("Session {session:#x} ended with an error: {e}");
        }
    })
}

fn start(
    raw: u64,
    ports_callback: Option<PortsCallback>,
    user_data: *mut c_void,
    input_callback: Option<InputEventCallback>,
) -> Result<()> {
    let session = resolve(raw)?;
    let input = input_callback.map(|callback| -> InputCallback {
        Box::new(move |data: &[u8]| callback(data.as_ptr(), data.len()))
    });

    runtime()?.block_on(session.run(
        |ports| match ports_callback {
            Some(callback) => callback(ports.video, ports.audio, user_data),
            None => warn!("No ports callback given, ports {ports:?} go unreported"),
        },
        input,
    ))
}

/// Asks a running session to stop. Safe to call any number of times.
#[no_mangle]
pub extern "C" fn rtp2rtc_stop(session: u64) {
    ffi_guard("rtp2rtc_stop", (), || match resolve(session) {
        Ok(s) => {
            s.stop();
        }
        Err(_) => debug!("rtp2rtc_stop: {session:#x} is not a live session"),
    })
}

/// Releases a session handle. Call after `rtp2rtc_start` has returned; a
/// session that never started is closed here. `0` and stale handles are
/// ignored.
#[no_mangle]
pub extern "C" fn rtp2rtc_free(session: u64) {
    ffi_guard("rtp2rtc_free", (), || {
        let Some(s) = Handle::from_raw(session).and_then(|h| SESSIONS.release(h)) else {
            debug!("rtp2rtc_free: {session:#x} already released");
            return;
        };

        match s.lifecycle_state() {
            LifecycleState::Idle => match runtime() {
                Ok(rt) => {
                    rt.block_on(s.close_if_idle());
                }
                Err(e) => error!("Couldn't close session {}: {e}", s.id()),
            },
            LifecycleState::Running => {
                warn!("Session {} freed while running, stopping it", s.id());
                s.stop();
            }
            LifecycleState::Terminated => {}
        }
        debug!("Session {} released", s.id());
    })
}
