//! Stable C ABI.
//!
//! Every entry point is synchronous and never unwinds into the caller.
//! Failures come back as the documented sentinel (`0` handle, null string,
//! `false`) after being logged.

pub mod session_api;
pub mod signal_api;
pub mod util_api;

pub use session_api::{
    rtp2rtc_free, rtp2rtc_init, rtp2rtc_start, rtp2rtc_stop, InputEventCallback, PortsCallback,
};
pub use signal_api::{rtp2rtc_build_offer, rtp2rtc_free_description, rtp2rtc_signal_offer};
pub use util_api::{rtp2rtc_configure, rtp2rtc_free_cstring};
