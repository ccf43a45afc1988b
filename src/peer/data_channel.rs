use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Receives raw input-event payloads from the remote peer.
pub type InputCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Where input messages go. Empty until `start` installs the host callback,
/// emptied again at teardown.
#[derive(Clone, Default)]
pub struct InputSink {
    callback: Arc<Mutex<Option<InputCallback>>>,
}

impl InputSink {
    pub fn install(&self, callback: InputCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn clear(&self) {
        self.callback.lock().take();
    }

    /// Hands the payload to the callback. Returns false when nobody listens.
    pub fn deliver(&self, data: &[u8]) -> bool {
        match self.callback.lock().as_ref() {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }
}

/// Wires a remote-opened data channel to the session's input sink.
pub fn attach_input_channel(session_id: &str, dc: &Arc<RTCDataChannel>, sink: InputSink) {
    info!(
        "[{session_id}] Remote opened data channel '{}' (id {})",
        dc.label(),
        dc.id()
    );

    let open_id = session_id.to_owned();
    let label = dc.label().to_owned();
    dc.on_open(Box::new(move || {
        debug!("[{open_id}] Data channel '{label}' open");
        Box::pin(async {})
    }));

    let msg_id = session_id.to_owned();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        if !sink.deliver(&msg.data) {
            debug!(
                "[{msg_id}] Dropping {} byte input message, no input callback installed",
                msg.data.len()
            );
        }
        Box::pin(async {})
    }));

    let close_id = session_id.to_owned();
    dc.on_close(Box::new(move || {
        debug!("[{close_id}] Data channel closed");
        Box::pin(async {})
    }));
}
