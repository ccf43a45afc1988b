//! Packet pumps between the loopback sockets and the negotiated tracks.
//!
//! Per media kind there are two loops. The forward pump moves each datagram
//! from the ingress socket onto the track, one read for one write, with no
//! buffering. The feedback sink drains RTCP arriving on the track's sender
//! so the interceptors never stall on an unread channel.
//!
//! Loops stop when what they read from is closed. Forward pumps watch a
//! close flag next to their socket and drop the socket on the way out;
//! feedback sinks end when the peer connection closes its senders.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use crate::config::{FEEDBACK_BUFFER_SIZE, MAX_DATAGRAM_SIZE, MAX_DRAINED_DATAGRAMS};
use crate::error::BridgeError;
use crate::peer::lifecycle::StopSignal;
use crate::peer::ports::IngressSocket;
use crate::peer::types::MediaKind;

#[derive(Debug)]
pub enum ChannelError {
    /// Orderly shutdown, the other end went away.
    Closed,
    Other(String),
}

/// Outbound half of a negotiated track.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, payload: &[u8]) -> Result<(), ChannelError>;
}

/// Inbound feedback (RTCP) associated with an outbound track.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn read_feedback(&self, buf: &mut [u8]) -> Result<(), ChannelError>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticRTP {
    async fn write_sample(&self, payload: &[u8]) -> Result<(), ChannelError> {
        match TrackLocalWriter::write(self, payload).await {
            Ok(_) => Ok(()),
            Err(e) if is_closed(&e) => Err(ChannelError::Closed),
            Err(e) => Err(ChannelError::Other(e.to_string())),
        }
    }
}

#[async_trait]
impl FeedbackSource for RTCRtpSender {
    async fn read_feedback(&self, buf: &mut [u8]) -> Result<(), ChannelError> {
        match self.read(buf).await {
            Ok(_) => Ok(()),
            Err(e) if is_closed(&e) => Err(ChannelError::Closed),
            Err(e) => Err(ChannelError::Other(e.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum PumpExit {
    Closed,
    Failed(BridgeError),
}

impl PumpExit {
    pub fn is_closed(&self) -> bool {
        matches!(self, PumpExit::Closed)
    }
}

/// Everything one media kind needs to be relayed.
pub struct RelayLink<S: ?Sized, F: ?Sized> {
    pub ingress: IngressSocket,
    pub sink: Arc<S>,
    pub feedback: Arc<F>,
}

/// Moves datagrams from `ingress` to `sink` until the socket is closed.
/// Any other failure stops the whole session.
pub async fn forward_pump<S: SampleSink + ?Sized>(
    session_id: String,
    ingress: IngressSocket,
    sink: Arc<S>,
    mut closed: watch::Receiver<bool>,
    stop: StopSignal,
) -> PumpExit {
    let kind = ingress.kind;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut forwarded: u64 = 0;

    let exit = loop {
        let n = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => {
                break drain_pending(&ingress, sink.as_ref(), &mut buf, &mut forwarded).await
            }
            res = ingress.socket.recv(&mut buf) => match res {
                Ok(n) => n,
                Err(e) => {
                    break PumpExit::Failed(BridgeError::UnrecoverableTransport(format!(
                        "{kind} socket read failed: {e}"
                    )))
                }
            },
        };

        match forward_one(sink.as_ref(), kind, &buf[..n]).await {
            None => forwarded += 1,
            Some(exit) => break exit,
        }
    };

    // the socket goes with us
    drop(ingress);
    match &exit {
        PumpExit::Closed => debug!("[{session_id}] {kind} forward pump closed after {forwarded} datagrams"),
        PumpExit::Failed(e) => {
            error!("[{session_id}] {kind} forward pump failed after {forwarded} datagrams: {e}");
            stop.trigger();
        }
    }
    exit
}

/// One datagram onto the track. `Some` means the pump has to stop.
async fn forward_one<S: SampleSink + ?Sized>(
    sink: &S,
    kind: MediaKind,
    payload: &[u8],
) -> Option<PumpExit> {
    match sink.write_sample(payload).await {
        Ok(()) => None,
        Err(ChannelError::Closed) => Some(PumpExit::Closed),
        Err(ChannelError::Other(e)) => Some(PumpExit::Failed(
            BridgeError::UnrecoverableTransport(format!("{kind} track write failed: {e}")),
        )),
    }
}

/// Forwards what was already queued on the socket when the close flag went
/// up, so datagrams sent before stop are not lost.
async fn drain_pending<S: SampleSink + ?Sized>(
    ingress: &IngressSocket,
    sink: &S,
    buf: &mut [u8],
    forwarded: &mut u64,
) -> PumpExit {
    for _ in 0..MAX_DRAINED_DATAGRAMS {
        match ingress.socket.try_recv(buf) {
            Ok(n) => match forward_one(sink, ingress.kind, &buf[..n]).await {
                None => *forwarded += 1,
                Some(exit) => return exit,
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                debug!("{} socket drain stopped: {e}", ingress.kind);
                break;
            }
        }
    }
    PumpExit::Closed
}

/// True for every shape a closed channel takes on its way out of webrtc-rs:
/// the bare error, wrapped by the interceptor chain or util, or flattened
/// into a message by a track with several bindings.
pub(crate) fn is_closed(err: &webrtc::Error) -> bool {
    match err {
        webrtc::Error::ErrClosedPipe => true,
        webrtc::Error::Interceptor(webrtc::interceptor::Error::Util(e))
        | webrtc::Error::Util(e) => util_is_closed(e),
        other => mentions_closed(&other.to_string()),
    }
}

fn util_is_closed(err: &webrtc::util::Error) -> bool {
    matches!(err, webrtc::util::Error::ErrBufferClosed) || mentions_closed(&err.to_string())
}

fn mentions_closed(message: &str) -> bool {
    message.contains(&webrtc::Error::ErrClosedPipe.to_string())
}

/// Resolves once the flag is raised or its sender is gone.
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

/// Reads and discards feedback until the source closes.
pub async fn feedback_sink<F: FeedbackSource + ?Sized>(
    session_id: String,
    kind: MediaKind,
    source: Arc<F>,
) -> PumpExit {
    let mut buf = vec![0u8; FEEDBACK_BUFFER_SIZE];
    loop {
        match source.read_feedback(&mut buf).await {
            Ok(()) => {}
            Err(ChannelError::Closed) => {
                debug!("[{session_id}] {kind} feedback sink closed");
                return PumpExit::Closed;
            }
            Err(ChannelError::Other(e)) => {
                warn!("[{session_id}] {kind} feedback read failed: {e}");
                return PumpExit::Failed(BridgeError::UnrecoverableTransport(e));
            }
        }
    }
}

/// The running pumps of one session.
pub struct Relay {
    session_id: String,
    socket_close: watch::Sender<bool>,
    forward: Vec<(MediaKind, JoinHandle<PumpExit>)>,
    feedback: Vec<(MediaKind, JoinHandle<PumpExit>)>,
}

impl Relay {
    /// Spawns a forward pump and a feedback sink per link.
    pub fn launch<S, F>(session_id: &str, links: Vec<RelayLink<S, F>>, stop: &StopSignal) -> Relay
    where
        S: SampleSink + ?Sized + 'static,
        F: FeedbackSource + ?Sized + 'static,
    {
        let (socket_close, closed) = watch::channel(false);
        let mut forward = Vec::with_capacity(links.len());
        let mut feedback = Vec::with_capacity(links.len());

        for link in links {
            let kind = link.ingress.kind;
            feedback.push((
                kind,
                tokio::spawn(feedback_sink(session_id.to_owned(), kind, link.feedback)),
            ));
            forward.push((
                kind,
                tokio::spawn(forward_pump(
                    session_id.to_owned(),
                    link.ingress,
                    link.sink,
                    closed.clone(),
                    stop.clone(),
                )),
            ));
        }
        debug!("[{session_id}] Relay launched with {} links", forward.len());

        Relay {
            session_id: session_id.to_owned(),
            socket_close,
            forward,
            feedback,
        }
    }

    /// Closes both ingress sockets and waits for the forward pumps to exit.
    /// Nothing writes to the tracks once this returns.
    pub async fn close_sockets(&mut self) -> Vec<PumpExit> {
        self.socket_close.send_replace(true);
        let mut exits = Vec::with_capacity(self.forward.len());
        for (kind, handle) in self.forward.drain(..) {
            exits.push(join_pump(&self.session_id, kind, handle).await);
        }
        exits
    }

    /// Waits for the feedback sinks to notice the closed transport. Sinks
    /// still running after `grace` are aborted.
    pub async fn drain_feedback(&mut self, grace: Duration) -> Vec<PumpExit> {
        let mut exits = Vec::with_capacity(self.feedback.len());
        for (kind, mut handle) in self.feedback.drain(..) {
            match timeout(grace, &mut handle).await {
                Ok(joined) => exits.push(pump_result(&self.session_id, kind, joined)),
                Err(_) => {
                    warn!(
                        "[{}] {kind} feedback sink still running after {} ms, aborting",
                        self.session_id,
                        grace.as_millis()
                    );
                    handle.abort();
                    exits.push(PumpExit::Closed);
                }
            }
        }
        exits
    }
}

async fn join_pump(session_id: &str, kind: MediaKind, handle: JoinHandle<PumpExit>) -> PumpExit {
    pump_result(session_id, kind, handle.await)
}

fn pump_result(
    session_id: &str,
    kind: MediaKind,
    joined: Result<PumpExit, tokio::task::JoinError>,
) -> PumpExit {
    joined.unwrap_or_else(|e| {
        error!("[{session_id}] {kind} pump task died: {e}");
        PumpExit::Failed(BridgeError::UnrecoverableTransport(e.to_string()))
    })
}
