use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::logger::dump_selected_pair;
use crate::peer::connection::Session;
use crate::peer::data_channel::InputCallback;
use crate::peer::ports::allocate_pair;
use crate::peer::relay::{wait_closed, PumpExit, Relay, RelayLink};
use crate::peer::types::{LifecycleState, PortPair};

/// Latching stop flag shared by the control thread, the pumps and the
/// peer connection state handler. Only the first trigger counts.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true if this call was the one that stopped the session.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        wait_closed(&mut rx).await;
    }
}

impl Session {
    /// Binds the ingress ports, reports them through `on_ports`, starts the
    /// relay and then parks until the session is stopped. Teardown runs
    /// before this returns: sockets first, then the peer connection.
    ///
    /// The error, if any, is the one that ended the session early. The
    /// session is torn down either way.
    pub async fn run<F>(&self, on_ports: F, input: Option<InputCallback>) -> Result<()>
    where
        F: FnOnce(PortPair),
    {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != LifecycleState::Idle {
                warn!("[{}] start ignored, session is {:?}", self.id, *lifecycle);
                return Ok(());
            }
            *lifecycle = LifecycleState::Running;
        }

        let (ports, video, audio) = match allocate_pair().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("[{}] Couldn't allocate ingress ports: {e}", self.id);
                self.stop.trigger();
                self.teardown(None).await;
                return Err(e);
            }
        };

        on_ports(ports);
        if let Some(callback) = input {
            self.input.install(callback);
        }

        let relay = Relay::launch(
            &self.id,
            vec![
                RelayLink {
                    ingress: video,
                    sink: Arc::clone(&self.video.track),
                    feedback: Arc::clone(&self.video.sender),
                },
                RelayLink {
                    ingress: audio,
                    sink: Arc::clone(&self.audio.track),
                    feedback: Arc::clone(&self.audio.sender),
                },
            ],
            &self.stop,
        );
        info!(
            "[{}] Relaying RTP from 127.0.0.1:{} ({}) and 127.0.0.1:{} ({})",
            self.id, ports.video, self.video.kind, ports.audio, self.audio.kind
        );

        self.stop.wait().await;
        info!("[{}] Stop received, tearing down", self.id);

        let exits = self.teardown(Some(relay)).await;
        match exits.into_iter().find_map(|exit| match exit {
            PumpExit::Failed(e) => Some(e),
            PumpExit::Closed => None,
        }) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delivers the stop signal. Returns false if the session was already
    /// stopped.
    pub fn stop(&self) -> bool {
        let delivered = self.stop.trigger();
        if delivered {
            info!("[{}] Stop requested", self.id);
        } else {
            debug!("[{}] Stop requested again, ignoring", self.id);
        }
        delivered
    }

    /// Closes a session that was never started. Running or finished
    /// sessions are left alone.
    pub async fn close_if_idle(&self) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != LifecycleState::Idle {
                return false;
            }
            *lifecycle = LifecycleState::Terminated;
        }

        self.stop.trigger();
        self.input.clear();
        if let Err(e) = self.pc.close().await {
            warn!("[{}] Couldn't close peer connection: {e}", self.id);
        }
        info!("[{}] Idle session closed", self.id);
        true
    }

    /// Returns the forward pump exits.
    async fn teardown(&self, mut relay: Option<Relay>) -> Vec<PumpExit> {
        // no more host callbacks from here on
        self.input.clear();

        // sockets first: nothing writes to a track once the pumps are joined
        let mut exits = Vec::new();
        if let Some(relay) = relay.as_mut() {
            exits = relay.close_sockets().await;
        }

        // ========== TRANSPORT ==========
        dump_selected_pair(&self.pc, "TEARDOWN").await;
        if let Err(e) = self.pc.close().await {
            warn!("[{}] Couldn't close peer connection: {e}", self.id);
        }

        // senders are stopped now, feedback reads see a closed pipe
        if let Some(relay) = relay.as_mut() {
            relay.drain_feedback(self.config.teardown_grace()).await;
        }

        *self.lifecycle.lock() = LifecycleState::Terminated;
        info!("[{}] Session terminated", self.id);
        exits
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::BridgeConfig;

    fn offline_config() -> BridgeConfig {
        BridgeConfig {
            ice_servers: vec![],
            include_loopback_candidates: true,
            gathering_timeout_ms: Some(5000),
            teardown_grace_ms: 200,
        }
    }

    #[test]
    fn stop_signal_latches_once() {
        let stop = StopSignal::new();
        assert!(!stop.is_triggered());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(stop.clone().is_triggered());
    }

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // already stopped: returns right away
        tokio::time::timeout(Duration::from_millis(100), stop.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_reports_ports_then_tears_down_on_stop() {
        let session = Session::new(offline_config()).await.unwrap();
        assert_eq!(session.lifecycle_state(), LifecycleState::Idle);

        let (ports_tx, ports_rx) = oneshot::channel();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .run(
                        move |ports| {
                            let _ = ports_tx.send(ports);
                        },
                        None,
                    )
                    .await
            })
        };

        let ports = ports_rx.await.unwrap();
        assert_ne!(ports.video, 0);
        assert_ne!(ports.audio, 0);
        assert_ne!(ports.video, ports.audio);
        assert_eq!(session.lifecycle_state(), LifecycleState::Running);

        // unnegotiated tracks swallow writes, the pump must keep going
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&[0x80, 0x60, 0x00, 0x01, 0, 0, 0, 1, 0, 0, 0, 2], ("127.0.0.1", ports.video))
            .await
            .unwrap();

        assert!(session.stop());
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(session.lifecycle_state(), LifecycleState::Terminated);
        assert!(!session.stop());
        UdpSocket::bind(("127.0.0.1", ports.video)).await.unwrap();
        UdpSocket::bind(("127.0.0.1", ports.audio)).await.unwrap();
    }

    #[tokio::test]
    async fn second_run_is_ignored() {
        let session = Session::new(offline_config()).await.unwrap();
        session.stop();
        session.run(|_| {}, None).await.unwrap();
        assert_eq!(session.lifecycle_state(), LifecycleState::Terminated);

        let mut called = false;
        session.run(|_| called = true, None).await.unwrap();
        assert!(!called);
    }

    #[tokio::test]
    async fn idle_session_can_be_closed_once() {
        let session = Session::new(offline_config()).await.unwrap();
        assert!(session.close_if_idle().await);
        assert!(!session.close_if_idle().await);
        assert_eq!(session.lifecycle_state(), LifecycleState::Terminated);
    }
}
