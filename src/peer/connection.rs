use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::logger::dump_candidate;
use crate::peer::data_channel::{attach_input_channel, InputSink};
use crate::peer::lifecycle::StopSignal;
use crate::peer::types::{LifecycleState, MediaKind, SignalingState};
use crate::utils::{random_id, to_ice_servers};

/// An outbound track together with the sender whose RTCP we drain.
pub struct MediaLink {
    pub kind: MediaKind,
    pub track: Arc<TrackLocalStaticRTP>,
    pub sender: Arc<RTCRtpSender>,
}

/// One RTP -> WebRTC bridge.
///
/// Tracks, the RTCP senders and the input handler are wired up before any
/// signaling happens and are never replaced afterwards. The only mutable
/// bits are the two small state cells.
pub struct Session {
    pub(crate) id: String,
    pub(crate) pc: Arc<RTCPeerConnection>,
    pub(crate) video: MediaLink,
    pub(crate) audio: MediaLink,
    pub(crate) input: InputSink,
    pub(crate) stop: StopSignal,
    pub(crate) signaling: Mutex<SignalingState>,
    pub(crate) lifecycle: Mutex<LifecycleState>,
    pub(crate) config: BridgeConfig,
}

impl Session {
    /// Builds the peer connection, both tracks and the input channel handler.
    /// Either everything is in place or the half-built connection is closed
    /// and an error comes back.
    pub async fn new(config: BridgeConfig) -> Result<Arc<Session>> {
        let id = random_id();
        let pc = new_peer(&config).await?;

        let stop = StopSignal::new();
        let input = InputSink::default();
        install_handlers(&pc, &id, &stop, &input);

        let links = async {
            let video = add_media(&pc, MediaKind::Video, &id).await?;
            let audio = add_media(&pc, MediaKind::Audio, &id).await?;
            Ok::<_, BridgeError>((video, audio))
        }
        .await;

        let (video, audio) = match links {
            Ok(links) => links,
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    warn!("[{id}] Couldn't close half-built peer connection: {close_err}");
                }
                return Err(e);
            }
        };

        info!("[{id}] Session created");
        Ok(Arc::new(Session {
            id,
            pc,
            video,
            audio,
            input,
            stop,
            signaling: Mutex::new(SignalingState::Created),
            lifecycle: Mutex::new(LifecycleState::Idle),
            config,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub fn signaling_state(&self) -> SignalingState {
        *self.signaling.lock()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    pub(crate) fn set_signaling_state(&self, state: SignalingState) {
        debug!("[{}] Signaling state -> {:?}", self.id, state);
        *self.signaling.lock() = state;
    }
}

async fn new_peer(config: &BridgeConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| BridgeError::Construction(format!("couldn't register codecs: {e}")))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| BridgeError::Construction(format!("couldn't register interceptors: {e}")))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_include_loopback_candidate(config.include_loopback_candidates);

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    let pc = api
        .new_peer_connection(rtc_config(config))
        .await
        .map_err(|e| BridgeError::Construction(format!("couldn't create peer connection: {e}")))?;
    Ok(Arc::new(pc))
}

fn rtc_config(config: &BridgeConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: to_ice_servers(&config.ice_servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    }
}

async fn add_media(pc: &RTCPeerConnection, kind: MediaKind, session_id: &str) -> Result<MediaLink> {
    let track = Arc::new(TrackLocalStaticRTP::new(
        codec_for(kind),
        kind.as_str().to_owned(),
        format!("rtp2rtc-{session_id}"),
    ));
    let sender = pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| BridgeError::Construction(format!("couldn't add {kind} track: {e}")))?;
    debug!("[{session_id}] Added {kind} track");
    Ok(MediaLink {
        kind,
        track,
        sender,
    })
}

fn install_handlers(pc: &RTCPeerConnection, id: &str, stop: &StopSignal, input: &InputSink) {
    pc.on_ice_candidate(Box::new(|cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => dump_candidate("LOCAL", &c),
            None => debug!("ICE candidate gathering completed (null candidate received)"),
        }
        Box::pin(async {})
    }));

    let gather_id = id.to_owned();
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("[{gather_id}] ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_id = id.to_owned();
    let state_stop = stop.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        match st {
            RTCPeerConnectionState::Connected => info!("[{state_id}] Peer connection connected"),
            RTCPeerConnectionState::Disconnected => {
                warn!("[{state_id}] Peer connection disconnected, waiting for ICE to recover")
            }
            RTCPeerConnectionState::Failed => {
                warn!("[{state_id}] Peer connection failed, stopping session");
                state_stop.trigger();
            }
            RTCPeerConnectionState::Closed => info!("[{state_id}] Peer connection closed"),
            other => debug!("[{state_id}] Peer connection state: {:?}", other),
        }
        Box::pin(async {})
    }));

    let dc_id = id.to_owned();
    let dc_input = input.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        attach_input_channel(&dc_id, &dc, dc_input.clone());
        Box::pin(async {})
    }));
}
