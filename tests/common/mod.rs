#![allow(dead_code)]

use std::sync::Arc;

use rtp2rtc::BridgeConfig;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

/// Config for tests: no STUN, loopback candidates, bounded waits.
pub fn loopback_config() -> BridgeConfig {
    BridgeConfig {
        ice_servers: vec![],
        include_loopback_candidates: true,
        gathering_timeout_ms: Some(10_000),
        teardown_grace_ms: 300,
    }
}

pub const LOOPBACK_CONFIG_JSON: &str = r#"{
    "ice_servers": [],
    "include_loopback_candidates": true,
    "gathering_timeout_ms": 10000,
    "teardown_grace_ms": 300
}"#;

/// A browser-like remote peer: receives audio and video, opens an input
/// data channel.
pub struct RemotePeer {
    pub pc: Arc<RTCPeerConnection>,
}

impl RemotePeer {
    pub async fn new() -> RemotePeer {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(true);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .unwrap();
        }
        pc.create_data_channel("input", None).await.unwrap();

        RemotePeer { pc }
    }

    /// Full offer, candidates included, as the JSON a browser would send.
    pub async fn offer_json(&self) -> String {
        let offer = self.pc.create_offer(None).await.unwrap();
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await.unwrap();
        let _ = gather_complete.recv().await;
        let local = self.pc.local_description().await.unwrap();
        serde_json::to_string(&local).unwrap()
    }

    pub async fn accept_answer(&self, answer_json: &str) {
        let answer: RTCSessionDescription = serde_json::from_str(answer_json).unwrap();
        self.pc.set_remote_description(answer).await.unwrap();
    }

    /// Every RTP packet arriving on any remote track, as (kind, payload).
    /// Install before the answer is applied.
    pub fn collect_media(&self) -> mpsc::UnboundedReceiver<(String, Vec<u8>)> {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let media_tx = media_tx.clone();
                tokio::spawn(async move {
                    let kind = track.kind().to_string();
                    while let Ok((packet, _)) = track.read_rtp().await {
                        let _ = media_tx.send((kind.clone(), packet.payload.to_vec()));
                    }
                });
                Box::pin(async {})
            },
        ));
        media_rx
    }

    pub async fn close(&self) {
        let _ = self.pc.close().await;
    }
}
