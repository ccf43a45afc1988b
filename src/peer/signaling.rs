//! Offer/answer handling.
//!
//! An offer goes through two stages. [`build_description`] turns the bytes
//! the host received from the remote peer into a validated
//! [`PendingDescription`], independent of any session. [`Session::signal`]
//! then consumes it: remote description, answer, local description, wait
//! for ICE gathering, and hand back the finished answer as JSON.

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, info, warn};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{BridgeError, Result};
use crate::logger::analyze_candidates;
use crate::peer::connection::Session;
use crate::peer::ice::wait_for_gathering;
use crate::peer::types::SignalingState;

/// A remote offer that parsed and validated. Immutable once built.
#[derive(Debug, Clone)]
pub struct PendingDescription {
    description: RTCSessionDescription,
}

impl PendingDescription {
    pub fn sdp_type(&self) -> RTCSdpType {
        self.description.sdp_type
    }

    pub fn sdp(&self) -> &str {
        &self.description.sdp
    }

    fn into_inner(self) -> RTCSessionDescription {
        self.description
    }
}

/// Parses a serialized offer: `{"type":"offer","sdp":"..."}`, either raw or
/// base64 encoded. Trailing NULs left over from C strings are ignored.
pub fn build_description(raw: &[u8]) -> Result<PendingDescription> {
    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|e| BridgeError::MalformedDescription(format!("not UTF-8: {e}")))?
        .trim();
    if text.is_empty() {
        return Err(BridgeError::MalformedDescription("empty description".into()));
    }

    let parsed: RTCSessionDescription = if text.starts_with('{') {
        serde_json::from_str(text)
            .map_err(|e| BridgeError::MalformedDescription(format!("bad JSON: {e}")))?
    } else {
        let decoded = general_purpose::STANDARD
            .decode(text)
            .map_err(|e| BridgeError::MalformedDescription(format!("neither JSON nor base64: {e}")))?;
        serde_json::from_slice(&decoded)
            .map_err(|e| BridgeError::MalformedDescription(format!("bad JSON: {e}")))?
    };

    if parsed.sdp_type != RTCSdpType::Offer {
        return Err(BridgeError::InvalidDescription(format!(
            "expected an offer, got {}",
            parsed.sdp_type
        )));
    }

    // re-parses the SDP body, catching JSON that is fine but carries garbage
    let description = RTCSessionDescription::offer(parsed.sdp)
        .map_err(|e| BridgeError::InvalidDescription(format!("bad SDP: {e}")))?;

    debug!("Built offer description, {} bytes of SDP", description.sdp.len());
    Ok(PendingDescription { description })
}

impl Session {
    /// Applies `offer` as the remote description and returns the finished
    /// local answer, candidates included, as JSON.
    ///
    /// Blocks on ICE gathering. No session-wide lock is held meanwhile, so
    /// registry lookups from other threads keep working.
    pub async fn signal(&self, offer: PendingDescription) -> Result<String> {
        {
            let mut state = self.signaling.lock();
            if *state != SignalingState::Created {
                return Err(BridgeError::Negotiation(format!(
                    "session already signaled (state {:?})",
                    *state
                )));
            }
            *state = SignalingState::RemoteApplied;
        }

        match self.negotiate(offer).await {
            Ok(answer) => {
                self.set_signaling_state(SignalingState::Complete);
                Ok(answer)
            }
            Err(e) => {
                warn!("[{}] Signaling failed: {e}", self.id);
                self.set_signaling_state(SignalingState::Failed);
                Err(e)
            }
        }
    }

    async fn negotiate(&self, offer: PendingDescription) -> Result<String> {
        // 1. remote offer
        self.pc
            .set_remote_description(offer.into_inner())
            .await
            .map_err(|e| BridgeError::Negotiation(e.to_string()))?;
        debug!("[{}] Remote description applied", self.id);

        // 2. our answer
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| BridgeError::AnswerGeneration(e.to_string()))?;

        // must subscribe before gathering can start
        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| BridgeError::LocalDescription(e.to_string()))?;
        self.set_signaling_state(SignalingState::AnswerSet);

        // 3. candidates go into the SDP, no trickle
        self.set_signaling_state(SignalingState::Gathering);
        wait_for_gathering(&mut gather_complete, self.config.gathering_timeout()).await?;

        let local = self.pc.local_description().await.ok_or_else(|| {
            BridgeError::LocalDescription("no local description after gathering".into())
        })?;
        analyze_candidates(&local.sdp);

        // 4. serialize for the host

        let answer = serde_json::to_string(&local)
            .map_err(|e| BridgeError::LocalDescription(format!("couldn't serialize answer: {e}")))?;
        info!("[{}] Answer ready, {} bytes", self.id, answer.len());
        Ok(answer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MINIMAL_SDP: &str =
        "v=0\r\no=- 4215775240449105457 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    fn offer_json(sdp: &str) -> String {
        serde_json::json!({ "type": "offer", "sdp": sdp }).to_string()
    }

    #[test]
    fn accepts_json_offer() {
        let desc = build_description(offer_json(MINIMAL_SDP).as_bytes()).unwrap();
        assert_eq!(desc.sdp_type(), RTCSdpType::Offer);
        assert_eq!(desc.sdp(), MINIMAL_SDP);
    }

    #[test]
    fn accepts_nul_terminated_input() {
        let mut raw = offer_json(MINIMAL_SDP).into_bytes();
        raw.push(0);
        assert!(build_description(&raw).is_ok());
    }

    #[test]
    fn accepts_base64_offer() {
        let encoded = general_purpose::STANDARD.encode(offer_json(MINIMAL_SDP));
        assert!(build_description(encoded.as_bytes()).is_ok());
    }

    #[test]
    fn rejects_garbage_as_malformed() {
        for raw in [&b""[..], b"\0\0", b"{not json", b"\xff\xfe", b"!!!"] {
            assert!(
                matches!(
                    build_description(raw),
                    Err(BridgeError::MalformedDescription(_))
                ),
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn rejects_bad_sdp_body_as_invalid() {
        let raw = offer_json("this is not sdp");
        assert!(matches!(
            build_description(raw.as_bytes()),
            Err(BridgeError::InvalidDescription(_))
        ));
    }

    #[test]
    fn rejects_answers() {
        let raw = serde_json::json!({ "type": "answer", "sdp": MINIMAL_SDP }).to_string();
        assert!(matches!(
            build_description(raw.as_bytes()),
            Err(BridgeError::InvalidDescription(_))
        ));
    }
}
