use std::fmt;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::{LOGGING_ENABLED, LOG_ENV};

static LOGGING: OnceCell<()> = OnceCell::new();

/// Local wall-clock timestamps with millisecond precision.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the fmt subscriber once per process. Hosts that already set a
/// global subscriber keep theirs.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let env_filter = std::env::var(LOG_ENV).ok();
        if !LOGGING_ENABLED && env_filter.is_none() {
            return;
        }

        let filter = env_filter
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .with_target(true)
            .try_init();
    });
}

/// Logs a local ICE candidate as soon as it is gathered.
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "{label} candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index
        );
    }
}

/// Snapshot of the nominated candidate pair.
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// Counts candidate types present in a finished SDP.
pub fn analyze_candidates(sdp: &str) -> CandidateMix {
    let mut mix = CandidateMix::default();
    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            mix.host += 1;
        } else if line.contains("typ srflx") {
            mix.srflx += 1;
        } else if line.contains("typ relay") {
            mix.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        mix.host, mix.srflx, mix.relay
    );
    if mix.total() == 0 {
        warn!("Answer carries no ICE candidates, the remote peer cannot reach us");
    }
    mix
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateMix {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

impl CandidateMix {
    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay
    }
}
