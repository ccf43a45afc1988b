use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Waits until the gathering-complete promise fires. With no limit this
/// blocks for as long as ICE takes.
pub async fn wait_for_gathering(
    gather_complete: &mut Receiver<()>,
    limit: Option<Duration>,
) -> Result<()> {
    match limit {
        None => {
            let _ = gather_complete.recv().await;
        }
        Some(limit) => {
            if timeout(limit, gather_complete.recv()).await.is_err() {
                warn!(
                    "ICE gathering still running after {} ms, giving up",
                    limit.as_millis()
                );
                return Err(BridgeError::GatheringTimeout(limit.as_millis() as u64));
            }
        }
    }
    debug!("ICE gathering complete");
    Ok(())
}
