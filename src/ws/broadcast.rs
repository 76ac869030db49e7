use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::api::fanout::FanoutStats;
use crate::state::ClientRegistry;
use crate::types::Stats;

/// Pushes each committed record to every live viewer.
///
/// Delivery is a non-blocking hand-off into each viewer's bounded queue; the
/// viewer's own session task does the socket write. A viewer whose queue is
/// full or closed is dropped from the registry on the spot.
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    fanout: Arc<FanoutStats>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>, fanout: Arc<FanoutStats>) -> Self {
        Self { registry, fanout }
    }

    /// Returns the number of viewers the record was queued for.
    pub fn publish(&self, stats: &Stats) -> usize {
        let started = Instant::now();
        let mut delivered = 0usize;

        let dropped = self.registry.retain(|id, viewer| match viewer.try_deliver(*stats) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    viewer = id,
                    connected_secs = viewer.age().as_secs(),
                    "Viewer is not keeping up, dropping it"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                info!(viewer = id, "Viewer session gone, unregistering");
                false
            }
        });

        self.fanout.record_publish(started.elapsed(), delivered, dropped);
        debug!(timestamp = stats.timestamp, delivered, dropped, "Published window");
        delivered
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }
}
