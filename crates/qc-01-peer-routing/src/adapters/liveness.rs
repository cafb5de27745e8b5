use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::domain::PeerId;
use crate::ports::{ConnectionManager, DialTarget, LivenessChecker};

/// Treats a peer as alive if a connection to it can be opened in time.
///
/// An existing connection counts, so an active peer costs no new dial.
pub struct ConnectionLivenessChecker {
    connections: Arc<dyn ConnectionManager>,
    timeout: Duration,
}

impl ConnectionLivenessChecker {
    pub fn new(connections: Arc<dyn ConnectionManager>, timeout: Duration) -> Self {
        Self {
            connections,
            timeout,
        }
    }
}

#[async_trait]
impl LivenessChecker for ConnectionLivenessChecker {
    async fn is_alive(&self, peer: &PeerId) -> bool {
        let dial = self.connections.open_connection(DialTarget::Peer(*peer));
        match tokio::time::timeout(self.timeout, dial).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!(peer = %peer, error = %e, "[qc-01] Liveness dial failed");
                false
            }
            Err(_) => {
                trace!(peer = %peer, "[qc-01] Liveness dial timed out");
                false
            }
        }
    }
}
