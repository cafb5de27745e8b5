//! Verifier lifecycle and round scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::{NetworkError, OverlayConfig, PeerId, ReachabilityConfig};
use crate::ports::{
    AddressClassifier, AddressManager, ConnectionManager, RandomWalk, ReachabilityApi, Registrar,
    StreamLimits,
};

use super::inbound::DialBackHandler;
use super::outbound::Round;
use super::{ReachabilityEvent, RoundOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Collaborators the verifier needs from the host node.
#[derive(Clone)]
pub struct VerifierComponents {
    pub local_peer: PeerId,
    pub connections: Arc<dyn ConnectionManager>,
    pub registrar: Arc<dyn Registrar>,
    pub address_manager: Arc<dyn AddressManager>,
    pub classifier: Arc<dyn AddressClassifier>,
    pub random_walk: Arc<dyn RandomWalk>,
}

/// Checks whether our observed addresses are dialable from outside, and
/// performs the same check for other peers.
///
/// After [`start`](Self::start) the verifier serves the reachability
/// protocol and runs an outbound round after `startup_delay`, then every
/// `refresh_interval`, or sooner when triggered.
pub struct ReachabilityVerifier {
    components: VerifierComponents,
    config: ReachabilityConfig,
    protocol: String,
    max_frame_size: usize,
    events: broadcast::Sender<ReachabilityEvent>,
    round_lock: tokio::sync::Mutex<()>,
    trigger: Notify,
    running: AtomicBool,
    scheduler: Mutex<Option<CancellationToken>>,
}

impl ReachabilityVerifier {
    pub fn new(components: VerifierComponents, config: &OverlayConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            components,
            config: config.reachability.clone(),
            protocol: config.reachability_protocol(),
            max_frame_size: config.max_frame_size,
            events,
            round_lock: tokio::sync::Mutex::new(()),
            trigger: Notify::new(),
            running: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn is_started(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register the inbound handler and schedule the first round.
    pub fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handler = DialBackHandler {
            connections: Arc::clone(&self.components.connections),
            address_manager: Arc::clone(&self.components.address_manager),
            classifier: Arc::clone(&self.components.classifier),
            max_frame_size: self.max_frame_size,
            timeout: self.config.timeout(),
        };
        let limits = StreamLimits {
            max_inbound_streams: self.config.max_inbound_streams,
            max_outbound_streams: self.config.max_outbound_streams,
        };
        if let Err(e) = self
            .components
            .registrar
            .handle(&self.protocol, Arc::new(handler), limits)
        {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(self).schedule(cancel.clone()));
        *self.scheduler.lock() = Some(cancel);

        info!(protocol = %self.protocol, "[qc-01] Reachability verifier started");
        Ok(())
    }

    /// Unregister the inbound handler and cancel the scheduler.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.components.registrar.unhandle(&self.protocol);
        if let Some(cancel) = self.scheduler.lock().take() {
            cancel.cancel();
        }
        info!("[qc-01] Reachability verifier stopped");
    }

    async fn schedule(self: Arc<Self>, cancel: CancellationToken) {
        let mut delay = self.config.startup_delay();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.trigger.notified() => {}
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.verify_external_addresses() => outcome,
            };
            debug!(
                outcome = ?outcome,
                next_in_secs = self.config.refresh_interval_secs,
                "[qc-01] Verification round finished"
            );
            delay = self.config.refresh_interval();
        }
        debug!("[qc-01] Verification scheduler stopped");
    }
}

#[async_trait]
impl ReachabilityApi for ReachabilityVerifier {
    async fn verify_external_addresses(&self) -> RoundOutcome {
        if !self.is_started() {
            return RoundOutcome::Skipped;
        }
        let Ok(_round) = self.round_lock.try_lock() else {
            debug!("[qc-01] Verification round already running");
            return RoundOutcome::Skipped;
        };

        Round {
            components: &self.components,
            config: &self.config,
            protocol: &self.protocol,
            max_frame_size: self.max_frame_size,
            events: &self.events,
        }
        .run()
        .await
    }

    fn trigger_verification(&self) {
        self.trigger.notify_one();
    }

    fn subscribe(&self) -> broadcast::Receiver<ReachabilityEvent> {
        self.events.subscribe()
    }
}
