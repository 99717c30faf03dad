//! Device discovery control
//!
//! Drives scan start/stop against the adapter and folds discovery callbacks
//! into the peer directory.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::TransportAdapter;
use crate::error::Result;
use crate::event::{emit, LinkEvent, LinkEventSender};
use crate::peer::{PeerDirectory, PeerHandle};

/// Scan state for one session.
#[derive(Debug, Default)]
pub struct DiscoveryController {
    scanning: bool,
}

impl DiscoveryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Begin filtering for `service`. A repeated start while already scanning
    /// is a logged no-op.
    pub async fn start(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        service: Uuid,
        events: &LinkEventSender,
    ) -> Result<()> {
        if self.scanning {
            debug!("discovery already running; start ignored");
            return Ok(());
        }

        adapter.start_discovery(service).await?;
        self.scanning = true;
        info!(%service, "discovery started");
        emit(events, LinkEvent::DiscoveryStarted);
        Ok(())
    }

    /// Cancel scanning. Idempotent.
    pub async fn stop(&mut self, adapter: &Arc<dyn TransportAdapter>) -> Result<()> {
        if !self.scanning {
            return Ok(());
        }

        adapter.stop_discovery().await?;
        self.scanning = false;
        info!("discovery stopped");
        Ok(())
    }

    /// A peer was reported by the driver: upsert it (latest-wins) and tell
    /// the application.
    pub fn on_peer_discovered(
        &mut self,
        directory: &mut PeerDirectory,
        peer: PeerHandle,
        events: &LinkEventSender,
    ) {
        debug!(peer = %peer, "peer discovered");
        directory.upsert(peer.clone());
        emit(events, LinkEvent::PeerDiscovered { peer });
    }

    /// Scanning failed; the directory keeps whatever it already holds.
    pub fn on_discovery_failed(&mut self, code: i32, events: &LinkEventSender) {
        warn!(code, "discovery failed");
        self.scanning = false;
        emit(events, LinkEvent::DiscoveryFailed { code });
    }
}
