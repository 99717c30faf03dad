//! Client-role connection management
//!
//! Owns the single outbound link: connect, attribute discovery, notification
//! subscription, outbound writes, inbound reassembly, and teardown. All state
//! transitions are driven by adapter callbacks routed in from the session.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::{DiscoveredService, LinkHandle, TransportAdapter, WriteStatus};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::event::{emit, LinkEvent, LinkEventSender};
use crate::framing::{fragment, Reassembler};
use crate::peer::{LinkState, PeerDirectory, PeerHandle};
use crate::scheduler::WriteScheduler;

/// Control message a server may notify to make a client drop its link.
pub const DISCONNECT_CONTROL: &str = "DisconnectClient";

/// ATT header bytes unavailable for payload within a negotiated MTU.
const ATT_HEADER_LEN: usize = 3;

/// State for the single outbound client link.
#[derive(Debug)]
pub struct ClientLink {
    state: LinkState,
    link: Option<LinkHandle>,
    peer: Option<PeerHandle>,
    /// Set when the local side asked for the close, so the eventual
    /// Disconnected callback is reported as expected.
    local_close: bool,
    mtu: Option<usize>,
    assembly: Reassembler,
}

impl Default for ClientLink {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            link: None,
            peer: None,
            local_close: false,
            mtu: None,
            assembly: Reassembler::new(),
        }
    }
}

impl ClientLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn link(&self) -> Option<LinkHandle> {
        self.link
    }

    pub fn peer(&self) -> Option<&PeerHandle> {
        self.peer.as_ref()
    }

    /// Outbound fragment budget: the negotiated MTU minus the ATT header once
    /// known, the configured chunk size before that.
    pub fn chunk_size(&self, config: &LinkConfig) -> usize {
        match self.mtu {
            Some(mtu) => mtu.saturating_sub(ATT_HEADER_LEN).max(1),
            None => config.chunk_size,
        }
    }

    fn owns(&self, link: LinkHandle) -> bool {
        self.link == Some(link)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Open a link to a previously discovered peer.
    pub async fn connect(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        directory: &PeerDirectory,
        address: &str,
    ) -> Result<()> {
        let state = self.state();
        if !state.is_idle() {
            return Err(LinkError::LinkBusy { state });
        }

        let peer = directory
            .get(address)
            .cloned()
            .ok_or_else(|| LinkError::UnknownPeer {
                address: address.to_string(),
            })?;

        let link = adapter.connect(address).await?;
        info!(peer = %peer, link = link.0, "connecting");
        self.state = LinkState::Connecting;
        self.link = Some(link);
        self.peer = Some(peer);
        self.local_close = false;
        Ok(())
    }

    /// Request closure of the current link. Safe to call from any state;
    /// without a link it is a logged no-op.
    pub async fn disconnect(&mut self, adapter: &Arc<dyn TransportAdapter>) -> Result<()> {
        let Some(link) = self.link else {
            debug!("no client link to disconnect");
            return Ok(());
        };

        self.local_close = true;
        adapter.disconnect(link).await?;
        self.state = LinkState::Disconnecting;
        info!(link = link.0, "disconnecting");
        Ok(())
    }

    /// Fragment `text` and queue it for the server. Delivery past local
    /// queuing is fire-and-forget.
    pub async fn send(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
        config: &LinkConfig,
        text: &str,
    ) -> Result<()> {
        if !self.state().is_connected() {
            return Err(LinkError::NotConnected);
        }
        let link = self.link.ok_or(LinkError::NotConnected)?;

        let fragments = fragment(text, self.chunk_size(config))?;
        scheduler.enqueue(link, fragments);
        self.drain(adapter, scheduler).await;
        Ok(())
    }

    /// Retry a previously rejected submission, if any.
    pub async fn flush(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
    ) {
        if self.link.is_some() {
            self.drain(adapter, scheduler).await;
        }
    }

    // ------------------------------------------------------------------
    // Adapter callbacks
    // ------------------------------------------------------------------

    pub async fn on_link_state(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
        events: &LinkEventSender,
        link: LinkHandle,
        state: LinkState,
    ) {
        if !self.owns(link) {
            return;
        }

        match state {
            LinkState::Connected => {
                self.state = LinkState::Connected;
                // The link is only usable once the configured service and
                // characteristic are located and subscribed; `PeerConnected`
                // waits until then.
                if let Err(e) = adapter.discover_attributes(link).await {
                    warn!(link = link.0, error = %e, "attribute discovery submission failed");
                    self.teardown(adapter, events, TeardownReason::ServiceNotFound)
                        .await;
                }
            }
            LinkState::Disconnected => {
                self.cleanup(scheduler, events, link);
            }
            LinkState::Connecting | LinkState::Disconnecting => {
                self.state = state;
            }
        }
    }

    pub async fn on_attributes_discovered(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        events: &LinkEventSender,
        config: &LinkConfig,
        link: LinkHandle,
        services: &[DiscoveredService],
    ) {
        if !self.owns(link) {
            return;
        }

        let descriptor = config.descriptor;
        let characteristic_present = services.iter().any(|s| {
            s.service == descriptor.service && s.characteristics.contains(&descriptor.characteristic)
        });
        if !characteristic_present {
            info!(link = link.0, "configured service not present on peer");
            self.teardown(adapter, events, TeardownReason::ServiceNotFound)
                .await;
            return;
        }

        if let Err(e) = adapter.subscribe(link, descriptor.characteristic).await {
            warn!(link = link.0, error = %e, "subscription failed");
            self.teardown(adapter, events, TeardownReason::SubscriptionFailed)
                .await;
            return;
        }
        debug!(link = link.0, "subscribed to notifications");

        // The link is now fully usable.
        if let Some(peer) = self.peer.clone() {
            emit(events, LinkEvent::PeerConnected { peer });
        }
    }

    pub async fn on_notification(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        events: &LinkEventSender,
        link: LinkHandle,
        value: &[u8],
    ) {
        if !self.owns(link) {
            return;
        }

        for text in self.assembly.feed(link, value) {
            if text == DISCONNECT_CONTROL {
                info!(link = link.0, "server requested disconnect");
                if let Err(e) = self.disconnect(adapter).await {
                    warn!(link = link.0, error = %e, "disconnect request failed");
                }
            } else {
                emit(events, LinkEvent::MessageFromServer { text });
            }
        }
    }

    pub async fn on_write_complete(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
        link: LinkHandle,
        status: WriteStatus,
    ) {
        if !self.owns(link) {
            return;
        }

        if let WriteStatus::Failure(code) = status {
            warn!(link = link.0, code, "write completed with failure status");
        }
        scheduler.complete(link);
        self.drain(adapter, scheduler).await;
    }

    pub fn on_mtu_changed(&mut self, link: LinkHandle, mtu: usize) {
        if self.owns(link) {
            debug!(link = link.0, mtu, "client link MTU updated");
            self.mtu = Some(mtu);
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Submit the next queued fragment if the link is idle. A synchronous
    /// rejection leaves the fragment at the head for the next drain
    /// opportunity (next enqueue, flush, or completion on this link).
    async fn drain(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
    ) {
        let Some(link) = self.link else { return };
        if let Some(fragment) = scheduler.begin(link) {
            match adapter.write_characteristic(link, &fragment).await {
                Ok(()) => scheduler.mark_submitted(link),
                Err(e) => {
                    warn!(link = link.0, error = %e, "write submission rejected; will retry");
                }
            }
        }
    }

    /// Tear down a link that came up but cannot be used.
    async fn teardown(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        events: &LinkEventSender,
        reason: TeardownReason,
    ) {
        if let Some(peer) = self.peer.clone() {
            let event = match reason {
                TeardownReason::ServiceNotFound => LinkEvent::ServiceNotFound { peer },
                TeardownReason::SubscriptionFailed => LinkEvent::SubscriptionFailed { peer },
            };
            emit(events, event);
        }
        if let Err(e) = self.disconnect(adapter).await {
            warn!(error = %e, "teardown disconnect failed");
        }
    }

    /// The link is gone: discard queued fragments and any partial inbound
    /// message, report the closure, and return to idle.
    fn cleanup(&mut self, scheduler: &mut WriteScheduler, events: &LinkEventSender, link: LinkHandle) {
        scheduler.drop_link(link);
        self.assembly.clear(link);

        let peer = self.peer.take();
        let local_close = std::mem::take(&mut self.local_close);
        self.state = LinkState::Disconnected;
        self.link = None;
        self.mtu = None;

        if let Some(peer) = peer {
            info!(peer = %peer, local_close, "client link closed");
            let event = if local_close {
                LinkEvent::PeerDisconnected { peer }
            } else {
                LinkEvent::PeerDisconnectedUnexpectedly { peer }
            };
            emit(events, event);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TeardownReason {
    ServiceNotFound,
    SubscriptionFailed,
}
