//! Server-role connection management
//!
//! Hosts the advertised endpoint: tracks attached peers, answers attribute
//! read/write requests on the configured characteristic, reassembles inbound
//! client messages per peer, and fans outbound messages out to every attached
//! peer as notifications.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{EndpointHandle, LinkHandle, RequestId, TransportAdapter, WriteStatus};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::event::{emit, LinkEvent, LinkEventSender};
use crate::framing::{fragment, Reassembler};
use crate::peer::{LinkState, PeerHandle};
use crate::scheduler::WriteScheduler;

/// State for the hosted server endpoint and its attached peers.
#[derive(Debug, Default)]
pub struct ServerEndpoint {
    endpoint: Option<EndpointHandle>,
    /// Peers currently attached; no entry survives a Disconnected callback.
    connected: HashMap<LinkHandle, PeerHandle>,
    assembly: Reassembler,
    /// Current stored value of the hosted characteristic, served to reads.
    value: Vec<u8>,
}

impl ServerEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_serving(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn owns(&self, link: LinkHandle) -> bool {
        self.connected.contains_key(&link)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = &PeerHandle> {
        self.connected.values()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Register the configured service/characteristic and begin advertising.
    pub async fn start(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        config: &LinkConfig,
    ) -> Result<()> {
        if self.is_serving() {
            return Err(LinkError::AlreadyServing);
        }

        let descriptor = config.descriptor;
        let endpoint = adapter
            .open_server_endpoint(descriptor.service, descriptor.characteristic)
            .await?;

        if let Err(e) = adapter
            .start_advertising(descriptor.service, &config.device_name)
            .await
        {
            // Never leave a half-initialized endpoint behind.
            if let Err(close_err) = adapter.close_server_endpoint(endpoint).await {
                warn!(error = %close_err, "endpoint close after advertise failure also failed");
            }
            return Err(e.into());
        }

        self.endpoint = Some(endpoint);
        info!(service = %descriptor.service, "serving started");
        Ok(())
    }

    /// Stop advertising and close the endpoint, clearing all per-peer state.
    /// Attached peers are not forcibly disconnected; subsequent I/O to them
    /// is rejected. Idempotent.
    pub async fn stop(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
    ) -> Result<()> {
        let Some(endpoint) = self.endpoint.take() else {
            debug!("no server endpoint to stop");
            return Ok(());
        };

        if let Err(e) = adapter.stop_advertising().await {
            warn!(error = %e, "stop advertising failed");
        }
        if let Err(e) = adapter.close_server_endpoint(endpoint).await {
            warn!(error = %e, "endpoint close failed");
        }

        for link in self.connected.keys().copied().collect::<Vec<_>>() {
            scheduler.drop_link(link);
        }
        self.connected.clear();
        self.assembly.clear_all();
        self.value.clear();
        info!("serving stopped");
        Ok(())
    }

    /// Fragment `text` and queue it for every attached peer. With no peers
    /// attached the fan-out loop simply runs zero times.
    pub async fn send_to_all(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
        config: &LinkConfig,
        text: &str,
    ) -> Result<()> {
        if !self.is_serving() {
            return Err(LinkError::NotServing);
        }

        // Peers may each have negotiated a different MTU, so fan-out sticks
        // to the configured chunk size.
        let fragments = fragment(text, config.chunk_size)?;
        debug!(
            peers = self.connected.len(),
            fragments = fragments.len(),
            "fanning out message"
        );

        for link in self.connected.keys().copied().collect::<Vec<_>>() {
            scheduler.enqueue(link, fragments.iter().cloned());
            self.drain(adapter, scheduler, link).await;
        }
        Ok(())
    }

    /// Retry any previously rejected notification submissions.
    pub async fn flush(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
    ) {
        if !self.is_serving() {
            return;
        }
        for link in self.connected.keys().copied().collect::<Vec<_>>() {
            self.drain(adapter, scheduler, link).await;
        }
    }

    // ------------------------------------------------------------------
    // Adapter callbacks
    // ------------------------------------------------------------------

    pub fn on_link_state(
        &mut self,
        scheduler: &mut WriteScheduler,
        events: &LinkEventSender,
        link: LinkHandle,
        state: LinkState,
        peer: Option<PeerHandle>,
    ) {
        match state {
            LinkState::Connected => {
                let Some(peer) = peer else {
                    warn!(link = link.0, "peer attached without identity; ignored");
                    return;
                };
                info!(peer = %peer, link = link.0, "peer attached");
                self.connected.insert(link, peer.clone());
                emit(events, LinkEvent::PeerConnected { peer });
            }
            LinkState::Disconnected => {
                if let Some(peer) = self.connected.remove(&link) {
                    // Discard any partial message and queued fragments; the
                    // application never sees a partial delivery.
                    self.assembly.clear(link);
                    scheduler.drop_link(link);
                    info!(peer = %peer, link = link.0, "peer detached");
                    emit(events, LinkEvent::PeerDisconnected { peer });
                }
            }
            LinkState::Connecting | LinkState::Disconnecting => {}
        }
    }

    /// Serve the stored characteristic value at the requested offset.
    /// Requests for unknown characteristics are ignored, mirroring the
    /// transport's unhandled-request semantics.
    pub async fn on_read_request(
        &self,
        adapter: &Arc<dyn TransportAdapter>,
        config: &LinkConfig,
        link: LinkHandle,
        request: RequestId,
        characteristic: Uuid,
        offset: usize,
    ) {
        if characteristic != config.descriptor.characteristic {
            debug!(link = link.0, %characteristic, "read for unknown characteristic ignored");
            return;
        }

        let from = offset.min(self.value.len());
        if let Err(e) = adapter.respond_to_read(request, &self.value[from..]).await {
            warn!(link = link.0, error = %e, "read response failed");
        }
    }

    /// Feed an inbound fragment into the peer's assembly and acknowledge the
    /// write when asked to.
    pub async fn on_write_request(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        config: &LinkConfig,
        events: &LinkEventSender,
        link: LinkHandle,
        request: RequestId,
        characteristic: Uuid,
        value: &[u8],
        response_needed: bool,
    ) {
        if characteristic != config.descriptor.characteristic {
            debug!(link = link.0, %characteristic, "write for unknown characteristic ignored");
            return;
        }

        let peer = match self.connected.get(&link) {
            Some(peer) => peer.clone(),
            None => {
                // Fragment from a link we no longer track; nothing to
                // attribute it to, and the stored value must not change.
                debug!(link = link.0, "write from unknown link ignored");
                return;
            }
        };

        self.value = value.to_vec();

        for text in self.assembly.feed(link, value) {
            emit(
                events,
                LinkEvent::MessageFromClient {
                    peer: peer.clone(),
                    text,
                },
            );
        }

        if response_needed {
            if let Err(e) = adapter.respond_to_write(request, value).await {
                warn!(link = link.0, error = %e, "write response failed");
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
        if let WriteStatus::Failure(code) = status {
            warn!(link = link.0, code, "notification completed with failure status");
        }
        scheduler.complete(link);
        self.drain(adapter, scheduler, link).await;
    }

    /// Advertising failed to start: roll the endpoint back so the session is
    /// rejoinable by a fresh `start_serving`.
    pub async fn on_advertise_failed(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
        events: &LinkEventSender,
        code: i32,
    ) {
        warn!(code, "advertising failed");
        if self.is_serving() {
            if let Err(e) = self.stop(adapter, scheduler).await {
                warn!(error = %e, "rollback after advertise failure failed");
            }
        }
        emit(events, LinkEvent::AdvertiseFailed { code });
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Submit the next queued notification for `link` if it is idle. The
    /// stored characteristic value tracks the last fragment handed to the
    /// driver, matching what a read request would observe.
    async fn drain(
        &mut self,
        adapter: &Arc<dyn TransportAdapter>,
        scheduler: &mut WriteScheduler,
        link: LinkHandle,
    ) {
        if !self.owns(link) {
            scheduler.drop_link(link);
            return;
        }
        if let Some(fragment) = scheduler.begin(link) {
            match adapter.notify(link, &fragment).await {
                Ok(()) => {
                    self.value = fragment;
                    scheduler.mark_submitted(link);
                }
                Err(e) => {
                    warn!(link = link.0, error = %e, "notify submission rejected; will retry");
                }
            }
        }
    }
}
