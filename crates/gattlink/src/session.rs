//! Link session
//!
//! [`LinkSession`] is the explicit session object the embedding application
//! constructs once: it owns the peer directory, both role managers, and the
//! write scheduler, and is the single entry point for operations and adapter
//! callbacks. One mutex over the mutable state serializes callback handling,
//! so no two events for the same link can reorder state transitions.

use std::sync::Arc;

use smallvec::SmallVec;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::adapter::{AdapterEvent, AdapterEventReceiver, TransportAdapter};
use crate::client::ClientLink;
use crate::config::LinkConfig;
use crate::discovery::DiscoveryController;
use crate::error::Result;
use crate::event::{emit, LinkEvent, LinkEventReceiver, LinkEventSender};
use crate::peer::{LinkState, PeerDirectory, PeerHandle};
use crate::scheduler::WriteScheduler;
use crate::server::ServerEndpoint;

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Mutable session state behind the session lock.
#[derive(Debug, Default)]
struct SessionState {
    directory: PeerDirectory,
    discovery: DiscoveryController,
    client: ClientLink,
    server: ServerEndpoint,
    scheduler: WriteScheduler,
}

/// One messaging session over a transport adapter, holding the client and
/// server roles concurrently.
pub struct LinkSession {
    config: LinkConfig,
    adapter: Arc<dyn TransportAdapter>,
    state: Mutex<SessionState>,
    events: LinkEventSender,
}

impl LinkSession {
    /// Create a session over `adapter`. The returned receiver carries every
    /// [`LinkEvent`] the session emits.
    pub fn new(
        config: LinkConfig,
        adapter: Arc<dyn TransportAdapter>,
    ) -> (Self, LinkEventReceiver) {
        let (events, receiver) = tokio::sync::mpsc::unbounded_channel();
        let session = Self {
            config,
            adapter,
            state: Mutex::new(SessionState::default()),
            events,
        };
        (session, receiver)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Begin scanning for peers advertising the configured service.
    pub async fn start_discovery(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .discovery
            .start(&self.adapter, self.config.descriptor.service, &self.events)
            .await
    }

    /// Stop scanning. Idempotent.
    pub async fn stop_discovery(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.discovery.stop(&self.adapter).await
    }

    /// Forget every discovered peer.
    pub async fn clear_discovered_peers(&self) {
        self.state.lock().await.directory.clear();
    }

    // ------------------------------------------------------------------
    // Client role
    // ------------------------------------------------------------------

    /// Open the outbound link to a discovered peer.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let SessionState {
            directory, client, ..
        } = &mut *state;
        client.connect(&self.adapter, directory, address).await
    }

    /// Close the outbound link. Safe from any state.
    pub async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.client.disconnect(&self.adapter).await
    }

    /// Send a message over the outbound link.
    pub async fn send_to_server(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let SessionState {
            client, scheduler, ..
        } = &mut *state;
        client
            .send(&self.adapter, scheduler, &self.config, text)
            .await
    }

    /// Retry any outbound fragment whose submission was rejected, on the
    /// client link and on every attached server link.
    pub async fn flush_writes(&self) {
        let mut state = self.state.lock().await;
        let SessionState {
            client,
            server,
            scheduler,
            ..
        } = &mut *state;
        client.flush(&self.adapter, scheduler).await;
        server.flush(&self.adapter, scheduler).await;
    }

    // ------------------------------------------------------------------
    // Server role
    // ------------------------------------------------------------------

    /// Host the configured service and begin advertising it.
    pub async fn start_serving(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.server.start(&self.adapter, &self.config).await
    }

    /// Stop hosting. Attached peers are not forcibly disconnected; their
    /// state is cleared locally and further I/O to them is rejected.
    pub async fn stop_serving(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let SessionState {
            server, scheduler, ..
        } = &mut *state;
        server.stop(&self.adapter, scheduler).await
    }

    /// Send a message to every attached peer.
    pub async fn send_to_clients(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let SessionState {
            server, scheduler, ..
        } = &mut *state;
        server
            .send_to_all(&self.adapter, scheduler, &self.config, text)
            .await
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn discovered_peers(&self) -> SmallVec<[PeerHandle; 8]> {
        let state = self.state.lock().await;
        state.directory.iter().cloned().collect()
    }

    pub async fn connected_peers(&self) -> SmallVec<[PeerHandle; 8]> {
        let state = self.state.lock().await;
        state.server.connected_peers().cloned().collect()
    }

    pub async fn client_state(&self) -> LinkState {
        self.state.lock().await.client.state()
    }

    pub async fn is_serving(&self) -> bool {
        self.state.lock().await.server.is_serving()
    }

    pub async fn is_discovering(&self) -> bool {
        self.state.lock().await.discovery.is_scanning()
    }

    // ------------------------------------------------------------------
    // Adapter callback dispatch
    // ------------------------------------------------------------------

    /// Process one adapter callback. All state mutation funnels through
    /// here (and the operations above) under the session lock.
    pub async fn handle_adapter_event(&self, event: AdapterEvent) {
        let mut state = self.state.lock().await;
        let SessionState {
            directory,
            discovery,
            client,
            server,
            scheduler,
        } = &mut *state;

        match event {
            AdapterEvent::PeerDiscovered { peer } => {
                discovery.on_peer_discovered(directory, peer, &self.events);
            }
            AdapterEvent::DiscoveryFailed { code } => {
                discovery.on_discovery_failed(code, &self.events);
            }
            AdapterEvent::AdvertiseStarted => {
                emit(&self.events, LinkEvent::AdvertiseStarted);
            }
            AdapterEvent::AdvertiseFailed { code } => {
                server
                    .on_advertise_failed(&self.adapter, scheduler, &self.events, code)
                    .await;
            }
            AdapterEvent::LinkStateChanged { link, state, peer } => {
                if client.link() == Some(link) {
                    client
                        .on_link_state(&self.adapter, scheduler, &self.events, link, state)
                        .await;
                } else if server.is_serving() {
                    server.on_link_state(scheduler, &self.events, link, state, peer);
                } else {
                    debug!(link = link.0, %state, "link event for inactive role ignored");
                }
            }
            AdapterEvent::AttributesDiscovered { link, services } => {
                client
                    .on_attributes_discovered(
                        &self.adapter,
                        &self.events,
                        &self.config,
                        link,
                        &services,
                    )
                    .await;
            }
            AdapterEvent::ReadRequest {
                link,
                request,
                characteristic,
                offset,
            } => {
                if server.is_serving() {
                    server
                        .on_read_request(
                            &self.adapter,
                            &self.config,
                            link,
                            request,
                            characteristic,
                            offset,
                        )
                        .await;
                }
            }
            AdapterEvent::WriteRequest {
                link,
                request,
                characteristic,
                value,
                response_needed,
            } => {
                if server.is_serving() {
                    server
                        .on_write_request(
                            &self.adapter,
                            &self.config,
                            &self.events,
                            link,
                            request,
                            characteristic,
                            &value,
                            response_needed,
                        )
                        .await;
                }
            }
            AdapterEvent::NotificationReceived { link, value } => {
                client
                    .on_notification(&self.adapter, &self.events, link, &value)
                    .await;
            }
            AdapterEvent::WriteComplete { link, status } => {
                if client.link() == Some(link) {
                    client
                        .on_write_complete(&self.adapter, scheduler, link, status)
                        .await;
                } else if server.is_serving() {
                    server
                        .on_write_complete(&self.adapter, scheduler, link, status)
                        .await;
                }
            }
            AdapterEvent::MtuChanged { link, mtu } => {
                client.on_mtu_changed(link, mtu);
            }
        }
    }

    /// Drain adapter callbacks until the driver closes its channel.
    pub async fn run(&self, mut events: AdapterEventReceiver) {
        info!("link session event loop started");
        while let Some(event) = events.recv().await {
            self.handle_adapter_event(event).await;
        }
        info!("adapter event channel closed; link session event loop stopped");
    }
}
