//! In-process loopback transport
//!
//! [`LoopbackNetwork`] wires any number of [`LoopbackAdapter`]s together in
//! memory: advertising endpoints become discoverable to scanners, connects
//! mint shared link handles, and writes/notifications are delivered as
//! adapter events on the remote side's channel. Deterministic and ordered,
//! it backs the integration tests and the demo binary without any radio.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::adapter::{
    AdapterEvent, AdapterEventReceiver, AdapterEventSender, AdapterResult, DiscoveredService,
    EndpointHandle, LinkHandle, RequestId, TransportAdapter, WriteStatus,
};
use crate::error::AdapterError;
use crate::peer::{LinkState, PeerHandle};

// ----------------------------------------------------------------------------
// Network
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct EndpointEntry {
    name: String,
    events: AdapterEventSender,
    /// Service currently being advertised, if any.
    advertising: Option<Uuid>,
    /// Hosted attribute table: endpoint handle, service, characteristic.
    hosted: Option<(EndpointHandle, Uuid, Uuid)>,
    /// Service this endpoint is scanning for, if any.
    scanning: Option<Uuid>,
}

#[derive(Debug)]
struct LinkEntry {
    client: String,
    server: String,
    subscribed: bool,
}

#[derive(Debug, Default)]
struct NetInner {
    next_link: u64,
    next_endpoint: u64,
    next_request: u64,
    endpoints: HashMap<String, EndpointEntry>,
    links: HashMap<LinkHandle, LinkEntry>,
}

impl NetInner {
    fn deliver(&self, address: &str, event: AdapterEvent) {
        if let Some(entry) = self.endpoints.get(address) {
            if entry.events.send(event).is_err() {
                trace!(address, "loopback event dropped; receiver gone");
            }
        }
    }

    fn peer_handle(&self, address: &str) -> PeerHandle {
        let name = self.endpoints.get(address).map(|e| e.name.clone());
        PeerHandle::new(address, name)
    }

    fn link(&self, link: LinkHandle) -> AdapterResult<&LinkEntry> {
        self.links
            .get(&link)
            .ok_or_else(|| AdapterError::new(format!("unknown link {}", link.0)))
    }
}

/// A virtual airspace shared by a set of loopback adapters.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Mutex<NetInner>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network under `address`, returning the adapter and the
    /// channel its driver events arrive on.
    pub fn endpoint(
        &self,
        address: impl Into<String>,
        name: impl Into<String>,
    ) -> (LoopbackAdapter, AdapterEventReceiver) {
        let address = address.into();
        let (events, receiver) = tokio::sync::mpsc::unbounded_channel();
        let entry = EndpointEntry {
            name: name.into(),
            events,
            advertising: None,
            hosted: None,
            scanning: None,
        };
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .endpoints
            .insert(address.clone(), entry);
        let adapter = LoopbackAdapter {
            address,
            inner: Arc::clone(&self.inner),
        };
        (adapter, receiver)
    }
}

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// One endpoint's view of a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackAdapter {
    address: String,
    inner: Arc<Mutex<NetInner>>,
}

impl LoopbackAdapter {
    pub fn address(&self) -> &str {
        &self.address
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TransportAdapter for LoopbackAdapter {
    async fn start_discovery(&self, service: Uuid) -> AdapterResult<()> {
        let mut net = self.lock();
        if let Some(entry) = net.endpoints.get_mut(&self.address) {
            entry.scanning = Some(service);
        }
        // Endpoints already on the air show up immediately.
        let seen: Vec<PeerHandle> = net
            .endpoints
            .iter()
            .filter(|(addr, e)| **addr != self.address && e.advertising == Some(service))
            .map(|(addr, _)| net.peer_handle(addr))
            .collect();
        for peer in seen {
            net.deliver(&self.address, AdapterEvent::PeerDiscovered { peer });
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> AdapterResult<()> {
        let mut net = self.lock();
        if let Some(entry) = net.endpoints.get_mut(&self.address) {
            entry.scanning = None;
        }
        Ok(())
    }

    async fn start_advertising(&self, service: Uuid, device_name: &str) -> AdapterResult<()> {
        let mut net = self.lock();
        if let Some(entry) = net.endpoints.get_mut(&self.address) {
            entry.advertising = Some(service);
            entry.name = device_name.to_string();
        }
        net.deliver(&self.address, AdapterEvent::AdvertiseStarted);

        // Surface ourselves to anyone already scanning for this service.
        let peer = net.peer_handle(&self.address);
        let scanners: Vec<String> = net
            .endpoints
            .iter()
            .filter(|(addr, e)| **addr != self.address && e.scanning == Some(service))
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in scanners {
            net.deliver(&addr, AdapterEvent::PeerDiscovered { peer: peer.clone() });
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> AdapterResult<()> {
        let mut net = self.lock();
        if let Some(entry) = net.endpoints.get_mut(&self.address) {
            entry.advertising = None;
        }
        Ok(())
    }

    async fn open_server_endpoint(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> AdapterResult<EndpointHandle> {
        let mut net = self.lock();
        net.next_endpoint += 1;
        let handle = EndpointHandle(net.next_endpoint);
        let entry = net
            .endpoints
            .get_mut(&self.address)
            .ok_or_else(|| AdapterError::new("endpoint left the network"))?;
        entry.hosted = Some((handle, service, characteristic));
        debug!(address = %self.address, %service, "loopback endpoint hosting");
        Ok(handle)
    }

    async fn close_server_endpoint(&self, endpoint: EndpointHandle) -> AdapterResult<()> {
        let mut net = self.lock();
        if let Some(entry) = net.endpoints.get_mut(&self.address) {
            if entry.hosted.map(|(h, _, _)| h) == Some(endpoint) {
                entry.hosted = None;
            }
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> AdapterResult<LinkHandle> {
        let mut net = self.lock();
        if !net.endpoints.contains_key(address) {
            return Err(AdapterError::new(format!("no endpoint at {address}")));
        }

        net.next_link += 1;
        let link = LinkHandle(net.next_link);
        net.links.insert(
            link,
            LinkEntry {
                client: self.address.clone(),
                server: address.to_string(),
                subscribed: false,
            },
        );

        let server_peer = net.peer_handle(address);
        let client_peer = net.peer_handle(&self.address);
        net.deliver(
            &self.address,
            AdapterEvent::LinkStateChanged {
                link,
                state: LinkState::Connected,
                peer: Some(server_peer),
            },
        );
        net.deliver(
            address,
            AdapterEvent::LinkStateChanged {
                link,
                state: LinkState::Connected,
                peer: Some(client_peer),
            },
        );
        Ok(link)
    }

    async fn disconnect(&self, link: LinkHandle) -> AdapterResult<()> {
        let mut net = self.lock();
        let Some(entry) = net.links.remove(&link) else {
            // Already torn down from the other side.
            return Ok(());
        };
        for addr in [entry.client.as_str(), entry.server.as_str()] {
            net.deliver(
                addr,
                AdapterEvent::LinkStateChanged {
                    link,
                    state: LinkState::Disconnected,
                    peer: None,
                },
            );
        }
        Ok(())
    }

    async fn discover_attributes(&self, link: LinkHandle) -> AdapterResult<()> {
        let net = self.lock();
        let entry = net.link(link)?;
        let services = net
            .endpoints
            .get(&entry.server)
            .and_then(|e| e.hosted)
            .map(|(_, service, characteristic)| {
                vec![DiscoveredService {
                    service,
                    characteristics: vec![characteristic],
                }]
            })
            .unwrap_or_default();
        net.deliver(
            &self.address,
            AdapterEvent::AttributesDiscovered { link, services },
        );
        Ok(())
    }

    async fn subscribe(&self, link: LinkHandle, _characteristic: Uuid) -> AdapterResult<()> {
        let mut net = self.lock();
        net.links
            .get_mut(&link)
            .ok_or_else(|| AdapterError::new(format!("unknown link {}", link.0)))?
            .subscribed = true;
        Ok(())
    }

    async fn write_characteristic(&self, link: LinkHandle, value: &[u8]) -> AdapterResult<()> {
        let mut net = self.lock();
        let (server, characteristic) = {
            let entry = net.link(link)?;
            let characteristic = net
                .endpoints
                .get(&entry.server)
                .and_then(|e| e.hosted)
                .map(|(_, _, c)| c)
                .ok_or_else(|| AdapterError::new("remote endpoint not hosting"))?;
            (entry.server.clone(), characteristic)
        };

        net.next_request += 1;
        let request = RequestId(net.next_request);
        net.deliver(
            &server,
            AdapterEvent::WriteRequest {
                link,
                request,
                characteristic,
                value: value.to_vec(),
                response_needed: true,
            },
        );
        net.deliver(
            &self.address,
            AdapterEvent::WriteComplete {
                link,
                status: WriteStatus::Success,
            },
        );
        Ok(())
    }

    async fn respond_to_read(&self, _request: RequestId, _value: &[u8]) -> AdapterResult<()> {
        // Loopback has no blocked reader to hand the value back to.
        Ok(())
    }

    async fn respond_to_write(&self, _request: RequestId, _value: &[u8]) -> AdapterResult<()> {
        Ok(())
    }

    async fn notify(&self, link: LinkHandle, value: &[u8]) -> AdapterResult<()> {
        let net = self.lock();
        let entry = net.link(link)?;
        if entry.subscribed {
            net.deliver(
                &entry.client,
                AdapterEvent::NotificationReceived {
                    link,
                    value: value.to_vec(),
                },
            );
        } else {
            trace!(link = link.0, "notify to unsubscribed link dropped");
        }
        net.deliver(
            &self.address,
            AdapterEvent::WriteComplete {
                link,
                status: WriteStatus::Success,
            },
        );
        Ok(())
    }
}
