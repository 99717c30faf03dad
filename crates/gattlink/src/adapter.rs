//! Transport adapter contract
//!
//! The raw wireless driver (scanning, advertising, attribute I/O) is an
//! external collaborator. The session reaches it only through the
//! [`TransportAdapter`] trait below, and the driver reports back through the
//! closed set of [`AdapterEvent`] callbacks. Events may be produced on any
//! driver thread; implementations hand them over a channel and the embedding
//! application feeds them to [`LinkSession::handle_adapter_event`].
//!
//! [`LinkSession::handle_adapter_event`]: crate::session::LinkSession::handle_adapter_event

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AdapterError;
use crate::peer::{LinkState, PeerHandle};

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Opaque handle for one open link, minted by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkHandle(pub u64);

/// Opaque handle for a hosted server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointHandle(pub u64);

/// Identifier of a pending attribute read/write awaiting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Completion status of an asynchronous write or notification submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    Failure(i32),
}

/// One service found during attribute discovery, with its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub service: Uuid,
    pub characteristics: Vec<Uuid>,
}

// ----------------------------------------------------------------------------
// Adapter Events
// ----------------------------------------------------------------------------

/// Asynchronous callbacks from the transport driver.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A peer advertising the scanned service was seen.
    PeerDiscovered { peer: PeerHandle },
    /// Scanning failed to start or aborted; `code` is driver-specific.
    DiscoveryFailed { code: i32 },
    /// Advertising is live.
    AdvertiseStarted,
    /// Advertising failed to start; `code` is driver-specific.
    AdvertiseFailed { code: i32 },
    /// A link changed state. Server-side events carry the remote peer's
    /// identity; client-side events may omit it (the target is known).
    LinkStateChanged {
        link: LinkHandle,
        state: LinkState,
        peer: Option<PeerHandle>,
    },
    /// Attribute discovery finished. An empty service list means discovery
    /// failed or the remote endpoint exposes nothing.
    AttributesDiscovered {
        link: LinkHandle,
        services: Vec<DiscoveredService>,
    },
    /// A connected peer asked to read a hosted characteristic.
    ReadRequest {
        link: LinkHandle,
        request: RequestId,
        characteristic: Uuid,
        offset: usize,
    },
    /// A connected peer wrote to a hosted characteristic.
    WriteRequest {
        link: LinkHandle,
        request: RequestId,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    /// A subscribed characteristic on the remote endpoint changed.
    NotificationReceived { link: LinkHandle, value: Vec<u8> },
    /// An earlier `write_characteristic` or `notify` submission completed.
    WriteComplete { link: LinkHandle, status: WriteStatus },
    /// The link negotiated a new MTU.
    MtuChanged { link: LinkHandle, mtu: usize },
}

/// Sending half handed to adapter implementations.
pub type AdapterEventSender = mpsc::UnboundedSender<AdapterEvent>;
/// Receiving half the application pumps into the session.
pub type AdapterEventReceiver = mpsc::UnboundedReceiver<AdapterEvent>;

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// The transport primitives the session requires from the driver.
///
/// Every method is a submission: success means the driver accepted the
/// request, not that it completed. Completion arrives as an [`AdapterEvent`].
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn start_discovery(&self, service: Uuid) -> AdapterResult<()>;
    async fn stop_discovery(&self) -> AdapterResult<()>;

    async fn start_advertising(&self, service: Uuid, device_name: &str) -> AdapterResult<()>;
    async fn stop_advertising(&self) -> AdapterResult<()>;

    async fn open_server_endpoint(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> AdapterResult<EndpointHandle>;
    async fn close_server_endpoint(&self, endpoint: EndpointHandle) -> AdapterResult<()>;

    async fn connect(&self, address: &str) -> AdapterResult<LinkHandle>;
    async fn disconnect(&self, link: LinkHandle) -> AdapterResult<()>;

    async fn discover_attributes(&self, link: LinkHandle) -> AdapterResult<()>;
    async fn subscribe(&self, link: LinkHandle, characteristic: Uuid) -> AdapterResult<()>;

    async fn write_characteristic(&self, link: LinkHandle, value: &[u8]) -> AdapterResult<()>;
    async fn respond_to_read(&self, request: RequestId, value: &[u8]) -> AdapterResult<()>;
    async fn respond_to_write(&self, request: RequestId, value: &[u8]) -> AdapterResult<()>;
    async fn notify(&self, link: LinkHandle, value: &[u8]) -> AdapterResult<()>;
}
