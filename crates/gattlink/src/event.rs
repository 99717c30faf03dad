//! Application-facing events
//!
//! Everything the embedding application hears from a session arrives through
//! this one closed enum, delivered fire-and-forget over an unbounded channel.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::peer::PeerHandle;

/// Events emitted by a [`LinkSession`](crate::session::LinkSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LinkEvent {
    /// Scanning for the configured service started.
    DiscoveryStarted,
    /// Scanning failed; `code` is driver-specific.
    DiscoveryFailed { code: i32 },
    /// A peer was discovered (or rediscovered with fresh details).
    PeerDiscovered { peer: PeerHandle },
    /// Advertising started.
    AdvertiseStarted,
    /// Advertising failed to start; the server endpoint was rolled back.
    AdvertiseFailed { code: i32 },
    /// A peer attached (server role), or the outbound link became usable,
    /// meaning the service was located and notifications are subscribed
    /// (client role).
    PeerConnected { peer: PeerHandle },
    /// A link closed as the result of a local request.
    PeerDisconnected { peer: PeerHandle },
    /// A link closed without a local request; cleanup is identical.
    PeerDisconnectedUnexpectedly { peer: PeerHandle },
    /// The remote endpoint does not expose the configured service or
    /// characteristic; the link was torn down.
    ServiceNotFound { peer: PeerHandle },
    /// Subscribing to notifications failed; the link was torn down.
    SubscriptionFailed { peer: PeerHandle },
    /// A complete message arrived from an attached client (server role).
    MessageFromClient { peer: PeerHandle, text: String },
    /// A complete message arrived from the server (client role).
    MessageFromServer { text: String },
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Deliver an event to the application, dropping it if the receiver is gone.
pub(crate) fn emit(events: &LinkEventSender, event: LinkEvent) {
    if events.send(event).is_err() {
        warn!("application event receiver dropped; event discarded");
    }
}
