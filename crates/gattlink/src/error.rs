//! Error types for the link session

use thiserror::Error;

use crate::peer::LinkState;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LinkError>;

// ----------------------------------------------------------------------------
// Adapter Errors
// ----------------------------------------------------------------------------

/// Failure reported synchronously by a transport adapter primitive.
///
/// The adapter is a black box; all we can carry across the boundary is the
/// driver's own description of what went wrong.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Errors surfaced synchronously to callers of session operations.
///
/// Asynchronous failures (discovery failure, advertise failure, teardown of a
/// half-established link) are reported through [`LinkEvent`] instead; see the
/// `event` module. Nothing here is fatal to the process.
///
/// [`LinkEvent`]: crate::event::LinkEvent
#[derive(Debug, Error)]
pub enum LinkError {
    /// The address was never discovered (or the directory was cleared).
    #[error("unknown peer address: {address}")]
    UnknownPeer { address: String },

    /// Only one outbound client link is owned at a time.
    #[error("client link busy in state {state}")]
    LinkBusy { state: LinkState },

    /// The client link is not in the Connected state.
    #[error("client link not connected")]
    NotConnected,

    #[error("server endpoint already active")]
    AlreadyServing,

    #[error("server endpoint not active")]
    NotServing,

    /// Empty outbound messages are rejected before fragmentation.
    #[error("outbound message is empty")]
    EmptyMessage,

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    /// A transport primitive failed at submission time.
    #[error("transport adapter failure: {reason}")]
    Adapter { reason: String },
}

impl From<AdapterError> for LinkError {
    fn from(err: AdapterError) -> Self {
        LinkError::Adapter { reason: err.0 }
    }
}
