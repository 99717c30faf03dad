//! Link session configuration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Protocol Identifiers
// ----------------------------------------------------------------------------

/// Default service identifier advertised by the server role.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Default characteristic identifier used for all message traffic.
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Default outbound chunk size in bytes.
///
/// The ATT payload budget of the 23-byte minimum MTU, minus the 3-byte header.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// The service/characteristic pair both roles must agree on out-of-band.
///
/// There is no negotiation protocol for mismatched values; a client whose
/// descriptor differs from the server's simply finds no matching service
/// during attribute discovery and tears the link down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service identifier to advertise and scan for.
    pub service: Uuid,
    /// Characteristic identifier carrying message fragments.
    pub characteristic: Uuid,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE_UUID,
            characteristic: DEFAULT_CHARACTERISTIC_UUID,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a [`LinkSession`](crate::session::LinkSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Service and characteristic identifiers shared by both roles.
    pub descriptor: ServiceDescriptor,
    /// Maximum fragment payload in bytes before MTU negotiation.
    pub chunk_size: usize,
    /// Local device name exposed to peers while advertising.
    pub device_name: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            descriptor: ServiceDescriptor::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            device_name: "gattlink".to_string(),
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service/characteristic pair.
    pub fn with_descriptor(mut self, descriptor: ServiceDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Set the outbound chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the local device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }
}
