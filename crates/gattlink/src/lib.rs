//! Point-to-point text messaging over attribute-oriented wireless links
//!
//! This crate layers a chunked message protocol and an explicit session
//! lifecycle on top of a low-level attribute transport (scanning,
//! advertising, ~20-byte characteristic writes and notifications). Messages
//! of arbitrary length are split into fragments, terminated by a sentinel,
//! and reassembled on the far side.
//!
//! ## Architecture
//!
//! - [`config`] - Service identifiers and tunables
//! - [`error`] - Error types
//! - [`adapter`] - The [`TransportAdapter`] contract the driver implements
//! - [`peer`] - Link states and the discovered-peer directory
//! - [`framing`] - Sentinel-terminated fragmentation and reassembly
//! - [`scheduler`] - Per-link FIFO write scheduling
//! - [`event`] - Events the session surfaces to the application
//! - [`discovery`] - Scan lifecycle and peer collection
//! - [`client`] - The outbound (central) role
//! - [`server`] - The hosted (peripheral) role
//! - [`session`] - [`LinkSession`], the public entry point
//! - [`loopback`] - In-memory transport for tests and demos
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gattlink::{LinkConfig, LinkSession, LoopbackNetwork};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let net = LoopbackNetwork::new();
//! let (adapter, driver_events) = net.endpoint("aa:00", "demo");
//!
//! let (session, mut events) = LinkSession::new(LinkConfig::default(), Arc::new(adapter));
//! let session = Arc::new(session);
//!
//! let pump = Arc::clone(&session);
//! tokio::spawn(async move { pump.run(driver_events).await });
//!
//! session.start_serving().await?;
//! session.send_to_clients("hello out there").await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod framing;
pub mod loopback;
pub mod peer;
pub mod scheduler;
pub mod server;
pub mod session;

// Public API exports
pub use adapter::{
    AdapterEvent, AdapterEventReceiver, AdapterEventSender, AdapterResult, DiscoveredService,
    EndpointHandle, LinkHandle, RequestId, TransportAdapter, WriteStatus,
};
pub use client::DISCONNECT_CONTROL;
pub use config::{
    LinkConfig, ServiceDescriptor, DEFAULT_CHARACTERISTIC_UUID, DEFAULT_CHUNK_SIZE,
    DEFAULT_SERVICE_UUID,
};
pub use error::{AdapterError, LinkError, Result};
pub use event::{LinkEvent, LinkEventReceiver};
pub use framing::{fragment, Reassembler, END_OF_MESSAGE};
pub use loopback::{LoopbackAdapter, LoopbackNetwork};
pub use peer::{LinkState, PeerHandle};
pub use session::LinkSession;
