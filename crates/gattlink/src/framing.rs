//! Chunked message framing and reassembly
//!
//! A message is framed by appending a fixed sentinel string and slicing the
//! result into fragments no larger than the transport chunk size. The
//! receiving side accumulates raw fragment bytes per link and delivers a
//! complete message for every sentinel occurrence it finds.
//!
//! The sentinel match is a plain substring search: a message body that itself
//! contains the sentinel text will be mis-framed. This is a documented
//! limitation of the wire format, not corrected here.

use std::collections::HashMap;

use tracing::trace;

use crate::adapter::LinkHandle;
use crate::error::{LinkError, Result};

/// End-of-message sentinel appended to every outbound message.
pub const END_OF_MESSAGE: &str = "END_OF_MSG";

// ----------------------------------------------------------------------------
// Fragmentation
// ----------------------------------------------------------------------------

/// Split `message` into ordered fragments of at most `chunk_size` bytes.
///
/// The sentinel is appended before slicing, so its tail may be split across
/// the final two fragments. Empty messages are rejected; a zero chunk size is
/// rejected rather than looping forever.
pub fn fragment(message: &str, chunk_size: usize) -> Result<Vec<Vec<u8>>> {
    if message.is_empty() {
        return Err(LinkError::EmptyMessage);
    }
    if chunk_size == 0 {
        return Err(LinkError::InvalidChunkSize);
    }

    let mut framed = Vec::with_capacity(message.len() + END_OF_MESSAGE.len());
    framed.extend_from_slice(message.as_bytes());
    framed.extend_from_slice(END_OF_MESSAGE.as_bytes());

    let fragments: Vec<Vec<u8>> = framed.chunks(chunk_size).map(<[u8]>::to_vec).collect();
    trace!(
        len = framed.len(),
        chunk_size,
        count = fragments.len(),
        "fragmented outbound message"
    );
    Ok(fragments)
}

// ----------------------------------------------------------------------------
// Reassembly
// ----------------------------------------------------------------------------

/// Per-link accumulator turning raw fragments back into complete messages.
///
/// Invariant: between calls, each buffer holds a prefix of exactly one
/// in-flight message (no sentinel present) or is empty. Bytes that arrive
/// after a sentinel in the same fragment are retained as the start of the
/// next message.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: HashMap<LinkHandle, Vec<u8>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw fragment from `link`. Returns every message completed by
    /// it, in arrival order; usually zero or one.
    ///
    /// Complete messages are decoded lossily, so a peer sending invalid UTF-8
    /// degrades to replacement characters instead of poisoning the link.
    pub fn feed(&mut self, link: LinkHandle, fragment: &[u8]) -> Vec<String> {
        let buffer = self.buffers.entry(link).or_default();
        buffer.extend_from_slice(fragment);

        let mut complete = Vec::new();
        while let Some(at) = find_sentinel(buffer) {
            let body: Vec<u8> = buffer.drain(..at).collect();
            buffer.drain(..END_OF_MESSAGE.len());
            complete.push(String::from_utf8_lossy(&body).into_owned());
        }

        if !complete.is_empty() {
            trace!(
                link = link.0,
                messages = complete.len(),
                retained = buffer.len(),
                "completed inbound message(s)"
            );
        }
        complete
    }

    /// Bytes buffered for `link` with no sentinel observed yet.
    pub fn pending(&self, link: LinkHandle) -> usize {
        self.buffers.get(&link).map_or(0, Vec::len)
    }

    /// Discard any partial message from `link`. Called on disconnect so no
    /// partial data survives into a later connection.
    pub fn clear(&mut self, link: LinkHandle) {
        self.buffers.remove(&link);
    }

    pub fn clear_all(&mut self) {
        self.buffers.clear();
    }
}

fn find_sentinel(buffer: &[u8]) -> Option<usize> {
    let sentinel = END_OF_MESSAGE.as_bytes();
    if buffer.len() < sentinel.len() {
        return None;
    }
    buffer.windows(sentinel.len()).position(|w| w == sentinel)
}
