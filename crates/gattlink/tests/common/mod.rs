//! Shared test fixtures: a recording mock adapter and event helpers.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use gattlink::{
    AdapterError, AdapterResult, EndpointHandle, LinkEvent, LinkEventReceiver, LinkHandle,
    RequestId, TransportAdapter,
};

/// Everything the session asked the driver to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartDiscovery(Uuid),
    StopDiscovery,
    StartAdvertising(Uuid),
    StopAdvertising,
    OpenEndpoint(Uuid, Uuid),
    CloseEndpoint(EndpointHandle),
    Connect(String),
    Disconnect(LinkHandle),
    DiscoverAttributes(LinkHandle),
    Subscribe(LinkHandle, Uuid),
    Write(LinkHandle, Vec<u8>),
    RespondToRead(RequestId, Vec<u8>),
    RespondToWrite(RequestId, Vec<u8>),
    Notify(LinkHandle, Vec<u8>),
}

#[derive(Debug, Default)]
struct MockInner {
    calls: Vec<Call>,
    next_link: u64,
    next_endpoint: u64,
    /// Number of upcoming write/notify submissions to reject.
    fail_writes: usize,
    fail_subscribe: bool,
}

/// A driver double that records every submission and mints handles.
/// It produces no events of its own; tests inject [`gattlink::AdapterEvent`]s
/// directly through `LinkSession::handle_adapter_event`.
#[derive(Debug, Default)]
pub struct MockAdapter {
    inner: Mutex<MockInner>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.inner.lock().unwrap().calls)
    }

    /// Payloads of every `write_characteristic` submission so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(_, value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payloads of every `notify` submission so far.
    pub fn notified(&self) -> Vec<(LinkHandle, Vec<u8>)> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Notify(link, value) => Some((*link, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Reject the next `count` write/notify submissions.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().unwrap().fail_writes = count;
    }

    pub fn fail_subscribe(&self) {
        self.inner.lock().unwrap().fail_subscribe = true;
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl TransportAdapter for MockAdapter {
    async fn start_discovery(&self, service: Uuid) -> AdapterResult<()> {
        self.record(Call::StartDiscovery(service));
        Ok(())
    }

    async fn stop_discovery(&self) -> AdapterResult<()> {
        self.record(Call::StopDiscovery);
        Ok(())
    }

    async fn start_advertising(&self, service: Uuid, _device_name: &str) -> AdapterResult<()> {
        self.record(Call::StartAdvertising(service));
        Ok(())
    }

    async fn stop_advertising(&self) -> AdapterResult<()> {
        self.record(Call::StopAdvertising);
        Ok(())
    }

    async fn open_server_endpoint(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> AdapterResult<EndpointHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::OpenEndpoint(service, characteristic));
        inner.next_endpoint += 1;
        Ok(EndpointHandle(inner.next_endpoint))
    }

    async fn close_server_endpoint(&self, endpoint: EndpointHandle) -> AdapterResult<()> {
        self.record(Call::CloseEndpoint(endpoint));
        Ok(())
    }

    async fn connect(&self, address: &str) -> AdapterResult<LinkHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Connect(address.to_string()));
        inner.next_link += 1;
        Ok(LinkHandle(inner.next_link))
    }

    async fn disconnect(&self, link: LinkHandle) -> AdapterResult<()> {
        self.record(Call::Disconnect(link));
        Ok(())
    }

    async fn discover_attributes(&self, link: LinkHandle) -> AdapterResult<()> {
        self.record(Call::DiscoverAttributes(link));
        Ok(())
    }

    async fn subscribe(&self, link: LinkHandle, characteristic: Uuid) -> AdapterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Subscribe(link, characteristic));
        if inner.fail_subscribe {
            return Err(AdapterError::new("subscribe refused"));
        }
        Ok(())
    }

    async fn write_characteristic(&self, link: LinkHandle, value: &[u8]) -> AdapterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(AdapterError::new("write queue full"));
        }
        inner.calls.push(Call::Write(link, value.to_vec()));
        Ok(())
    }

    async fn respond_to_read(&self, request: RequestId, value: &[u8]) -> AdapterResult<()> {
        self.record(Call::RespondToRead(request, value.to_vec()));
        Ok(())
    }

    async fn respond_to_write(&self, request: RequestId, value: &[u8]) -> AdapterResult<()> {
        self.record(Call::RespondToWrite(request, value.to_vec()));
        Ok(())
    }

    async fn notify(&self, link: LinkHandle, value: &[u8]) -> AdapterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(AdapterError::new("notify queue full"));
        }
        inner.calls.push(Call::Notify(link, value.to_vec()));
        Ok(())
    }
}

/// Await the next application event, failing the test after one second.
pub async fn next_event(events: &mut LinkEventReceiver) -> LinkEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for link event")
        .expect("event channel closed")
}

/// Assert that no application event is currently queued.
pub fn assert_no_event(events: &mut LinkEventReceiver) {
    match events.try_recv() {
        Err(_) => {}
        Ok(event) => panic!("unexpected event: {event:?}"),
    }
}
