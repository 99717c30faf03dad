//! Session behavior against a recording mock driver.
//!
//! Each test drives `LinkSession` directly: operations are called on the
//! session and driver callbacks are injected through `handle_adapter_event`,
//! then the recorded submissions and emitted events are asserted.

mod common;

use std::sync::Arc;

use common::{assert_no_event, next_event, Call, MockAdapter};
use gattlink::{
    AdapterEvent, DiscoveredService, LinkConfig, LinkError, LinkEvent, LinkEventReceiver,
    LinkHandle, LinkSession, LinkState, PeerHandle, RequestId, WriteStatus, DEFAULT_CHUNK_SIZE,
    END_OF_MESSAGE,
};

fn session() -> (Arc<MockAdapter>, LinkSession, LinkEventReceiver) {
    let adapter = Arc::new(MockAdapter::new());
    let (session, events) = LinkSession::new(LinkConfig::default(), adapter.clone());
    (adapter, session, events)
}

fn peer(address: &str) -> PeerHandle {
    PeerHandle::new(address, Some(format!("node-{address}")))
}

/// Report a peer to the session so a later connect can resolve it.
async fn discover(session: &LinkSession, events: &mut LinkEventReceiver, address: &str) {
    session
        .handle_adapter_event(AdapterEvent::PeerDiscovered {
            peer: peer(address),
        })
        .await;
    assert!(matches!(
        next_event(events).await,
        LinkEvent::PeerDiscovered { .. }
    ));
}

/// Walk a session through discover → connect → attached → subscribed.
async fn connect_fully(
    session: &LinkSession,
    events: &mut LinkEventReceiver,
    config: &LinkConfig,
    address: &str,
) -> LinkHandle {
    discover(session, events, address).await;
    session.connect(address).await.expect("connect");
    let link = LinkHandle(1);

    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: None,
        })
        .await;

    session
        .handle_adapter_event(AdapterEvent::AttributesDiscovered {
            link,
            services: vec![DiscoveredService {
                service: config.descriptor.service,
                characteristics: vec![config.descriptor.characteristic],
            }],
        })
        .await;
    assert!(matches!(
        next_event(events).await,
        LinkEvent::PeerConnected { .. }
    ));
    link
}

fn framed(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.extend_from_slice(END_OF_MESSAGE.as_bytes());
    bytes
}

// ----------------------------------------------------------------------------
// Client role
// ----------------------------------------------------------------------------

#[tokio::test]
async fn connect_to_unknown_peer_is_rejected() {
    let (adapter, session, _events) = session();

    let err = session.connect("aa:bb").await.unwrap_err();
    assert!(matches!(err, LinkError::UnknownPeer { address } if address == "aa:bb"));
    assert_eq!(session.client_state().await, LinkState::Disconnected);
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn connect_discovers_attributes_and_subscribes() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();

    discover(&session, &mut events, "aa:bb").await;
    session.connect("aa:bb").await.expect("connect");
    assert_eq!(session.client_state().await, LinkState::Connecting);
    assert!(adapter.calls().contains(&Call::Connect("aa:bb".into())));

    let link = LinkHandle(1);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: None,
        })
        .await;
    assert_eq!(session.client_state().await, LinkState::Connected);
    assert!(adapter.calls().contains(&Call::DiscoverAttributes(link)));
    // The application only hears about the peer once the link is usable.
    assert_no_event(&mut events);

    session
        .handle_adapter_event(AdapterEvent::AttributesDiscovered {
            link,
            services: vec![DiscoveredService {
                service: config.descriptor.service,
                characteristics: vec![config.descriptor.characteristic],
            }],
        })
        .await;
    assert!(adapter
        .calls()
        .contains(&Call::Subscribe(link, config.descriptor.characteristic)));
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::PeerConnected { peer } if peer.address == "aa:bb"
    ));
}

#[tokio::test]
async fn connect_while_busy_is_rejected() {
    let (_adapter, session, mut events) = session();

    discover(&session, &mut events, "aa:bb").await;
    discover(&session, &mut events, "cc:dd").await;
    session.connect("aa:bb").await.expect("first connect");

    let err = session.connect("cc:dd").await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::LinkBusy {
            state: LinkState::Connecting
        }
    ));
}

#[tokio::test]
async fn missing_service_tears_the_link_down() {
    let (adapter, session, mut events) = session();

    discover(&session, &mut events, "aa:bb").await;
    session.connect("aa:bb").await.expect("connect");
    let link = LinkHandle(1);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: None,
        })
        .await;

    // The peer exposes some other service only.
    session
        .handle_adapter_event(AdapterEvent::AttributesDiscovered {
            link,
            services: vec![],
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::ServiceNotFound { peer } if peer.address == "aa:bb"
    ));
    assert!(adapter.calls().contains(&Call::Disconnect(link)));

    // The driver confirms, and the closure reads as locally requested.
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Disconnected,
            peer: None,
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::PeerDisconnected { .. }
    ));
    assert_eq!(session.client_state().await, LinkState::Disconnected);
}

#[tokio::test]
async fn failed_subscription_tears_the_link_down() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    adapter.fail_subscribe();

    discover(&session, &mut events, "aa:bb").await;
    session.connect("aa:bb").await.expect("connect");
    let link = LinkHandle(1);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: None,
        })
        .await;

    session
        .handle_adapter_event(AdapterEvent::AttributesDiscovered {
            link,
            services: vec![DiscoveredService {
                service: config.descriptor.service,
                characteristics: vec![config.descriptor.characteristic],
            }],
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::SubscriptionFailed { .. }
    ));
    assert!(adapter.calls().contains(&Call::Disconnect(link)));
}

#[tokio::test]
async fn outbound_fragments_drain_one_at_a_time() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    let link = connect_fully(&session, &mut events, &config, "aa:bb").await;

    let text = "a".repeat(45);
    session.send_to_server(&text).await.expect("send");

    // 55 framed bytes over 20-byte chunks is three fragments; only the head
    // is submitted until its completion arrives.
    assert_eq!(adapter.written().len(), 1);

    for expected in [2, 3, 3] {
        session
            .handle_adapter_event(AdapterEvent::WriteComplete {
                link,
                status: WriteStatus::Success,
            })
            .await;
        assert_eq!(adapter.written().len(), expected);
    }

    let rejoined: Vec<u8> = adapter.written().concat();
    assert_eq!(rejoined, framed(&text));
    for fragment in adapter.written() {
        assert!(fragment.len() <= DEFAULT_CHUNK_SIZE);
    }
}

#[tokio::test]
async fn rejected_write_is_retried_later() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    let _link = connect_fully(&session, &mut events, &config, "aa:bb").await;
    adapter.fail_next_writes(1);

    session.send_to_server("hi").await.expect("send");
    assert!(adapter.written().is_empty());

    // The fragment stays queued; the next drain opportunity resubmits it.
    session.flush_writes().await;
    assert_eq!(adapter.written(), vec![framed("hi")]);
}

#[tokio::test]
async fn send_while_disconnected_is_rejected() {
    let (_adapter, session, _events) = session();
    let err = session.send_to_server("hi").await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected));
}

#[tokio::test]
async fn negotiated_mtu_shrinks_outbound_fragments() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    let link = connect_fully(&session, &mut events, &config, "aa:bb").await;

    // MTU 11 leaves 8 payload bytes after the 3-byte attribute header.
    session
        .handle_adapter_event(AdapterEvent::MtuChanged { link, mtu: 11 })
        .await;
    session.send_to_server("0123456789").await.expect("send");

    session
        .handle_adapter_event(AdapterEvent::WriteComplete {
            link,
            status: WriteStatus::Success,
        })
        .await;
    for fragment in adapter.written() {
        assert!(fragment.len() <= 8, "fragment over mtu budget: {fragment:?}");
    }
}

#[tokio::test]
async fn inbound_notifications_reassemble_into_messages() {
    let (_adapter, session, mut events) = session();
    let config = session.config().clone();
    let link = connect_fully(&session, &mut events, &config, "aa:bb").await;

    session
        .handle_adapter_event(AdapterEvent::NotificationReceived {
            link,
            value: b"hello wo".to_vec(),
        })
        .await;
    assert_no_event(&mut events);

    session
        .handle_adapter_event(AdapterEvent::NotificationReceived {
            link,
            value: b"rldEND_OF_MSG".to_vec(),
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::MessageFromServer { text } if text == "hello world"
    ));
}

#[tokio::test]
async fn disconnect_control_message_closes_the_link() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    let link = connect_fully(&session, &mut events, &config, "aa:bb").await;

    session
        .handle_adapter_event(AdapterEvent::NotificationReceived {
            link,
            value: framed("DisconnectClient"),
        })
        .await;
    // The control string never surfaces as a message.
    assert_no_event(&mut events);
    assert!(adapter.calls().contains(&Call::Disconnect(link)));
}

#[tokio::test]
async fn unexpected_disconnect_discards_the_partial_message() {
    let (_adapter, session, mut events) = session();
    let config = session.config().clone();
    let link = connect_fully(&session, &mut events, &config, "aa:bb").await;

    session
        .handle_adapter_event(AdapterEvent::NotificationReceived {
            link,
            value: b"HEL".to_vec(),
        })
        .await;

    // The driver reports closure we never asked for.
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Disconnected,
            peer: None,
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::PeerDisconnectedUnexpectedly { peer } if peer.address == "aa:bb"
    ));
    assert_eq!(session.client_state().await, LinkState::Disconnected);

    // A fresh link starts with a fresh assembly: the old prefix is gone.
    session.connect("aa:bb").await.expect("reconnect");
    let link = LinkHandle(2);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: None,
        })
        .await;
    session
        .handle_adapter_event(AdapterEvent::AttributesDiscovered {
            link,
            services: vec![DiscoveredService {
                service: config.descriptor.service,
                characteristics: vec![config.descriptor.characteristic],
            }],
        })
        .await;
    let _connected = next_event(&mut events).await;
    session
        .handle_adapter_event(AdapterEvent::NotificationReceived {
            link,
            value: framed("LO"),
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::MessageFromServer { text } if text == "LO"
    ));
}

// ----------------------------------------------------------------------------
// Server role
// ----------------------------------------------------------------------------

#[tokio::test]
async fn serving_registers_endpoint_then_advertises() {
    let (adapter, session, _events) = session();
    let config = session.config().clone();

    session.start_serving().await.expect("start serving");
    assert!(session.is_serving().await);
    assert_eq!(
        adapter.calls(),
        vec![
            Call::OpenEndpoint(config.descriptor.service, config.descriptor.characteristic),
            Call::StartAdvertising(config.descriptor.service),
        ]
    );

    let err = session.start_serving().await.unwrap_err();
    assert!(matches!(err, LinkError::AlreadyServing));
}

#[tokio::test]
async fn fan_out_with_no_peers_sends_nothing() {
    let (adapter, session, _events) = session();
    session.start_serving().await.expect("start serving");

    session.send_to_clients("anyone there").await.expect("send");
    assert!(adapter.notified().is_empty());
}

#[tokio::test]
async fn fan_out_reaches_every_attached_peer() {
    let (adapter, session, mut events) = session();
    session.start_serving().await.expect("start serving");

    for (n, address) in ["aa:01", "aa:02"].iter().enumerate() {
        session
            .handle_adapter_event(AdapterEvent::LinkStateChanged {
                link: LinkHandle(n as u64 + 1),
                state: LinkState::Connected,
                peer: Some(peer(address)),
            })
            .await;
        assert!(matches!(
            next_event(&mut events).await,
            LinkEvent::PeerConnected { .. }
        ));
    }
    assert_eq!(session.connected_peers().await.len(), 2);

    session.send_to_clients("hi").await.expect("send");
    let first: Vec<LinkHandle> = adapter.notified().into_iter().map(|(l, _)| l).collect();
    assert_eq!(first.len(), 2, "one head fragment per peer");
    assert!(first.contains(&LinkHandle(1)) && first.contains(&LinkHandle(2)));
}

#[tokio::test]
async fn inbound_writes_are_acknowledged_and_reassembled() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    session.start_serving().await.expect("start serving");

    let link = LinkHandle(7);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: Some(peer("aa:bb")),
        })
        .await;
    let _connected = next_event(&mut events).await;

    session
        .handle_adapter_event(AdapterEvent::WriteRequest {
            link,
            request: RequestId(1),
            characteristic: config.descriptor.characteristic,
            value: b"par".to_vec(),
            response_needed: true,
        })
        .await;
    assert!(matches!(
        adapter.calls().last(),
        Some(Call::RespondToWrite(RequestId(1), _))
    ));
    assert_no_event(&mut events);

    session
        .handle_adapter_event(AdapterEvent::WriteRequest {
            link,
            request: RequestId(2),
            characteristic: config.descriptor.characteristic,
            value: framed("ty"),
            response_needed: false,
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::MessageFromClient { peer, text } if peer.address == "aa:bb" && text == "party"
    ));
}

#[tokio::test]
async fn read_requests_serve_the_stored_value_at_offset() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    session.start_serving().await.expect("start serving");

    let link = LinkHandle(1);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: Some(peer("aa:bb")),
        })
        .await;
    let _connected = next_event(&mut events).await;

    // The stored value tracks the last notified fragment.
    session.send_to_clients("abc").await.expect("send");
    let (_, fragment) = adapter.notified().pop().expect("one notify");

    session
        .handle_adapter_event(AdapterEvent::ReadRequest {
            link,
            request: RequestId(9),
            characteristic: config.descriptor.characteristic,
            offset: 3,
        })
        .await;
    let expected = fragment[3..].to_vec();
    assert!(matches!(
        adapter.calls().last(),
        Some(Call::RespondToRead(RequestId(9), value)) if *value == expected
    ));

    // Reads for characteristics we do not host are ignored.
    let before = adapter.calls().len();
    session
        .handle_adapter_event(AdapterEvent::ReadRequest {
            link,
            request: RequestId(10),
            characteristic: uuid::Uuid::nil(),
            offset: 0,
        })
        .await;
    assert_eq!(adapter.calls().len(), before);
}

#[tokio::test]
async fn stop_serving_clears_peers_and_rejects_io() {
    let (adapter, session, mut events) = session();
    session.start_serving().await.expect("start serving");

    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link: LinkHandle(1),
            state: LinkState::Connected,
            peer: Some(peer("aa:bb")),
        })
        .await;
    let _connected = next_event(&mut events).await;

    session.stop_serving().await.expect("stop serving");
    assert!(!session.is_serving().await);
    assert!(session.connected_peers().await.is_empty());
    let calls = adapter.calls();
    assert!(calls.contains(&Call::StopAdvertising));
    assert!(calls.iter().any(|c| matches!(c, Call::CloseEndpoint(_))));

    let err = session.send_to_clients("gone").await.unwrap_err();
    assert!(matches!(err, LinkError::NotServing));

    // Stopping again is a no-op.
    session.stop_serving().await.expect("idempotent stop");
}

#[tokio::test]
async fn serving_restarts_cleanly_after_stop() {
    let (adapter, session, mut events) = session();
    session.start_serving().await.expect("start serving");

    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link: LinkHandle(1),
            state: LinkState::Connected,
            peer: Some(peer("aa:bb")),
        })
        .await;
    let _connected = next_event(&mut events).await;
    session.stop_serving().await.expect("stop serving");

    // The endpoint is rejoinable: a fresh start hosts again and fan-out
    // reaches a newly attached peer.
    session.start_serving().await.expect("restart serving");
    assert!(session.is_serving().await);

    let link = LinkHandle(2);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: Some(peer("cc:dd")),
        })
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        LinkEvent::PeerConnected { peer } if peer.address == "cc:dd"
    ));

    session.send_to_clients("back up").await.expect("send");
    let notified = adapter.notified();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].0, link);
    assert_eq!(notified[0].1, framed("back up"));
}

#[tokio::test]
async fn rejected_notify_is_retried_on_flush() {
    let (adapter, session, mut events) = session();
    session.start_serving().await.expect("start serving");

    let link = LinkHandle(1);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: Some(peer("aa:bb")),
        })
        .await;
    let _connected = next_event(&mut events).await;

    adapter.fail_next_writes(1);
    session.send_to_clients("hi").await.expect("send");
    assert!(adapter.notified().is_empty());

    // The fragment stays queued; an explicit flush resubmits it.
    session.flush_writes().await;
    assert_eq!(adapter.notified(), vec![(link, framed("hi"))]);
}

#[tokio::test]
async fn write_from_untracked_link_leaves_stored_value_alone() {
    let (adapter, session, mut events) = session();
    let config = session.config().clone();
    session.start_serving().await.expect("start serving");

    let link = LinkHandle(1);
    session
        .handle_adapter_event(AdapterEvent::LinkStateChanged {
            link,
            state: LinkState::Connected,
            peer: Some(peer("aa:bb")),
        })
        .await;
    let _connected = next_event(&mut events).await;

    // Establish a stored value from the tracked peer.
    session
        .handle_adapter_event(AdapterEvent::WriteRequest {
            link,
            request: RequestId(1),
            characteristic: config.descriptor.characteristic,
            value: b"kept".to_vec(),
            response_needed: false,
        })
        .await;

    // A write from a link the endpoint never saw is ignored entirely.
    let before = adapter.calls().len();
    session
        .handle_adapter_event(AdapterEvent::WriteRequest {
            link: LinkHandle(99),
            request: RequestId(2),
            characteristic: config.descriptor.characteristic,
            value: b"intruder".to_vec(),
            response_needed: true,
        })
        .await;
    assert_eq!(adapter.calls().len(), before, "no response sent");
    assert_no_event(&mut events);

    // A read still serves the tracked peer's bytes.
    session
        .handle_adapter_event(AdapterEvent::ReadRequest {
            link,
            request: RequestId(3),
            characteristic: config.descriptor.characteristic,
            offset: 0,
        })
        .await;
    assert!(matches!(
        adapter.calls().last(),
        Some(Call::RespondToRead(RequestId(3), value)) if value == b"kept"
    ));
}
