//! Loopback demonstration of a gattlink messaging session.
//!
//! Spins up one serving session and a configurable number of clients on an
//! in-process loopback network, exchanges a message in both directions with
//! each client, then disconnects them all.

use std::sync::Arc;

use clap::Parser;
use tokio::time::{timeout, Duration};
use tracing::{error, info};

use gattlink::{
    LinkConfig, LinkError, LinkEvent, LinkEventReceiver, LinkSession, LoopbackNetwork,
};

#[derive(Parser, Debug)]
#[command(name = "gattlink", about = "Loopback demo for the gattlink session")]
struct Cli {
    /// Number of client sessions to attach.
    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    /// Message each client sends to the server.
    #[arg(short, long, default_value = "hello from the small end of the pipe")]
    message: String,

    /// Payload bytes per fragment.
    #[arg(long, default_value_t = gattlink::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> gattlink::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = LinkConfig::default().with_chunk_size(cli.chunk_size);
    let net = LoopbackNetwork::new();

    // One serving session everyone talks to.
    let (server, mut server_events) = spawn_session(&net, "loop:00", "server", &config);
    server.start_serving().await?;

    // Print the server's side of the conversation, answering each message.
    let responder = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            match event {
                LinkEvent::MessageFromClient { peer, text } => {
                    println!("[server] {} says: {text}", peer.label());
                    if let Err(e) = responder.send_to_clients(&format!("ack: {text}")).await {
                        error!(error = %e, "server reply failed");
                    }
                }
                other => info!(event = ?other, "server event"),
            }
        }
    });

    for n in 0..cli.clients {
        let address = format!("loop:{:02}", n + 1);
        let name = format!("client-{n}");
        let (client, mut events) = spawn_session(&net, &address, &name, &config);

        client.start_discovery().await?;
        let peer = loop {
            match next_event(&mut events).await? {
                LinkEvent::PeerDiscovered { peer } => break peer,
                other => info!(event = ?other, "client event"),
            }
        };
        client.stop_discovery().await?;

        client.connect(&peer.address).await?;
        wait_for(&mut events, |e| matches!(e, LinkEvent::PeerConnected { .. })).await?;
        info!(client = %name, server = %peer.label(), "attached");

        client.send_to_server(&cli.message).await?;
        let reply = wait_for(&mut events, |e| {
            matches!(e, LinkEvent::MessageFromServer { .. })
        })
        .await?;
        if let LinkEvent::MessageFromServer { text } = reply {
            println!("[{name}] server replied: {text}");
        }

        client.disconnect().await?;
        wait_for(&mut events, |e| {
            matches!(e, LinkEvent::PeerDisconnected { .. })
        })
        .await?;
    }

    info!("demo complete");
    Ok(())
}

fn spawn_session(
    net: &LoopbackNetwork,
    address: &str,
    name: &str,
    config: &LinkConfig,
) -> (Arc<LinkSession>, LinkEventReceiver) {
    let (adapter, driver_events) = net.endpoint(address, name);
    let config = config.clone().with_device_name(name);
    let (session, events) = LinkSession::new(config, Arc::new(adapter));
    let session = Arc::new(session);
    let pump = Arc::clone(&session);
    tokio::spawn(async move { pump.run(driver_events).await });
    (session, events)
}

async fn next_event(events: &mut LinkEventReceiver) -> gattlink::Result<LinkEvent> {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .map_err(|_| LinkError::Adapter {
            reason: "timed out waiting for session event".into(),
        })?
        .ok_or(LinkError::Adapter {
            reason: "session event channel closed".into(),
        })
}

async fn wait_for(
    events: &mut LinkEventReceiver,
    mut pred: impl FnMut(&LinkEvent) -> bool,
) -> gattlink::Result<LinkEvent> {
    loop {
        let event = next_event(events).await?;
        if pred(&event) {
            return Ok(event);
        }
        info!(event = ?event, "client event");
    }
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}
