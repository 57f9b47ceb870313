//! Two managers talking over the TCP transport on loopback

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

use tether::config::Config;
use tether::event;
use tether::protocol::{NOTICE_CONNECTION_LOST, NOTICE_DIAL_FAILED};
use tether::transport::TcpTransport;
use tether::{ConnectionManager, LinkEvent, Role, VariantKind};

fn ephemeral_transport() -> Arc<TcpTransport> {
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let bindings = BTreeMap::from([(VariantKind::Secure, any), (VariantKind::Insecure, any)]);
    Arc::new(TcpTransport::new(bindings))
}

fn node(config: Config) -> (Arc<TcpTransport>, ConnectionManager, UnboundedReceiver<LinkEvent>) {
    let transport = ephemeral_transport();
    let (tx, rx) = event::channel();
    let manager = ConnectionManager::new(Arc::new(config), transport.clone(), Arc::new(tx));
    (transport, manager, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<LinkEvent>) -> LinkEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_bind(transport: &TcpTransport, variant: VariantKind) -> SocketAddr {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(addr) = transport.bound_addr(variant) {
            return addr;
        }
        assert!(Instant::now() < deadline, "endpoint never bound");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_dial_exchange_and_hangup() {
    let (server_transport, server, mut server_events) = node(Config::default());
    let (_client_transport, client, mut client_events) = node(Config::default());

    server.start();
    assert_eq!(next_event(&mut server_events).await, LinkEvent::RoleChanged(Role::Listening));
    let addr = wait_for_bind(&server_transport, VariantKind::Secure).await;

    client.connect(addr.to_string(), VariantKind::Secure).unwrap();
    assert_eq!(next_event(&mut client_events).await, LinkEvent::RoleChanged(Role::Connecting));
    assert_eq!(next_event(&mut client_events).await, LinkEvent::RoleChanged(Role::Connected));
    assert_eq!(
        next_event(&mut client_events).await,
        LinkEvent::PeerIdentified(addr.to_string())
    );

    assert_eq!(next_event(&mut server_events).await, LinkEvent::RoleChanged(Role::Connected));
    match next_event(&mut server_events).await {
        LinkEvent::PeerIdentified(peer) => assert!(peer.starts_with("127.0.0.1:")),
        other => panic!("expected peer identity, got {:?}", other),
    }

    assert!(client.send("ping\n").await);
    assert_eq!(
        next_event(&mut client_events).await,
        LinkEvent::OutboundAck(Bytes::from_static(b"ping\n"))
    );
    assert_eq!(
        next_event(&mut server_events).await,
        LinkEvent::InboundFrame(Bytes::from_static(b"ping\n"))
    );

    assert!(server.send("pong\n").await);
    assert_eq!(
        next_event(&mut client_events).await,
        LinkEvent::InboundFrame(Bytes::from_static(b"pong\n"))
    );

    server.stop();
    assert_eq!(
        next_event(&mut client_events).await,
        LinkEvent::Notice(NOTICE_CONNECTION_LOST.to_string())
    );
    assert_eq!(next_event(&mut client_events).await, LinkEvent::RoleChanged(Role::Listening));
    assert_eq!(client.stats().connections_lost, 1);
}

#[tokio::test]
async fn test_listeners_release_endpoints_when_connected() {
    let (server_transport, server, mut server_events) = node(Config::default());
    let (_client_transport, client, _client_events) = node(Config::default());

    server.start();
    let addr = wait_for_bind(&server_transport, VariantKind::Insecure).await;
    wait_for_bind(&server_transport, VariantKind::Secure).await;

    client.connect(addr.to_string(), VariantKind::Insecure).unwrap();
    assert_eq!(next_event(&mut server_events).await, LinkEvent::RoleChanged(Role::Listening));
    assert_eq!(next_event(&mut server_events).await, LinkEvent::RoleChanged(Role::Connected));

    let deadline = Instant::now() + Duration::from_secs(5);
    while server_transport.bound_addr(VariantKind::Secure).is_some()
        || server_transport.bound_addr(VariantKind::Insecure).is_some()
    {
        assert!(Instant::now() < deadline, "endpoints still bound");
        sleep(Duration::from_millis(10)).await;
    }
    assert!(server.workers().listeners.is_empty());
}

#[tokio::test]
async fn test_refused_dial_returns_to_listening() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let (_transport, client, mut events) = node(Config::default());
    client.connect(addr.to_string(), VariantKind::Secure).unwrap();

    assert_eq!(next_event(&mut events).await, LinkEvent::RoleChanged(Role::Connecting));
    assert_eq!(
        next_event(&mut events).await,
        LinkEvent::Notice(NOTICE_DIAL_FAILED.to_string())
    );
    assert_eq!(next_event(&mut events).await, LinkEvent::RoleChanged(Role::Listening));
    assert_eq!(client.stats().dial_failures, 1);
}
