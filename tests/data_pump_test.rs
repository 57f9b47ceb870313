//! Inbound framing, outbound writes and link loss on a connected manager

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

use tether::config::Config;
use tether::event;
use tether::protocol::{DEFAULT_FRAME_CAPACITY, NOTICE_CONNECTION_LOST, NOTICE_WRITE_FAILED};
use tether::transport::{DialPlan, MemoryTransport};
use tether::{ConnectionManager, LinkEvent, PeerInfo, Role, VariantKind};

struct Harness {
    transport: MemoryTransport,
    manager: ConnectionManager,
    events: UnboundedReceiver<LinkEvent>,
}

impl Harness {
    fn new(config: Config) -> Self {
        Self::with_transport(MemoryTransport::new(), config)
    }

    fn with_transport(transport: MemoryTransport, config: Config) -> Self {
        let (tx, events) = event::channel();
        let manager =
            ConnectionManager::new(Arc::new(config), Arc::new(transport.clone()), Arc::new(tx));
        Self {
            transport,
            manager,
            events,
        }
    }

    /// Start listening, accept one inbound link and skip its lifecycle events
    async fn connect_inbound(&mut self) -> DuplexStream {
        self.manager.start();
        wait_until(|| self.transport.is_listening(VariantKind::Secure)).await;

        let remote = self
            .transport
            .inject(VariantKind::Secure, PeerInfo::new("AA:BB:CC:DD:EE:FF"))
            .unwrap();

        assert_eq!(self.next().await, LinkEvent::RoleChanged(Role::Listening));
        assert_eq!(self.next().await, LinkEvent::RoleChanged(Role::Connected));
        assert_eq!(
            self.next().await,
            LinkEvent::PeerIdentified("AA:BB:CC:DD:EE:FF".to_string())
        );
        remote
    }

    async fn next(&mut self) -> LinkEvent {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn drain(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

fn frame(data: &'static [u8]) -> LinkEvent {
    LinkEvent::InboundFrame(Bytes::from_static(data))
}

#[tokio::test]
async fn test_each_line_becomes_one_frame() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    remote.write_all(b"AB\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"AB\n"));

    remote.write_all(b"CD\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"CD\n"));
}

#[tokio::test]
async fn test_line_split_across_reads() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    remote.write_all(b"hel").await.unwrap();
    sleep(Duration::from_millis(20)).await;
    assert!(harness.drain().is_empty());

    remote.write_all(b"lo\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"hello\n"));
}

#[tokio::test]
async fn test_several_lines_in_one_read() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    remote.write_all(b"one\ntwo\nthree").await.unwrap();
    assert_eq!(harness.next().await, frame(b"one\n"));
    assert_eq!(harness.next().await, frame(b"two\n"));

    remote.write_all(b"\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"three\n"));

    let stats = harness.manager.stats();
    let session = stats.session.unwrap();
    assert_eq!(session.frames_in, 3);
    assert_eq!(session.bytes_in, 14);
}

#[tokio::test]
async fn test_oversized_line_is_truncated() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    remote.write_all(&[b'x'; 3000]).await.unwrap();
    remote.write_all(b"\nok\n").await.unwrap();

    match harness.next().await {
        LinkEvent::InboundFrame(bytes) => {
            assert_eq!(bytes.len(), DEFAULT_FRAME_CAPACITY);
            assert_eq!(bytes[bytes.len() - 1], b'\n');
            assert!(bytes[..bytes.len() - 1].iter().all(|b| *b == b'x'));
        }
        other => panic!("expected inbound frame, got {:?}", other),
    }
    assert_eq!(harness.next().await, frame(b"ok\n"));
}

#[tokio::test]
async fn test_small_frame_capacity() {
    let mut config = Config::default();
    config.link.frame_capacity = 4;
    let mut harness = Harness::new(config);
    let mut remote = harness.connect_inbound().await;

    remote.write_all(b"abcdef\nxy\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"abc\n"));
    assert_eq!(harness.next().await, frame(b"xy\n"));
}

#[tokio::test]
async fn test_paced_reads_still_deliver_frames() {
    let mut config = Config::default();
    config.link.pace_interval = Duration::from_millis(10);
    config.link.read_chunk_size = 2;
    let mut harness = Harness::new(config);
    let mut remote = harness.connect_inbound().await;

    remote.write_all(b"slow\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"slow\n"));
}

#[tokio::test]
async fn test_send_writes_and_acknowledges() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    assert!(harness.manager.send("hello\n").await);
    assert_eq!(
        harness.next().await,
        LinkEvent::OutboundAck(Bytes::from_static(b"hello\n"))
    );

    let mut buf = [0u8; 6];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello\n");

    let session = harness.manager.stats().session.unwrap();
    assert_eq!(session.bytes_out, 6);
    assert_eq!(session.writes, 1);
}

#[tokio::test]
async fn test_sends_are_written_in_order() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    for line in ["a\n", "b\n", "c\n"] {
        assert!(harness.manager.send(line).await);
    }

    let mut buf = [0u8; 6];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"a\nb\nc\n");
    assert_eq!(
        harness.drain(),
        vec![
            LinkEvent::OutboundAck(Bytes::from_static(b"a\n")),
            LinkEvent::OutboundAck(Bytes::from_static(b"b\n")),
            LinkEvent::OutboundAck(Bytes::from_static(b"c\n")),
        ]
    );
}

#[tokio::test]
async fn test_peer_hangup_returns_to_listening() {
    let mut harness = Harness::new(Config::default());
    let remote = harness.connect_inbound().await;

    drop(remote);

    assert_eq!(
        harness.next().await,
        LinkEvent::Notice(NOTICE_CONNECTION_LOST.to_string())
    );
    assert_eq!(harness.next().await, LinkEvent::RoleChanged(Role::Listening));
    assert_eq!(harness.manager.role(), Role::Listening);
    assert!(!harness.manager.workers().pump);
    assert_eq!(harness.manager.stats().connections_lost, 1);

    wait_until(|| harness.transport.is_listening(VariantKind::Secure)).await;
    wait_until(|| harness.transport.is_listening(VariantKind::Insecure)).await;
    assert_eq!(harness.transport.listen_calls(VariantKind::Secure), 2);

    let _again = harness
        .transport
        .inject(VariantKind::Insecure, PeerInfo::new("second"))
        .unwrap();
    assert_eq!(harness.next().await, LinkEvent::RoleChanged(Role::Connected));
    assert_eq!(harness.next().await, LinkEvent::PeerIdentified("second".to_string()));
}

#[tokio::test]
async fn test_superseded_pump_stays_silent() {
    let mut harness = Harness::new(Config::default());
    harness
        .transport
        .plan_dial("replacement", DialPlan::Connect { name: None });
    let first = harness.connect_inbound().await;

    harness
        .manager
        .connect("replacement", VariantKind::Secure)
        .unwrap();
    assert_eq!(harness.next().await, LinkEvent::RoleChanged(Role::Connecting));
    assert_eq!(harness.next().await, LinkEvent::RoleChanged(Role::Connected));
    assert_eq!(
        harness.next().await,
        LinkEvent::PeerIdentified("replacement".to_string())
    );

    drop(first);
    sleep(Duration::from_millis(50)).await;

    assert!(harness.drain().is_empty());
    assert_eq!(harness.manager.role(), Role::Connected);
    assert_eq!(harness.manager.stats().connections_lost, 0);
}

#[tokio::test]
async fn test_send_after_stop_is_dropped() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    harness.manager.stop();
    assert_eq!(harness.next().await, LinkEvent::RoleChanged(Role::Idle));
    assert!(!harness.manager.send("late\n").await);

    let mut buf = [0u8; 8];
    let n = timeout(Duration::from_secs(2), remote.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    sleep(Duration::from_millis(20)).await;
    assert!(harness.drain().is_empty());
}

#[tokio::test]
async fn test_write_failure_keeps_link_up() {
    let mut harness = Harness::new(Config::default());
    let mut remote = harness.connect_inbound().await;

    harness.transport.break_writes("AA:BB:CC:DD:EE:FF", true);
    assert!(!harness.manager.send("lost\n").await);

    assert_eq!(
        harness.next().await,
        LinkEvent::Notice(NOTICE_WRITE_FAILED.to_string())
    );
    sleep(Duration::from_millis(20)).await;
    assert!(harness.drain().is_empty());
    assert_eq!(harness.manager.role(), Role::Connected);
    assert!(harness.manager.workers().pump);
    assert_eq!(harness.manager.stats().session.unwrap().writes, 0);

    remote.write_all(b"still here\n").await.unwrap();
    assert_eq!(harness.next().await, frame(b"still here\n"));

    harness.transport.break_writes("AA:BB:CC:DD:EE:FF", false);
    assert!(harness.manager.send("back\n").await);
    assert_eq!(
        harness.next().await,
        LinkEvent::OutboundAck(Bytes::from_static(b"back\n"))
    );

    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"back\n");
}

#[tokio::test]
async fn test_stop_interrupts_blocked_send() {
    let mut harness =
        Harness::with_transport(MemoryTransport::with_pipe_capacity(16), Config::default());
    let mut remote = harness.connect_inbound().await;

    let manager = harness.manager.clone();
    let blocked = tokio::spawn(async move { manager.send(vec![b'x'; 4096]).await });
    sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "peer is not reading, send should be pending");

    harness.manager.stop();
    let sent = timeout(Duration::from_secs(1), blocked)
        .await
        .expect("send still blocked after stop")
        .unwrap();
    assert!(!sent);

    let mut received = Vec::new();
    timeout(Duration::from_secs(2), remote.read_to_end(&mut received))
        .await
        .expect("link not closed after stop")
        .unwrap();
    assert!(received.len() < 4096);

    let started = Instant::now();
    harness
        .manager
        .shutdown(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(
        harness.drain(),
        vec![
            LinkEvent::RoleChanged(Role::Idle),
            LinkEvent::RoleChanged(Role::Idle),
        ]
    );
}
