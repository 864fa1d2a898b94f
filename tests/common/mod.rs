//! Shared helpers for coordinator integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use madrone::config::Config;
use madrone::coordinator::Coordinator;
use madrone::transport::ChannelTransport;
use madrone::types::{EventMask, HandleId, OpenFlags, SessionId};
use madrone::wire::WireNotification;

/// A coordinator over a fresh temp base directory, with the channel
/// transport standing in for the network.
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    /// Frames the coordinator pushed through the transport.
    pub frames: UnboundedReceiver<(SocketAddr, Vec<u8>)>,
    base: TempDir,
}

impl Harness {
    pub fn base_path(&self) -> &std::path::Path {
        self.base.path()
    }
}

/// Start a coordinator with default test configuration.
pub fn start() -> Harness {
    start_with(|_| {})
}

/// Start a coordinator, letting the test adjust the configuration first.
pub fn start_with(adjust: impl FnOnce(&mut Config)) -> Harness {
    let base = TempDir::new().expect("temp base dir");
    let mut config = Config::new(base.path());
    adjust(&mut config);
    config.validate().expect("valid test config");

    let (transport, frames) = ChannelTransport::pair();
    let coordinator =
        Arc::new(Coordinator::new(config, Arc::new(transport)).expect("coordinator starts"));
    Harness { coordinator, frames, base }
}

/// A distinct fake client address per session.
pub fn client_addr(n: u16) -> SocketAddr {
    format!("127.0.0.1:{}", 40_000 + n).parse().expect("addr")
}

/// Handshake a new session.
pub fn session(harness: &Harness, n: u16) -> SessionId {
    let (session, _) = harness.coordinator.handshake(client_addr(n));
    session
}

/// Open a node with the flags a lock holder needs.
pub fn open_locker(harness: &Harness, session: SessionId, name: &str) -> HandleId {
    let (handle, _, _) = harness
        .coordinator
        .open(
            session,
            name,
            OpenFlags::CREATE | OpenFlags::READ | OpenFlags::WRITE | OpenFlags::LOCK,
            EventMask::empty(),
        )
        .expect("open");
    handle
}

/// Fetch the session's queued notifications without acknowledging any.
pub fn peek_notifications(harness: &Harness, session: SessionId) -> Vec<WireNotification> {
    let (_, notifications) = harness.coordinator.keepalive(session, 0).expect("keepalive");
    notifications
}

/// Acknowledge everything queued for the session.
pub fn ack_all(harness: &Harness, session: SessionId) {
    harness
        .coordinator
        .keepalive(session, u64::MAX)
        .expect("keepalive ack");
}

/// Release a handle's lock on a separate task, flushing barriers there.
///
/// The returned task completes only once every cascaded grant has been
/// acknowledged by its target session.
pub fn spawn_release(
    harness: &Harness,
    session: SessionId,
    handle: HandleId,
) -> tokio::task::JoinHandle<()> {
    let coordinator = harness.coordinator.clone();
    tokio::spawn(async move {
        let outbox = coordinator.release(session, handle).expect("release");
        coordinator.flush(outbox).await;
    })
}

/// Let spawned tasks make progress.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
