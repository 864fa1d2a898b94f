//! The network-facing server loop.
//!
//! Binds the UDP socket, wires the transport into the coordinator, runs the
//! lease-expiry sweeper, and dispatches inbound datagrams onto the runtime's
//! worker threads. Shutdown is a ctrl-c away; in-flight requests finish on
//! their own tasks and responses to departed clients are simply dropped by
//! the transport.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{error, info};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::dispatch;
use crate::transport::{Transport, UdpTransport};

/// Maximum datagram the server accepts; larger frames are truncated by the
/// socket and rejected as malformed.
const MAX_FRAME: usize = 64 * 1024;

/// Run a coordinator until ctrl-c.
pub async fn serve(config: Config) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind udp port {}", config.port))?;
    let socket = Arc::new(socket);
    let transport: Arc<dyn Transport> = Arc::new(UdpTransport::new(socket.clone()));

    let coordinator = Arc::new(Coordinator::new(config, transport.clone())?);
    info!(
        port = coordinator.config().port,
        generation = coordinator.generation(),
        "coordinator listening"
    );

    let sweeper = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.config().keepalive_interval);
            loop {
                ticker.tick().await;
                dispatch::sweep_expired(&coordinator).await;
            }
        })
    };

    let result = run_loop(&coordinator, &socket, &transport).await;
    sweeper.abort();
    info!("coordinator shut down");
    result
}

async fn run_loop(
    coordinator: &Arc<Coordinator>,
    socket: &Arc<UdpSocket>,
    transport: &Arc<dyn Transport>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_FRAME];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, addr) = match received {
                    Ok(received) => received,
                    Err(err) => {
                        error!(error = %err, "socket receive failed");
                        continue;
                    }
                };
                let frame = buf[..len].to_vec();
                let coordinator = coordinator.clone();
                let transport = transport.clone();
                tokio::spawn(async move {
                    let response = dispatch::handle_frame(&coordinator, addr, &frame).await;
                    transport.send_response(addr, response).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}
