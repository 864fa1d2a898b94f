//! Request dispatch: decode, execute, encode.
//!
//! Every failure is caught here and becomes an error response; nothing
//! propagates across requests. Side effects collected by an operation
//! (notification pushes, acknowledgement barriers) are flushed after the
//! operation's own mutexes are long dropped and before the response frame is
//! returned, so a request that waits on the barrier replies only once every
//! target session has acknowledged.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::coordinator::Coordinator;
use crate::error::{CoordError, Result};
use crate::wire::{self, Command, Request, RequestBody, Response};

/// Handle one inbound frame and produce the response frame.
pub async fn handle_frame(coordinator: &Arc<Coordinator>, addr: SocketAddr, buf: &[u8]) -> Vec<u8> {
    let request = match wire::decode_request(buf) {
        Ok(request) => request,
        Err(err) => {
            debug!(client = %addr, error = %err, "malformed request");
            let command = buf
                .get(..2)
                .map(|raw| u16::from_le_bytes([raw[0], raw[1]]))
                .unwrap_or(0);
            let code = CoordError::Protocol { message: err.to_string() }.code();
            return wire::encode_response(&Response::Error { command, code });
        }
    };

    let command = request.command();
    match execute(coordinator, addr, request).await {
        Ok(response) => wire::encode_response(&response),
        Err(err) => {
            debug!(client = %addr, command = ?command, error = %err, "request failed");
            wire::encode_response(&Response::Error {
                command: command as u16,
                code: err.code(),
            })
        }
    }
}

async fn execute(
    coordinator: &Arc<Coordinator>,
    addr: SocketAddr,
    request: Request,
) -> Result<Response> {
    let session = request.session;
    match request.body {
        RequestBody::Handshake => {
            let (session, generation) = coordinator.handshake(addr);
            Ok(Response::Handshake { session, generation })
        }
        RequestBody::Keepalive { last_acked_event } => {
            let (lease_remaining_ms, notifications) =
                coordinator.keepalive(session, last_acked_event)?;
            Ok(Response::Keepalive { lease_remaining_ms, notifications })
        }
        RequestBody::Open { name, flags, event_mask } => {
            let (handle, created, outbox) = coordinator.open(session, &name, flags, event_mask)?;
            coordinator.flush(outbox).await;
            Ok(Response::Open { handle, created })
        }
        RequestBody::Close { handle } => {
            let outbox = coordinator.close(session, handle)?;
            coordinator.flush(outbox).await;
            Ok(Response::Ok { command: Command::Close })
        }
        RequestBody::Mkdir { name } => {
            let outbox = coordinator.mkdir(session, &name)?;
            coordinator.flush(outbox).await;
            Ok(Response::Ok { command: Command::Mkdir })
        }
        RequestBody::Delete { name } => {
            let outbox = coordinator.delete(session, &name)?;
            coordinator.flush(outbox).await;
            Ok(Response::Ok { command: Command::Delete })
        }
        RequestBody::AttrSet { handle, attr, value } => {
            let outbox = coordinator.attr_set(session, handle, &attr, &value)?;
            coordinator.flush(outbox).await;
            Ok(Response::Ok { command: Command::AttrSet })
        }
        RequestBody::AttrGet { handle, attr } => {
            let value = coordinator.attr_get(session, handle, &attr)?;
            Ok(Response::AttrGet { value })
        }
        RequestBody::AttrDel { handle, attr } => {
            let outbox = coordinator.attr_del(session, handle, &attr)?;
            coordinator.flush(outbox).await;
            Ok(Response::Ok { command: Command::AttrDel })
        }
        RequestBody::Exists { name } => {
            let exists = coordinator.exists(session, &name)?;
            Ok(Response::Exists { exists })
        }
        RequestBody::Lock { handle, mode, try_acquire } => {
            let (status, generation, outbox) =
                coordinator.lock(session, handle, mode, try_acquire)?;
            coordinator.flush(outbox).await;
            Ok(Response::Lock { status, generation })
        }
        RequestBody::Release { handle } => {
            let outbox = coordinator.release(session, handle)?;
            coordinator.flush(outbox).await;
            Ok(Response::Ok { command: Command::Release })
        }
    }
}

/// Expiry sweep entry point shared by the server loop and tests: expire due
/// sessions and deliver whatever notifications the teardown produced.
pub async fn sweep_expired(coordinator: &Arc<Coordinator>) {
    let outbox = coordinator.expire_sessions();
    coordinator.flush(outbox).await;
}
