//! Session establishment, keep-alive, and lease expiry.

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{info, warn};

use crate::coordinator::events::wire_notification;
use crate::coordinator::{Coordinator, Outbox};
use crate::error::{CoordError, Result};
use crate::types::{EventId, HandleId, SessionId};
use crate::wire::WireNotification;

impl Coordinator {
    /// First contact: create a session for the client address.
    ///
    /// Returns the new session id and the base directory's startup
    /// generation, which clients compare to reject tokens from a previous
    /// incarnation.
    pub fn handshake(&self, addr: SocketAddr) -> (SessionId, u32) {
        let session = self
            .sessions
            .lock()
            .create(addr, self.config.lease_interval);
        info!(session, client = %addr, "session established");
        (session, self.base.generation())
    }

    /// Renew a session's lease and collect its unacknowledged notifications.
    ///
    /// The cursor acknowledges every notification with an event id at or
    /// below it, retiring events whose last copies are consumed. The reply
    /// retransmits everything still unacknowledged.
    pub fn keepalive(
        &self,
        session: SessionId,
        last_acked_event: EventId,
    ) -> Result<(u64, Vec<WireNotification>)> {
        let mut registry = self.sessions.lock();
        registry.ack_notifications(session, last_acked_event);
        registry.renew(session, self.config.lease_interval)?;

        let entry = registry
            .get(session)
            .ok_or(CoordError::ExpiredSession { session })?;
        let notifications = entry.notifications.iter().map(wire_notification).collect();
        Ok((entry.lease_remaining_ms(Instant::now()), notifications))
    }

    /// Expire every session whose lease has lapsed, tearing down its handles
    /// through the shared close path. Run periodically by the server.
    ///
    /// Expiry never waits on acknowledgement: an expired session will not
    /// ack anything, and its queued notifications are acknowledged on its
    /// behalf when the session is removed.
    pub fn expire_sessions(&self) -> Outbox {
        let mut outbox = Outbox::new();
        loop {
            let expired = self.sessions.lock().next_expired(Instant::now());
            let Some(session) = expired else {
                break;
            };
            info!(session, "session lease expired");

            let handle_ids: Vec<HandleId> = self
                .sessions
                .lock()
                .get(session)
                .map(|entry| entry.handles.iter().copied().collect())
                .unwrap_or_default();
            for handle in handle_ids {
                if let Err(err) = self.destroy_handle(handle, false, &mut outbox) {
                    warn!(session, handle, error = %err, "failed to tear down expired handle");
                }
            }

            self.sessions.lock().remove(session);
        }
        outbox
    }

    /// Number of live sessions. Used by the server for periodic reporting.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
