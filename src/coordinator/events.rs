//! Event fan-out and notification pushes.
//!
//! Node-scoped events go to every handle on the node whose mask matches;
//! targeted events (lock grants) go to one handle regardless of its mask.
//! Each delivery increments the event's counter and enqueues a notification
//! on the receiving session, and the affected sessions get an unsolicited
//! keep-alive frame so delivery does not wait for the next client poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::coordinator::{Coordinator, Outbox};
use crate::event::{Event, EventKind, Notification};
use crate::node::{Node, NodeState};
use crate::session::Session;
use crate::types::{HandleId, SessionId};
use crate::wire;

/// Convert a queued notification to its wire form.
pub(crate) fn wire_notification(notification: &Notification) -> wire::WireNotification {
    wire::WireNotification {
        event_id: notification.event.id,
        handle: notification.handle,
        mask: notification.event.mask().bits(),
        payload: notification.event.kind.wire_payload(),
    }
}

/// Encode an unsolicited keep-alive frame carrying the session's entire
/// unacknowledged queue.
fn notification_push(session: &Session, now: Instant) -> Vec<u8> {
    let notifications = session.notifications.iter().map(wire_notification).collect();
    wire::encode_response(&wire::Response::Keepalive {
        lease_remaining_ms: session.lease_remaining_ms(now),
        notifications,
    })
}

impl Coordinator {
    /// Deliver a node-scoped event to every subscribed handle on the node.
    ///
    /// Caller holds the node mutex; the session map is locked here, which is
    /// the documented order.
    pub(crate) fn deliver_to_node(
        &self,
        state: &NodeState,
        event: &Arc<Event>,
        outbox: &mut Outbox,
    ) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let mut touched: Vec<SessionId> = Vec::new();

        for (handle_id, sub) in &state.handles {
            if !sub.event_mask.contains(event.mask()) {
                continue;
            }
            let Some(session) = sessions.get_mut(sub.session) else {
                continue;
            };
            if session.expired {
                continue;
            }
            event.add_delivery();
            session.notifications.push_back(Notification {
                handle: *handle_id,
                event: event.clone(),
            });
            if !touched.contains(&sub.session) {
                touched.push(sub.session);
            }
        }

        for session_id in touched {
            if let Some(session) = sessions.get(session_id) {
                outbox.pushes.push((session.addr, notification_push(session, now)));
            }
        }
    }

    /// Deliver a targeted event to a single handle, bypassing its mask.
    pub(crate) fn deliver_to_handle(
        &self,
        handle: HandleId,
        session_id: SessionId,
        event: &Arc<Event>,
        outbox: &mut Outbox,
    ) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        if session.expired {
            return;
        }
        event.add_delivery();
        session.notifications.push_back(Notification { handle, event: event.clone() });
        outbox.pushes.push((session.addr, notification_push(session, now)));
    }

    /// Emit a child-added or child-removed event to the parent node, if the
    /// parent is open. Caller must hold no node mutex; the namespace map
    /// guard is passed in.
    pub(crate) fn emit_child_event(
        &self,
        nodes: &HashMap<String, Arc<Node>>,
        name: &str,
        added: bool,
        outbox: &mut Outbox,
    ) {
        let Some((parent, child)) = Self::parent_of(name) else {
            return;
        };
        let Some(parent_node) = nodes.get(parent) else {
            return;
        };
        let kind = if added {
            EventKind::ChildNodeAdded { name: child.to_string() }
        } else {
            EventKind::ChildNodeRemoved { name: child.to_string() }
        };
        let event = Event::new(self.next_event_id(), kind);
        let state = parent_node.state.lock();
        self.deliver_to_node(&state, &event, outbox);
    }
}
