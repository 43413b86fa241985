#[cfg(test)]
#[path = "reducer_test.rs"]
mod tests;

use super::SessionStore;
use crate::domain::models::Part;
use crate::domain::models::ServerEvent;

fn check_tool_transition(store: &SessionStore, part: &Part) {
    let next = match part.tool_state() {
        Some(state) => state,
        None => return,
    };

    let previous = store
        .part(&part.session_id, &part.message_id, &part.id)
        .and_then(|existing| return existing.tool_state());

    if let Some(previous) = previous {
        if !previous.can_transition_to(next) {
            tracing::warn!(
                session_id = part.session_id,
                message_id = part.message_id,
                part_id = part.id,
                from = previous.name(),
                to = next.name(),
                "Illegal tool state transition, applying anyway"
            );
        }
    }
}

/// Applies feed events to the store. Every event maps to at most one upsert or
/// delete keyed by stable ids, so duplicate and reordered delivery is safe.
pub struct EventReducer {}

impl EventReducer {
    /// Returns false when the event carries nothing for the store.
    pub fn apply(store: &mut SessionStore, event: ServerEvent) -> bool {
        match event {
            ServerEvent::SessionUpdated(session) => {
                tracing::debug!(session_id = session.id, "Session updated");
                store.upsert_session(session);
            }
            ServerEvent::SessionDeleted(session) => {
                tracing::debug!(session_id = session.id, "Session deleted");
                store.remove_session(&session.id);
            }
            ServerEvent::SessionStatus { session_id, status } => {
                tracing::debug!(session_id, status = status.label(), "Session status");
                store.set_status(&session_id, status);
            }
            ServerEvent::MessageUpdated(message) => {
                tracing::debug!(
                    session_id = message.session_id(),
                    message_id = message.id(),
                    "Message updated"
                );
                store.upsert_message(message);
            }
            ServerEvent::MessageRemoved {
                session_id,
                message_id,
            } => {
                tracing::debug!(session_id, message_id, "Message removed");
                store.remove_message(&session_id, &message_id);
            }
            ServerEvent::PartUpdated { part, .. } => {
                check_tool_transition(store, &part);
                store.upsert_part(part);
            }
            ServerEvent::PartRemoved {
                session_id,
                message_id,
                part_id,
            } => {
                tracing::debug!(session_id, message_id, part_id, "Part removed");
                store.remove_part(&session_id, &message_id, &part_id);
            }
            ServerEvent::Unknown(kind) => {
                tracing::debug!(kind, "Ignoring unknown event");
                return false;
            }
            ServerEvent::ServerConnected
            | ServerEvent::ServerHeartbeat
            | ServerEvent::SessionIdle { .. }
            | ServerEvent::SessionError { .. }
            | ServerEvent::QuestionAsked(_) => {
                return false;
            }
        }

        return true;
    }
}
