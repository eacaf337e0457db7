//! Client-side session reconciliation.
//!
//! The hub promises at-most-once delivery per connected subscriber and keeps
//! no replay log beyond the persisted ledger, so any client that drops and
//! reconnects has to repair its own state: re-fetch authoritative history,
//! re-join its rooms, and fold the live stream back in without duplicating
//! what the fetch already returned. This module is that fold, kept free of
//! I/O so native clients and tests drive it the same way.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use uuid::Uuid;

use super::events::ChatBroadcast;

/// A chat message as the client holds it. Optimistically sent messages have
/// no id until the server echo arrives.
#[derive(Debug, Clone)]
pub struct LocalMessage {
    pub id: Option<Uuid>,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub receiver_id: Uuid,
    pub text: String,
    pub created_at: Option<DateTime<FixedOffset>>,
}

impl LocalMessage {
    fn from_broadcast(msg: &ChatBroadcast) -> Self {
        Self {
            id: Some(msg.id),
            sender_id: msg.sender_id,
            sender_name: msg.sender_name.clone(),
            receiver_id: msg.receiver_id,
            text: msg.text.clone(),
            created_at: Some(msg.created_at),
        }
    }
}

/// What the UI should do with a live event.
#[derive(Debug, PartialEq, Eq)]
pub enum LiveOutcome {
    /// New message; surface a notification iff `notify`.
    Appended { notify: bool },
    /// Server echo of an optimistic send; placeholder upgraded in place.
    Superseded,
    /// Already held (history fetch or earlier broadcast); drop silently.
    Duplicate,
}

pub struct SessionReconciler {
    local_user: Uuid,
    joined_rooms: Vec<String>,
    /// Composite keys of everything already surfaced: the same logical
    /// message can arrive once from the live stream and once from a
    /// reconciliation fetch.
    seen: HashSet<String>,
    messages: Vec<LocalMessage>,
}

fn dedup_key(sender_id: Uuid, text: &str, created_at: Option<DateTime<FixedOffset>>) -> String {
    let stamp = created_at.map(|t| t.to_rfc3339()).unwrap_or_default();
    format!("{}_{}_{}", sender_id, text, stamp)
}

impl SessionReconciler {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            local_user,
            joined_rooms: Vec::new(),
            seen: HashSet::new(),
            messages: Vec::new(),
        }
    }

    /// Record a room subscription so it can be replayed on reconnect.
    pub fn note_joined(&mut self, room: &str) {
        if !self.joined_rooms.iter().any(|r| r == room) {
            self.joined_rooms.push(room.to_string());
        }
    }

    /// Rooms to re-join after a reconnect; membership is not durable on the
    /// server side.
    pub fn rooms_to_rejoin(&self) -> &[String] {
        &self.joined_rooms
    }

    /// Replace local state with an authoritative history fetch. Everything in
    /// the fetch counts as seen, so a late live echo of the same message
    /// never raises a second notification.
    pub fn reset_history(&mut self, history: Vec<ChatBroadcast>) {
        self.messages = history.iter().map(LocalMessage::from_broadcast).collect();
        self.seen = history
            .iter()
            .map(|m| dedup_key(m.sender_id, &m.text, Some(m.created_at)))
            .collect();
    }

    /// Record a locally composed message before the server confirms it.
    pub fn push_optimistic(&mut self, receiver_id: Uuid, sender_name: &str, text: &str) {
        self.messages.push(LocalMessage {
            id: None,
            sender_id: self.local_user,
            sender_name: sender_name.to_string(),
            receiver_id,
            text: text.to_string(),
            created_at: None,
        });
    }

    /// Fold one live broadcast into local state.
    pub fn observe_live(&mut self, msg: &ChatBroadcast) -> LiveOutcome {
        if self.messages.iter().any(|m| m.id == Some(msg.id)) {
            return LiveOutcome::Duplicate;
        }

        let key = dedup_key(msg.sender_id, &msg.text, Some(msg.created_at));
        if self.seen.contains(&key) {
            return LiveOutcome::Duplicate;
        }
        self.seen.insert(key);

        // The echo of our own optimistic send upgrades the placeholder
        // instead of appearing twice in the transcript.
        if msg.sender_id == self.local_user {
            if let Some(placeholder) = self
                .messages
                .iter_mut()
                .find(|m| m.id.is_none() && m.sender_id == msg.sender_id && m.text == msg.text)
            {
                placeholder.id = Some(msg.id);
                placeholder.created_at = Some(msg.created_at);
                return LiveOutcome::Superseded;
            }
        }

        self.messages.push(LocalMessage::from_broadcast(msg));

        LiveOutcome::Appended {
            // Never toast for messages this device authored.
            notify: msg.sender_id != self.local_user,
        }
    }

    pub fn messages(&self) -> &[LocalMessage] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn broadcast(sender_id: Uuid, text: &str) -> ChatBroadcast {
        ChatBroadcast {
            id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            sender_id,
            sender_name: "Sender".to_string(),
            receiver_id: Uuid::new_v4(),
            text: text.to_string(),
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn test_counterpart_message_notifies_once() {
        let mut session = SessionReconciler::new(Uuid::new_v4());
        let msg = broadcast(Uuid::new_v4(), "On my way");

        assert_eq!(
            session.observe_live(&msg),
            LiveOutcome::Appended { notify: true }
        );
        assert_eq!(session.observe_live(&msg), LiveOutcome::Duplicate);
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_history_fetch_suppresses_live_echo() {
        let mut session = SessionReconciler::new(Uuid::new_v4());
        let msg = broadcast(Uuid::new_v4(), "Seat confirmed?");

        session.reset_history(vec![msg.clone()]);

        // The same logical message arrives again from the live stream.
        assert_eq!(session.observe_live(&msg), LiveOutcome::Duplicate);
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_own_messages_never_notify() {
        let me = Uuid::new_v4();
        let mut session = SessionReconciler::new(me);
        let msg = broadcast(me, "Coming down now");

        assert_eq!(
            session.observe_live(&msg),
            LiveOutcome::Appended { notify: false }
        );
    }

    #[test]
    fn test_optimistic_send_superseded_not_duplicated() {
        let me = Uuid::new_v4();
        let counterpart = Uuid::new_v4();
        let mut session = SessionReconciler::new(me);

        session.push_optimistic(counterpart, "Me", "Pick me at gate 2");
        assert_eq!(session.messages().len(), 1);
        assert!(session.messages()[0].id.is_none());

        let echo = broadcast(me, "Pick me at gate 2");
        assert_eq!(session.observe_live(&echo), LiveOutcome::Superseded);

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].id, Some(echo.id));
        assert!(session.messages()[0].created_at.is_some());
    }

    #[test]
    fn test_rejoin_list_is_deduplicated_and_ordered() {
        let mut session = SessionReconciler::new(Uuid::new_v4());
        session.note_joined("ride-1");
        session.note_joined("driver_abc");
        session.note_joined("ride-1"); // re-join after a blip

        assert_eq!(session.rooms_to_rejoin(), ["ride-1", "driver_abc"]);
    }
}
