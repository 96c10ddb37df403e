/// In-memory chat view state — the ordered message list, oldest first
///
/// Replaced wholesale on each successful poll; locally-sent entries
/// that the snapshot does not yet carry are kept, so a poll racing a
/// send can never drop an optimistic entry.
use crate::types::{ChatMessage, Delivery, WireMessage};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<ChatMessage>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.delivery == Delivery::Pending)
    }

    pub fn get(&self, client_key: &str) -> Option<&ChatMessage> {
        self.entries.iter().find(|e| e.client_key == client_key)
    }

    /// Most recent failed entry, if any (the retry affordance).
    pub fn last_failed(&self) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.delivery == Delivery::Failed)
    }

    /// Optimistic append of a locally-sent entry.
    pub fn push(&mut self, entry: ChatMessage) {
        self.entries.push(entry);
    }

    /// Flip a pending entry to confirmed in place, adopting the
    /// server-assigned identity. Returns false if the key is unknown.
    pub fn confirm(&mut self, client_key: &str, wire: &WireMessage) -> bool {
        match self.entries.iter_mut().find(|e| e.client_key == client_key) {
            Some(entry) => {
                entry.id = Some(wire.id.clone());
                entry.text = wire.text.clone();
                entry.created_at = wire.created_at;
                entry.conversation_id = wire.conversation_id.clone();
                entry.delivery = Delivery::Confirmed;
                true
            }
            None => false,
        }
    }

    /// Mark a send as failed. The entry stays visible.
    pub fn fail(&mut self, client_key: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.client_key == client_key) {
            Some(entry) => {
                entry.delivery = Delivery::Failed;
                true
            }
            None => false,
        }
    }

    /// Put a failed entry back in flight for a resend.
    pub fn reset_pending(&mut self, client_key: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.client_key == client_key) {
            Some(entry) => {
                entry.delivery = Delivery::Pending;
                true
            }
            None => false,
        }
    }

    /// Full-replace sync: the snapshot becomes the confirmed list in
    /// server order. Carried over, appended after it:
    /// - pending and failed local entries,
    /// - confirmed local entries the snapshot does not contain yet
    ///   (a send confirmed while this poll was in flight).
    /// Confirmed duplicates are deduplicated by server id.
    pub fn apply_snapshot(&mut self, snapshot: &[WireMessage]) {
        let seen: HashSet<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
        let mut merged: Vec<ChatMessage> = snapshot.iter().map(ChatMessage::from_wire).collect();

        for entry in self.entries.drain(..) {
            match entry.delivery {
                Delivery::Pending | Delivery::Failed => merged.push(entry),
                Delivery::Confirmed => {
                    let unseen = entry
                        .id
                        .as_deref()
                        .map(|id| !seen.contains(id))
                        .unwrap_or(false);
                    if unseen {
                        merged.push(entry);
                    }
                }
            }
        }

        self.entries = merged;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
