use crate::types::message::{ChatMessage, DeliveryState};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log must be seeded exactly once, before any live message is
    /// applied.
    #[error("conversation log used out of order: seed once, then apply")]
    InvalidSequence,
}

/// What applying a message did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new entry was added.
    Inserted,
    /// The message matched an existing entry and upgraded it
    /// (confirmation, correlation id, or an authoritative timestamp).
    Updated,
    /// The message matched an existing entry and carried nothing new.
    Unchanged,
}

#[derive(Debug, Clone)]
struct LogEntry {
    /// Arrival order, used to keep equal-timestamp messages stable.
    seq: u64,
    message: ChatMessage,
}

/// The merged, ordered view of one conversation. History rows, live
/// frames and optimistic local sends all funnel through [`apply`]; the
/// log deduplicates them and keeps entries sorted by timestamp with
/// arrival order breaking ties.
///
/// Two messages denote the same record when their correlation ids
/// match, or failing that when sender, receiver, text and
/// server-assigned timestamp all agree.
///
/// [`apply`]: ConversationLog::apply
#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: Vec<LogEntry>,
    next_seq: u64,
    seeded: bool,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the history baseline. Must happen exactly once; live
    /// frames buffered before the baseline would otherwise interleave
    /// with it unpredictably.
    pub fn seed(&mut self, history: Vec<ChatMessage>) -> Result<(), LogError> {
        if self.seeded {
            return Err(LogError::InvalidSequence);
        }
        for message in history {
            self.apply_inner(message);
        }
        self.seeded = true;
        Ok(())
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Merges one message into the log. Idempotent: replaying a message
    /// that is already present returns [`ApplyOutcome::Unchanged`].
    pub fn apply(&mut self, message: ChatMessage) -> Result<ApplyOutcome, LogError> {
        if !self.seeded {
            return Err(LogError::InvalidSequence);
        }
        Ok(self.apply_inner(message))
    }

    fn apply_inner(&mut self, message: ChatMessage) -> ApplyOutcome {
        if let Some(idx) = self.find_match(&message) {
            return self.update_at(idx, message);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert_entry(seq, message);
        ApplyOutcome::Inserted
    }

    fn find_match(&self, incoming: &ChatMessage) -> Option<usize> {
        if let Some(client_id) = incoming.client_id.as_deref() {
            if let Some(idx) = self
                .entries
                .iter()
                .position(|e| e.message.client_id.as_deref() == Some(client_id))
            {
                return Some(idx);
            }
        }
        self.entries
            .iter()
            .position(|e| e.message.same_server_record(incoming))
    }

    fn update_at(&mut self, idx: usize, incoming: ChatMessage) -> ApplyOutcome {
        let mut changed = false;
        let mut adopt_timestamp = None;
        {
            let existing = &mut self.entries[idx].message;
            if existing.client_id.is_none() && incoming.client_id.is_some() {
                existing.client_id = incoming.client_id.clone();
                changed = true;
            }
            // Confirmed is sticky: once the server has acknowledged a
            // record it never goes back to Pending or Failed.
            if incoming.state == DeliveryState::Confirmed
                && existing.state != DeliveryState::Confirmed
            {
                existing.state = DeliveryState::Confirmed;
                changed = true;
            }
            if incoming.server_assigned && !existing.server_assigned {
                adopt_timestamp = Some(incoming.timestamp);
            }
        }
        if let Some(timestamp) = adopt_timestamp {
            // The provisional local clock reading gives way to the
            // server's stamp, which may move the entry in the ordering.
            let LogEntry { seq, mut message } = self.entries.remove(idx);
            message.timestamp = timestamp;
            message.server_assigned = true;
            self.insert_entry(seq, message);
            changed = true;
        }
        if changed {
            ApplyOutcome::Updated
        } else {
            ApplyOutcome::Unchanged
        }
    }

    fn insert_entry(&mut self, seq: u64, message: ChatMessage) {
        let key = (message.timestamp, seq);
        let idx = self
            .entries
            .partition_point(|e| (e.message.timestamp, e.seq) <= key);
        self.entries.insert(idx, LogEntry { seq, message });
    }

    /// Marks an unconfirmed send as failed. Refuses to touch a
    /// confirmed entry.
    pub fn mark_failed(&mut self, client_id: &str) -> bool {
        self.transition(client_id, DeliveryState::Failed)
    }

    /// Puts a failed send back into flight for a resend attempt.
    pub fn mark_pending(&mut self, client_id: &str) -> bool {
        self.transition(client_id, DeliveryState::Pending)
    }

    fn transition(&mut self, client_id: &str, state: DeliveryState) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.message.client_id.as_deref() == Some(client_id))
        else {
            return false;
        };
        if entry.message.state == DeliveryState::Confirmed {
            return false;
        }
        entry.message.state = state;
        true
    }

    pub fn get(&self, client_id: &str) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .find(|e| e.message.client_id.as_deref() == Some(client_id))
            .map(|e| &e.message)
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::UserId;
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn server_msg(sender: &str, receiver: &str, text: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            sender_id: UserId::new(sender),
            receiver_id: UserId::new(receiver),
            text: text.to_string(),
            timestamp: at(secs),
            server_assigned: true,
            state: DeliveryState::Confirmed,
            client_id: None,
        }
    }

    fn pending_msg(sender: &str, receiver: &str, text: &str, secs: i64, id: &str) -> ChatMessage {
        ChatMessage {
            sender_id: UserId::new(sender),
            receiver_id: UserId::new(receiver),
            text: text.to_string(),
            timestamp: at(secs),
            server_assigned: false,
            state: DeliveryState::Pending,
            client_id: Some(id.to_string()),
        }
    }

    fn texts(log: &ConversationLog) -> Vec<String> {
        log.snapshot().into_iter().map(|m| m.text).collect()
    }

    #[test]
    fn seed_sorts_by_timestamp() {
        let mut log = ConversationLog::new();
        log.seed(vec![
            server_msg("a", "b", "second", 20),
            server_msg("b", "a", "first", 10),
            server_msg("a", "b", "third", 30),
        ])
        .unwrap();
        assert_eq!(texts(&log), ["first", "second", "third"]);
    }

    #[test]
    fn seed_twice_is_rejected() {
        let mut log = ConversationLog::new();
        log.seed(Vec::new()).unwrap();
        assert_eq!(log.seed(Vec::new()), Err(LogError::InvalidSequence));
    }

    #[test]
    fn apply_before_seed_is_rejected() {
        let mut log = ConversationLog::new();
        assert_eq!(
            log.apply(server_msg("a", "b", "hi", 1)),
            Err(LogError::InvalidSequence)
        );
    }

    #[test]
    fn replayed_server_record_is_unchanged() {
        let mut log = ConversationLog::new();
        log.seed(vec![server_msg("a", "b", "hi", 10)]).unwrap();

        let outcome = log.apply(server_msg("a", "b", "hi", 10)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn identical_text_at_different_times_stays_distinct() {
        let mut log = ConversationLog::new();
        log.seed(vec![server_msg("a", "b", "hi", 10)]).unwrap();

        let outcome = log.apply(server_msg("a", "b", "hi", 11)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Inserted);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn echo_collapses_into_optimistic_send_and_adopts_timestamp() {
        let mut log = ConversationLog::new();
        log.seed(vec![server_msg("b", "a", "old", 10)]).unwrap();

        // Local provisional clock says 100.
        log.apply(pending_msg("a", "b", "hello", 100, "c1")).unwrap();

        // Server stamps the record at 50 and echoes it back.
        let mut echo = server_msg("a", "b", "hello", 50);
        echo.client_id = Some("c1".to_string());
        let outcome = log.apply(echo).unwrap();

        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(log.len(), 2);
        let merged = log.get("c1").unwrap();
        assert_eq!(merged.state, DeliveryState::Confirmed);
        assert!(merged.server_assigned);
        assert_eq!(merged.timestamp, at(50));
        assert_eq!(texts(&log), ["old", "hello"]);
    }

    #[test]
    fn echo_replayed_after_merge_is_unchanged() {
        let mut log = ConversationLog::new();
        log.seed(Vec::new()).unwrap();
        log.apply(pending_msg("a", "b", "hello", 100, "c1")).unwrap();

        let mut echo = server_msg("a", "b", "hello", 50);
        echo.client_id = Some("c1".to_string());
        log.apply(echo.clone()).unwrap();
        assert_eq!(log.apply(echo).unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn history_row_matches_echo_without_correlation_id() {
        let mut log = ConversationLog::new();
        log.seed(vec![server_msg("a", "b", "hi", 10)]).unwrap();

        // The same record arrives over the live channel, this time
        // carrying the correlation id the history row lacked.
        let mut echo = server_msg("a", "b", "hi", 10);
        echo.client_id = Some("c9".to_string());
        assert_eq!(log.apply(echo).unwrap(), ApplyOutcome::Updated);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get("c9").unwrap().text, "hi");
    }

    #[test]
    fn live_message_interleaves_between_history_rows() {
        let mut log = ConversationLog::new();
        log.seed(vec![
            server_msg("a", "b", "t1", 10),
            server_msg("b", "a", "t3", 30),
        ])
        .unwrap();

        log.apply(server_msg("a", "b", "t2", 20)).unwrap();
        assert_eq!(texts(&log), ["t1", "t2", "t3"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut log = ConversationLog::new();
        log.seed(Vec::new()).unwrap();

        log.apply(server_msg("a", "b", "first-arrived", 10)).unwrap();
        log.apply(server_msg("b", "a", "second-arrived", 10)).unwrap();
        assert_eq!(texts(&log), ["first-arrived", "second-arrived"]);
    }

    #[test]
    fn failed_send_can_go_pending_again() {
        let mut log = ConversationLog::new();
        log.seed(Vec::new()).unwrap();
        log.apply(pending_msg("a", "b", "hello", 100, "c1")).unwrap();

        assert!(log.mark_failed("c1"));
        assert_eq!(log.get("c1").unwrap().state, DeliveryState::Failed);

        assert!(log.mark_pending("c1"));
        assert_eq!(log.get("c1").unwrap().state, DeliveryState::Pending);
    }

    #[test]
    fn confirmed_state_is_sticky() {
        let mut log = ConversationLog::new();
        log.seed(Vec::new()).unwrap();
        log.apply(pending_msg("a", "b", "hello", 100, "c1")).unwrap();

        let mut echo = server_msg("a", "b", "hello", 50);
        echo.client_id = Some("c1".to_string());
        log.apply(echo).unwrap();

        assert!(!log.mark_failed("c1"));
        assert!(!log.mark_pending("c1"));
        assert_eq!(log.get("c1").unwrap().state, DeliveryState::Confirmed);
    }

    #[test]
    fn marking_unknown_correlation_id_is_a_noop() {
        let mut log = ConversationLog::new();
        log.seed(Vec::new()).unwrap();
        assert!(!log.mark_failed("missing"));
        assert!(!log.mark_pending("missing"));
    }
}
