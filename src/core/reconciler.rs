//! Display list reconciliation
//!
//! Merges three message sources into one ordered, duplicate-free list for the
//! active conversation:
//! 1. bulk history fetches (`replace`)
//! 2. optimistic entries typed by the user (`append_local`)
//! 3. rows delivered by the change listener (`append_remote`)
//!
//! The list is never re-sorted: history order comes first, then appends in
//! the order they were applied.

use std::collections::HashSet;

use crate::conversation::{Message, MessageId, Role, SessionId};

#[derive(Debug)]
pub struct Reconciler {
    active: SessionId,
    /// Set by `switch_to` until the next history fetch is applied
    switched: bool,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    pending: bool,
    loading_history: bool,
    scroll_requests: usize,
}

impl Reconciler {
    pub fn new(active: SessionId) -> Self {
        Self {
            active,
            switched: false,
            messages: Vec::new(),
            seen: HashSet::new(),
            pending: false,
            loading_history: true,
            scroll_requests: 0,
        }
    }

    pub fn active(&self) -> &SessionId {
        &self.active
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_loading_history(&self) -> bool {
        self.loading_history
    }

    /// Total scroll-to-bottom triggers not yet consumed by the view
    pub fn scroll_requests(&self) -> usize {
        self.scroll_requests
    }

    /// Consume outstanding scroll triggers. The view scrolls once no matter
    /// how many triggers piled up since the last frame.
    pub fn take_scroll_request(&mut self) -> bool {
        let requested = self.scroll_requests() > 0;
        self.scroll_requests = 0;
        requested
    }

    /// Make `session_id` the active conversation.
    ///
    /// Clears the list and the pending flag. The caller is expected to fetch
    /// history and re-subscribe for the new id.
    pub fn switch_to(&mut self, session_id: SessionId) {
        self.active = session_id;
        self.switched = true;
        self.messages.clear();
        self.seen.clear();
        self.pending = false;
        self.loading_history = true;
    }

    /// Apply a completed history fetch.
    ///
    /// Returns `false` and leaves the list untouched when the fetch belongs
    /// to a conversation that is no longer active.
    pub fn replace(&mut self, session_id: &SessionId, messages: Vec<Message>) -> bool {
        if *session_id != self.active {
            tracing::debug!(
                stale = %session_id,
                active = %self.active,
                "Discarding history for inactive conversation"
            );
            return false;
        }

        let switched = std::mem::take(&mut self.switched);

        self.messages.clear();
        self.seen.clear();
        for message in messages {
            if self.seen.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }

        if switched || self.messages.is_empty() {
            self.scroll_requests += 1;
        }
        self.loading_history = false;
        true
    }

    /// Optimistically append an entry the user just submitted
    pub fn append_local(&mut self, message: Message) {
        self.seen.insert(message.id.clone());
        self.messages.push(message);
        self.scroll_requests += 1;
    }

    /// Append a row delivered by the change listener.
    ///
    /// Only `ai` rows for the active conversation are accepted, and only once
    /// per id. Returns whether the row was appended.
    pub fn append_remote(&mut self, message: Message) -> bool {
        if message.session_id != self.active {
            return false;
        }

        match message.role() {
            Role::Human => false,
            Role::Ai => {
                if !self.seen.insert(message.id.clone()) {
                    tracing::debug!(id = %message.id, "Ignoring redelivered message");
                    return false;
                }
                self.messages.push(message);
                self.scroll_requests += 1;
                self.pending = false;
                true
            }
        }
    }

    /// Mark a send as outstanding. Returns `false` if one already is.
    pub fn begin_send(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    /// The webhook rejected the send; the optimistic entry stays in place.
    pub fn dispatch_failed(&mut self) {
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MessageBody;

    fn session(id: &str) -> SessionId {
        SessionId::new(id)
    }

    fn msg(id: &str, session_id: &str, role: Role, content: &str) -> Message {
        Message {
            id: MessageId::new(id),
            session_id: session(session_id),
            message: MessageBody {
                content: content.to_string(),
                role,
            },
        }
    }

    fn ids(reconciler: &Reconciler) -> Vec<&str> {
        reconciler.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_redelivery_appends_once() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![]);

        assert!(r.append_remote(msg("x", "a", Role::Ai, "one")));
        for _ in 0..5 {
            assert!(!r.append_remote(msg("x", "a", Role::Ai, "one")));
        }

        assert_eq!(ids(&r), vec!["x"]);
    }

    #[test]
    fn test_remote_human_is_discarded() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![msg("1", "a", Role::Ai, "hello")]);
        let before = r.messages().to_vec();
        r.take_scroll_request();

        assert!(!r.append_remote(msg("2", "a", Role::Human, "typed elsewhere")));
        assert_eq!(r.messages(), before.as_slice());
        assert_eq!(r.scroll_requests(), 0);
    }

    #[test]
    fn test_remote_for_other_conversation_is_discarded() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![]);
        assert!(!r.append_remote(msg("x", "b", Role::Ai, "wrong room")));
        assert!(r.messages().is_empty());
    }

    #[test]
    fn test_empty_replace_then_local_triggers_twice() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![]);
        r.append_local(Message::human(session("a"), "Hello"));

        assert_eq!(r.messages().len(), 1);
        assert_eq!(r.scroll_requests(), 2);
    }

    #[test]
    fn test_empty_replace_then_local_scrolls_once_per_frame() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![]);
        r.append_local(Message::human(session("a"), "Hello"));

        assert!(r.take_scroll_request());
        assert!(!r.take_scroll_request());
    }

    #[test]
    fn test_same_conversation_refresh_does_not_scroll() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![msg("1", "a", Role::Human, "hi")]);
        assert_eq!(r.scroll_requests(), 0);

        r.replace(
            &session("a"),
            vec![msg("1", "a", Role::Human, "hi"), msg("2", "a", Role::Ai, "yo")],
        );
        assert_eq!(r.scroll_requests(), 0);
        assert_eq!(ids(&r), vec!["1", "2"]);
    }

    #[test]
    fn test_switch_scrolls_on_load() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![msg("1", "a", Role::Human, "hi")]);

        r.switch_to(session("b"));
        assert!(r.is_loading_history());
        r.replace(&session("b"), vec![msg("7", "b", Role::Human, "other")]);

        assert_eq!(r.scroll_requests(), 1);
        assert!(!r.is_loading_history());
    }

    #[test]
    fn test_switch_away_and_back_scrolls_on_load() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![msg("1", "a", Role::Human, "hi")]);
        assert_eq!(r.scroll_requests(), 0);

        // b's history never arrives before switching back
        r.switch_to(session("b"));
        r.switch_to(session("a"));
        r.replace(&session("a"), vec![msg("1", "a", Role::Human, "hi")]);

        assert_eq!(r.scroll_requests(), 1);

        r.take_scroll_request();
        r.replace(&session("a"), vec![msg("1", "a", Role::Human, "hi")]);
        assert_eq!(r.scroll_requests(), 0);
    }

    #[test]
    fn test_stale_history_is_discarded() {
        let mut r = Reconciler::new(session("a"));
        r.switch_to(session("b"));
        r.replace(&session("b"), vec![msg("7", "b", Role::Human, "current")]);

        let applied = r.replace(&session("a"), vec![msg("1", "a", Role::Human, "late")]);

        assert!(!applied);
        assert_eq!(r.active(), &session("b"));
        assert_eq!(ids(&r), vec!["7"]);
    }

    #[test]
    fn test_replace_drops_duplicate_ids() {
        let mut r = Reconciler::new(session("a"));
        r.replace(
            &session("a"),
            vec![
                msg("1", "a", Role::Human, "q"),
                msg("2", "a", Role::Ai, "answer"),
                msg("2", "a", Role::Ai, "answer"),
            ],
        );
        assert_eq!(ids(&r), vec!["1", "2"]);
    }

    #[test]
    fn test_pending_flag_lifecycle() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![]);

        assert!(r.begin_send());
        assert!(!r.begin_send());
        assert!(r.is_pending());

        r.append_remote(msg("h", "a", Role::Human, "echo"));
        assert!(r.is_pending());

        r.append_remote(msg("x", "a", Role::Ai, "reply"));
        assert!(!r.is_pending());
    }

    #[test]
    fn test_dispatch_failure_keeps_optimistic_entry() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![]);
        r.begin_send();
        r.append_local(Message::human(session("a"), "Hello"));

        r.dispatch_failed();

        assert!(!r.is_pending());
        assert_eq!(r.messages().len(), 1);
        assert_eq!(r.messages()[0].content(), "Hello");
    }

    #[test]
    fn test_switch_clears_list_and_pending() {
        let mut r = Reconciler::new(session("a"));
        r.replace(&session("a"), vec![msg("1", "a", Role::Ai, "x")]);
        r.begin_send();

        r.switch_to(session("b"));

        assert!(r.messages().is_empty());
        assert!(!r.is_pending());
        // ids from the old conversation must not block new deliveries
        r.replace(&session("b"), vec![]);
        assert!(r.append_remote(msg("1", "b", Role::Ai, "fresh")));
    }
}
