//! Conversation state and the pagination reducer that merges fetched pages into it

use std::collections::HashSet;

use strum::{AsRefStr, Display};

use super::message::{ConversationPage, Message, MessageId};

/// Whether a send is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum SendStatus {
    #[default]
    Idle,
    Sending,
}

/// Whether a history page is being fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum FetchStatus {
    #[default]
    Idle,
    FetchingPage,
}

/// What a failed send has to undo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// Id of the optimistically inserted user message
    pub message_id: MessageId,
    /// Input text as it was when the send started
    pub input: String,
}

/// Canonical state of one conversation session, newest message first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub(crate) messages: Vec<Message>,
    pub(crate) cursor: Option<String>,
    pub(crate) send_status: SendStatus,
    pub(crate) fetch_status: FetchStatus,
    pub(crate) pending_rollback: Option<PendingSend>,
    pub(crate) input: String,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// True while the last page pointed at older history
    pub fn has_more(&self) -> bool {
        self.cursor.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn send_status(&self) -> SendStatus {
        self.send_status
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.fetch_status
    }

    pub fn pending_rollback(&self) -> Option<&PendingSend> {
        self.pending_rollback.as_ref()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| m.id() == id)
    }

    /// Remove a message by id, returning it if it was present
    pub(crate) fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id() == id)?;
        Some(self.messages.remove(index))
    }
}

/// Merge a fetched page into the state.
///
/// The first page replaces the list outright. Later pages hold older messages
/// and go to the tail. Messages whose id is already present are skipped so
/// overlapping pages never duplicate an entry. The cursor always follows the
/// page, including sparse pages that carry no messages. Returns how many
/// messages were added.
pub fn apply_page(state: &mut ConversationState, page: ConversationPage, is_first_page: bool) -> usize {
    let ConversationPage {
        messages,
        next_cursor,
    } = page;

    let mut seen: HashSet<MessageId> = if is_first_page {
        HashSet::with_capacity(messages.len())
    } else {
        state.messages.iter().map(|m| m.id().clone()).collect()
    };

    let fresh: Vec<Message> = messages
        .into_iter()
        .filter(|m| seen.insert(m.id().clone()))
        .collect();
    let added = fresh.len();

    if is_first_page {
        state.messages = fresh;
    } else {
        state.messages.extend(fresh);
    }
    state.cursor = next_cursor;

    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn msg(id: &str, minutes: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Message::new(id, format!("text {}", id), minutes % 2 == 0, base + Duration::minutes(minutes))
    }

    fn page(ids: &[(&str, i64)], cursor: Option<&str>) -> ConversationPage {
        ConversationPage::new(
            ids.iter().map(|(id, m)| msg(id, *m)).collect(),
            cursor.map(str::to_string),
        )
    }

    fn ids(state: &ConversationState) -> Vec<&str> {
        state.messages().iter().map(|m| m.id().as_str()).collect()
    }

    #[test]
    fn first_page_replaces_existing_messages() {
        let mut state = ConversationState::new();
        apply_page(&mut state, page(&[("old", 1)], Some("c1")), true);

        let added = apply_page(&mut state, page(&[("b", 3), ("a", 2)], None), true);

        assert_eq!(added, 2);
        assert_eq!(ids(&state), vec!["b", "a"]);
        assert!(!state.has_more());
        assert_eq!(state.cursor(), None);
    }

    #[test]
    fn older_pages_append_to_the_tail() {
        let mut state = ConversationState::new();
        apply_page(&mut state, page(&[("d", 4), ("c", 3)], Some("c1")), true);
        apply_page(&mut state, page(&[("b", 2), ("a", 1)], Some("c2")), false);

        assert_eq!(ids(&state), vec!["d", "c", "b", "a"]);
        assert_eq!(state.cursor(), Some("c2"));
        assert!(state.has_more());
    }

    #[test]
    fn sparse_page_still_advances_cursor() {
        let mut state = ConversationState::new();
        apply_page(&mut state, page(&[("b", 2)], Some("c1")), true);

        let added = apply_page(&mut state, page(&[], Some("abc")), false);

        assert_eq!(added, 0);
        assert_eq!(state.cursor(), Some("abc"));
        assert!(state.has_more());
        assert_eq!(ids(&state), vec!["b"]);
    }

    #[test]
    fn empty_first_page_with_cursor_has_more() {
        let mut state = ConversationState::new();
        apply_page(&mut state, page(&[], Some("abc")), true);
        assert!(state.has_more());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn reapplying_first_page_is_idempotent() {
        let first = page(&[("b", 2), ("a", 1)], Some("c1"));

        let mut once = ConversationState::new();
        apply_page(&mut once, first.clone(), true);

        let mut twice = ConversationState::new();
        apply_page(&mut twice, first.clone(), true);
        apply_page(&mut twice, first, true);

        assert_eq!(once, twice);
    }

    #[test]
    fn overlapping_older_page_skips_known_ids() {
        let mut state = ConversationState::new();
        apply_page(&mut state, page(&[("c", 3), ("b", 2)], Some("c1")), true);

        let added = apply_page(&mut state, page(&[("b", 2), ("a", 1)], None), false);

        assert_eq!(added, 1);
        assert_eq!(ids(&state), vec!["c", "b", "a"]);
    }

    #[test]
    fn status_names_match_wire_vocabulary() {
        assert_eq!(SendStatus::Sending.to_string(), "sending");
        assert_eq!(FetchStatus::FetchingPage.as_ref(), "fetchingPage");
        assert_eq!(FetchStatus::default(), FetchStatus::Idle);
    }
}
