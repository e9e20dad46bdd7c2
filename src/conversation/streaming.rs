//! Writes the in-progress assistant reply into the newest-first message list.

use chrono::{DateTime, Utc};

use super::message::{Message, MessageId};

/// The message currently carrying the streaming id, if any.
pub fn streaming_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().find(|m| m.is_streaming())
}

/// Replace the streaming reply's text with `text`, creating the reply at the
/// head of the list if it does not exist yet. Returns true when the message
/// was created by this call.
pub fn upsert_streaming_message(messages: &mut Vec<Message>, text: &str, now: DateTime<Utc>) -> bool {
    if let Some(reply) = messages.iter_mut().find(|m| m.is_streaming()) {
        reply.replace_text(text);
        return false;
    }

    messages.insert(0, Message::streaming(text, now));
    true
}

/// Give a leftover streaming reply a fresh local id so a new stream starts
/// from a clean slate. Returns the new id when a message was re-keyed.
pub fn retire_streaming_message(messages: &mut [Message]) -> Option<MessageId> {
    let reply = messages.iter_mut().find(|m| m.is_streaming())?;
    let id = MessageId::generate();
    reply.rekey(id.clone());
    Some(id)
}

/// Drop the streaming reply from the list, if present.
pub fn discard_streaming_message(messages: &mut Vec<Message>) -> bool {
    let before = messages.len();
    messages.retain(|m| !m.is_streaming());
    messages.len() != before
}
