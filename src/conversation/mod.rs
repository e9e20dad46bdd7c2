//! Conversation state: messages, paging, reply streaming and the session store

pub mod commands;
pub mod history;
pub mod manager;
pub mod message;
pub mod streaming;

pub use commands::{get_help_text, parse_slash_command, ParsedCommand, SlashCommand};
pub use history::{apply_page, ConversationState, FetchStatus, PendingSend, SendStatus};
pub use manager::{ConversationStore, LoadOutcome, SubmitOutcome};
pub use message::{ConversationPage, Message, MessageId};
