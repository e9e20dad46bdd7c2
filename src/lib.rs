//! Conversation core of an embeddable chat widget: paged history, optimistic
//! sends and streamed assistant replies against an HTTP chat backend.

pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod gateway;
pub mod streaming;

pub use config::{Config, SessionConfig};
pub use conversation::{ConversationStore, LoadOutcome, Message, MessageId, SubmitOutcome};
pub use error::{ChatError, ChatResult, ErrorKind};
pub use events::{ConversationEvent, Notification, NotificationLevel};
pub use gateway::{ByteStream, ConversationGateway, HttpGateway};
