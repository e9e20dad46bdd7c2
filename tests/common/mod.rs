#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;

use chatbox::conversation::ConversationPage;
use chatbox::{
    ByteStream, ChatError, ChatResult, ConversationEvent, ConversationGateway, ConversationStore,
    Message, SessionConfig,
};

pub enum PageScript {
    Ready(ChatResult<ConversationPage>),
    Deferred(oneshot::Receiver<ChatResult<ConversationPage>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub conversation_id: String,
    pub cursor: Option<String>,
    pub limit: u32,
}

/// Gateway that replays queued responses and records every call
#[derive(Default)]
pub struct ScriptedGateway {
    pages: Mutex<VecDeque<PageScript>>,
    replies: Mutex<VecDeque<ChatResult<ByteStream>>>,
    fetches: Mutex<Vec<FetchCall>>,
    sends: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, page: ConversationPage) {
        self.pages.lock().unwrap().push_back(PageScript::Ready(Ok(page)));
    }

    pub fn push_page_error(&self, err: ChatError) {
        self.pages.lock().unwrap().push_back(PageScript::Ready(Err(err)));
    }

    /// Queue a page that resolves only when the returned sender fires
    pub fn defer_page(&self) -> oneshot::Sender<ChatResult<ConversationPage>> {
        let (tx, rx) = oneshot::channel();
        self.pages.lock().unwrap().push_back(PageScript::Deferred(rx));
        tx
    }

    /// Queue a reply that streams the given chunks and ends
    pub fn push_reply(&self, chunks: &[&str]) {
        let chunks: Vec<ChatResult<Vec<u8>>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(futures::stream::iter(chunks).boxed()));
    }

    pub fn push_reply_error(&self, err: ChatError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    /// Queue a reply whose chunks are fed by the test
    pub fn live_reply(&self) -> mpsc::UnboundedSender<ChatResult<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded();
        self.replies.lock().unwrap().push_back(Ok(rx.boxed()));
        tx
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<String> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationGateway for ScriptedGateway {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ChatResult<ConversationPage> {
        self.fetches.lock().unwrap().push(FetchCall {
            conversation_id: conversation_id.to_string(),
            cursor: cursor.map(str::to_string),
            limit,
        });

        let script = self.pages.lock().unwrap().pop_front();
        match script {
            Some(PageScript::Ready(result)) => result,
            Some(PageScript::Deferred(rx)) => rx.await.unwrap_or_else(|_| {
                Err(ChatError::Status {
                    status: 499,
                    body: "deferred page dropped".to_string(),
                })
            }),
            None => Err(ChatError::Status {
                status: 404,
                body: "no scripted page".to_string(),
            }),
        }
    }

    async fn send_message(&self, _conversation_id: &str, text: &str) -> ChatResult<ByteStream> {
        self.sends.lock().unwrap().push(text.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ChatError::StreamUnavailable))
    }
}

pub fn server_message(id: &str, text: &str, is_user: bool, minute: u32) -> Message {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
    Message::new(id, text, is_user, at)
}

/// Page of assistant messages with the given ids, newest first
pub fn page(ids: &[&str], cursor: Option<&str>) -> ConversationPage {
    let messages = ids
        .iter()
        .enumerate()
        .map(|(i, id)| server_message(id, &format!("text {}", id), false, i as u32))
        .collect();
    ConversationPage::new(messages, cursor.map(str::to_string))
}

pub fn store_for(
    gateway: &Arc<ScriptedGateway>,
) -> (ConversationStore, UnboundedReceiver<ConversationEvent>) {
    ConversationStore::new(SessionConfig::new("bot-1"), gateway.clone())
}

/// Wait for events until `done` holds for the store
pub async fn wait_until(
    store: &ConversationStore,
    events: &mut UnboundedReceiver<ConversationEvent>,
    mut done: impl FnMut(&ConversationStore) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(store) {
            events.recv().await.expect("event channel closed");
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn notifications(events: &mut UnboundedReceiver<ConversationEvent>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ConversationEvent::Notify(n) = event {
            out.push(n.message);
        }
    }
    out
}

pub fn texts(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.text()).collect()
}
