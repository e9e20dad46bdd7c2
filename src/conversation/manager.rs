use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ChatError, ErrorKind};
use crate::events::{ConversationEvent, Notification};
use crate::gateway::{ByteStream, ConversationGateway};
use crate::streaming::StreamIngestor;

use super::history::{apply_page, ConversationState, FetchStatus, PendingSend, SendStatus};
use super::message::Message;
use super::streaming::{
    discard_streaming_message, retire_streaming_message, streaming_message,
    upsert_streaming_message,
};

/// Notification shown when a send fails
pub const SEND_FAILED: &str = "Failed to send message";

/// Notification shown when a history page cannot be fetched
pub const FETCH_FAILED: &str = "Error fetching messages";

/// How a submit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank text, or a send was already in flight
    Skipped,
    /// Reply streamed in and history was reloaded
    Delivered,
    /// Send failed; optimistic message removed and input restored
    RolledBack,
    /// Session closed before the send finished
    Abandoned,
}

/// How a page load ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A fetch was already running, or there is no older history
    Skipped,
    /// Page applied
    Applied { added: usize },
    /// Fetch failed; state left as it was
    Failed,
    /// Session closed before the page arrived
    Abandoned,
}

/// Shared state of one conversation session
struct Session {
    config: SessionConfig,
    gateway: Arc<dyn ConversationGateway>,
    state: Mutex<ConversationState>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    closed: watch::Sender<bool>,
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    fn is_live(&self) -> bool {
        !*self.closed.borrow()
    }
}

/// Result of a gated mutation
enum Step<T> {
    Proceed(T),
    Skip,
    Gone,
}

/// Handle held by in-flight operations.
///
/// It never keeps the session alive across I/O: every mutation re-checks that
/// the originating session still exists and has not been closed.
#[derive(Clone)]
struct SessionRef {
    session: Weak<Session>,
    closed: watch::Receiver<bool>,
}

impl SessionRef {
    fn new(session: &Arc<Session>) -> Self {
        Self {
            session: Arc::downgrade(session),
            closed: session.closed.subscribe(),
        }
    }

    fn upgrade(&self) -> Option<Arc<Session>> {
        self.session.upgrade().filter(|s| s.is_live())
    }

    fn resources(&self) -> Option<(Arc<dyn ConversationGateway>, SessionConfig)> {
        let session = self.upgrade()?;
        Some((session.gateway.clone(), session.config.clone()))
    }

    /// Mutate only if `f` accepts; emits `Changed` when it does
    fn begin<T>(&self, f: impl FnOnce(&mut ConversationState) -> Option<T>) -> Step<T> {
        let Some(session) = self.upgrade() else {
            return Step::Gone;
        };
        let out = {
            let mut state = session.lock();
            f(&mut state)
        };
        match out {
            Some(value) => {
                session.emit(ConversationEvent::Changed);
                Step::Proceed(value)
            }
            None => Step::Skip,
        }
    }

    /// Apply one atomic mutation if the session is still live
    fn update<R>(&self, f: impl FnOnce(&mut ConversationState) -> R) -> Option<R> {
        let session = self.upgrade()?;
        let out = {
            let mut state = session.lock();
            f(&mut state)
        };
        session.emit(ConversationEvent::Changed);
        Some(out)
    }

    fn notify(&self, notification: Notification) {
        if let Some(session) = self.upgrade() {
            session.emit(ConversationEvent::Notify(notification));
        }
    }

    /// Await `fut` unless the session is closed or dropped first
    async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        let mut closed = self.closed.clone();
        if *closed.borrow() {
            return None;
        }
        tokio::select! {
            out = fut => Some(out),
            _ = closed.changed() => None,
        }
    }
}

/// Undo an optimistic send.
///
/// Removes the optimistic user message and any partial reply, restores the
/// input text saved when the send started and returns the store to idle.
pub fn rollback(
    mut state: ConversationState,
    snapshot: &PendingSend,
    error: &ChatError,
) -> (ConversationState, Notification) {
    state.remove(&snapshot.message_id);
    discard_streaming_message(&mut state.messages);
    state.input = snapshot.input.clone();
    state.pending_rollback = None;
    state.send_status = SendStatus::Idle;

    let notification = match error.kind() {
        ErrorKind::StreamUnavailable => {
            Notification::error(format!("{SEND_FAILED}: no reply was received"))
        }
        ErrorKind::Network | ErrorKind::Validation => Notification::error(SEND_FAILED),
    };

    (state, notification)
}

/// Read model for consumers: a thinking placeholder while waiting for the
/// first reply chunk, followed by the canonical messages
pub fn project_view(state: &ConversationState) -> Vec<Message> {
    let thinking = state.send_status == SendStatus::Sending
        && streaming_message(&state.messages).is_none();

    let mut view = Vec::with_capacity(state.messages.len() + usize::from(thinking));
    if thinking {
        view.push(Message::thinking());
    }
    view.extend(state.messages.iter().cloned());
    view
}

enum ReplyEnd {
    Completed,
    Failed(ChatError),
    Abandoned,
}

async fn run_submit(session: SessionRef, text: String) -> SubmitOutcome {
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        debug!("ignoring blank submit");
        return SubmitOutcome::Skipped;
    }

    let begin = session.begin(|state| {
        if state.send_status != SendStatus::Idle {
            return None;
        }

        let message = Message::user(trimmed.clone());
        let pending = PendingSend {
            message_id: message.id().clone(),
            input: text.clone(),
        };
        state.messages.insert(0, message);
        state.pending_rollback = Some(pending.clone());
        state.input.clear();
        state.send_status = SendStatus::Sending;
        Some(pending)
    });

    let pending = match begin {
        Step::Proceed(pending) => pending,
        Step::Skip => {
            debug!("send already in flight, ignoring submit");
            return SubmitOutcome::Skipped;
        }
        Step::Gone => return SubmitOutcome::Abandoned,
    };

    let Some((gateway, config)) = session.resources() else {
        return SubmitOutcome::Abandoned;
    };

    info!(
        conversation_id = %config.conversation_id,
        message_id = %pending.message_id,
        "sending message"
    );

    let sent = session
        .guard(gateway.send_message(&config.conversation_id, &trimmed))
        .await;

    let end = match sent {
        None => ReplyEnd::Abandoned,
        Some(Ok(stream)) => ingest_reply(&session, stream).await,
        Some(Err(err)) => ReplyEnd::Failed(err),
    };

    match end {
        ReplyEnd::Completed => {
            // Swap the optimistic and streamed messages for server-assigned ones
            run_load_more(session.clone(), true).await;

            let finished = session.update(|state| {
                state.pending_rollback = None;
                state.send_status = SendStatus::Idle;
            });
            match finished {
                Some(()) => SubmitOutcome::Delivered,
                None => SubmitOutcome::Abandoned,
            }
        }
        ReplyEnd::Failed(err) => {
            warn!(error = %err, kind = %err.kind(), "send failed, rolling back");

            let notification = session.update(|state| {
                let (restored, notification) = rollback(std::mem::take(state), &pending, &err);
                *state = restored;
                notification
            });
            match notification {
                Some(notification) => {
                    session.notify(notification);
                    SubmitOutcome::RolledBack
                }
                None => SubmitOutcome::Abandoned,
            }
        }
        ReplyEnd::Abandoned => {
            debug!("session closed while sending, dropping reply");
            SubmitOutcome::Abandoned
        }
    }
}

/// Drive the reply stream into the streaming message, one chunk at a time
async fn ingest_reply(session: &SessionRef, mut stream: ByteStream) -> ReplyEnd {
    let mut ingestor = StreamIngestor::new();
    ingestor.begin();

    match session.begin(|state| retire_streaming_message(&mut state.messages)) {
        Step::Proceed(id) => debug!(%id, "re-keyed leftover streaming reply"),
        Step::Skip => {}
        Step::Gone => return ReplyEnd::Abandoned,
    }

    loop {
        let Some(next) = session.guard(stream.next()).await else {
            return ReplyEnd::Abandoned;
        };
        let Some(chunk) = next else {
            break;
        };

        match chunk {
            Ok(bytes) => {
                let Some(text) = ingestor.push_chunk(&bytes) else {
                    continue;
                };
                let applied = session.update(|state| {
                    upsert_streaming_message(&mut state.messages, text, Utc::now())
                });
                if applied.is_none() {
                    return ReplyEnd::Abandoned;
                }
            }
            Err(err) => {
                ingestor.fail();
                debug!(chunks = ingestor.chunk_count(), "reply stream broke");
                return ReplyEnd::Failed(err);
            }
        }
    }

    if let Some(text) = ingestor.finish() {
        let applied = session.update(|state| {
            upsert_streaming_message(&mut state.messages, text, Utc::now())
        });
        if applied.is_none() {
            return ReplyEnd::Abandoned;
        }
    }

    debug!(
        chunks = ingestor.chunk_count(),
        bytes = ingestor.byte_count(),
        "reply stream complete"
    );
    ReplyEnd::Completed
}

async fn run_load_more(session: SessionRef, reset: bool) -> LoadOutcome {
    let begin = session.begin(|state| {
        if state.fetch_status != FetchStatus::Idle {
            return None;
        }
        if !reset && !state.has_more() {
            return None;
        }
        state.fetch_status = FetchStatus::FetchingPage;
        Some(if reset { None } else { state.cursor.clone() })
    });

    let cursor = match begin {
        Step::Proceed(cursor) => cursor,
        Step::Skip => {
            debug!(reset, "page fetch skipped");
            return LoadOutcome::Skipped;
        }
        Step::Gone => return LoadOutcome::Abandoned,
    };

    let Some((gateway, config)) = session.resources() else {
        return LoadOutcome::Abandoned;
    };

    debug!(
        conversation_id = %config.conversation_id,
        cursor = ?cursor,
        reset,
        "loading history page"
    );

    let fetched = session
        .guard(gateway.fetch_page(&config.conversation_id, cursor.as_deref(), config.page_size))
        .await;

    match fetched {
        None => LoadOutcome::Abandoned,
        Some(Ok(page)) => {
            let applied = session.update(|state| {
                let added = apply_page(state, page, reset);
                state.fetch_status = FetchStatus::Idle;
                (added, state.has_more())
            });
            match applied {
                Some((added, has_more)) => {
                    info!(added, has_more, reset, "history page applied");
                    LoadOutcome::Applied { added }
                }
                None => LoadOutcome::Abandoned,
            }
        }
        Some(Err(err)) => {
            warn!(error = %err, reset, "failed to fetch history page");
            if session
                .update(|state| state.fetch_status = FetchStatus::Idle)
                .is_none()
            {
                return LoadOutcome::Abandoned;
            }
            session.notify(Notification::error(FETCH_FAILED));
            LoadOutcome::Failed
        }
    }
}

/// Owns the state of one conversation session.
///
/// Clones share the same session. Operations started on a handle keep running
/// after the handle is dropped, but stop touching state once the session is
/// closed or every handle is gone.
#[derive(Clone)]
pub struct ConversationStore {
    session: Arc<Session>,
}

impl ConversationStore {
    /// Create a session; the receiver yields change and notification events
    pub fn new(
        config: SessionConfig,
        gateway: Arc<dyn ConversationGateway>,
    ) -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let session = Arc::new(Session {
            config,
            gateway,
            state: Mutex::new(ConversationState::new()),
            events,
            closed,
        });

        (Self { session }, rx)
    }

    /// Create a session and load its first page of history
    pub async fn open(
        config: SessionConfig,
        gateway: Arc<dyn ConversationGateway>,
    ) -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let (store, rx) = Self::new(config, gateway);
        info!(conversation_id = %store.conversation_id(), "opening conversation");
        store.reload().await;
        (store, rx)
    }

    fn handle(&self) -> SessionRef {
        SessionRef::new(&self.session)
    }

    /// Send `text` as the user: optimistic insert, stream the reply, reconcile
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        run_submit(self.handle(), text.to_string()).await
    }

    /// Submit whatever is currently in the input buffer
    pub async fn submit_input(&self) -> SubmitOutcome {
        let text = self.input();
        self.submit(&text).await
    }

    /// Load the next page of older history
    pub async fn load_more(&self) -> LoadOutcome {
        run_load_more(self.handle(), false).await
    }

    /// Replace the history with a fresh first page
    pub async fn reload(&self) -> LoadOutcome {
        run_load_more(self.handle(), true).await
    }

    /// Run a submit in the background
    pub fn spawn_submit(&self, text: impl Into<String>) -> JoinHandle<SubmitOutcome> {
        tokio::spawn(run_submit(self.handle(), text.into()))
    }

    /// Run a page load in the background
    pub fn spawn_load_more(&self, reset: bool) -> JoinHandle<LoadOutcome> {
        tokio::spawn(run_load_more(self.handle(), reset))
    }

    /// Messages to display, newest first, including the thinking placeholder
    pub fn view(&self) -> Vec<Message> {
        project_view(&self.session.lock())
    }

    /// Canonical messages, newest first
    pub fn messages(&self) -> Vec<Message> {
        self.session.lock().messages.clone()
    }

    /// Copy of the full state
    pub fn snapshot(&self) -> ConversationState {
        self.session.lock().clone()
    }

    pub fn send_status(&self) -> SendStatus {
        self.session.lock().send_status
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.session.lock().fetch_status
    }

    pub fn has_more(&self) -> bool {
        self.session.lock().has_more()
    }

    pub fn input(&self) -> String {
        self.session.lock().input.clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.session.lock().input = text.into();
        self.session.emit(ConversationEvent::Changed);
    }

    pub fn conversation_id(&self) -> &str {
        &self.session.config.conversation_id
    }

    /// Tear the session down; in-flight operations stop applying results
    pub fn close(&self) {
        if !self.session.closed.send_replace(true) {
            info!(conversation_id = %self.conversation_id(), "conversation closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_live()
    }
}
