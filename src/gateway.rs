use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::conversation::message::ConversationPage;
use crate::error::{ChatError, ChatResult};

/// Reply body as a lazy, finite sequence of raw chunks in transport order
pub type ByteStream = BoxStream<'static, ChatResult<Vec<u8>>>;

/// Network boundary of the conversation core.
///
/// Implementations hold no conversation state and never retry.
#[async_trait]
pub trait ConversationGateway: Send + Sync {
    /// Fetch one page of history, newest first. `cursor` is echoed verbatim
    /// from a previous page.
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ChatResult<ConversationPage>;

    /// Send a user message and return the assistant's reply as it streams in
    async fn send_message(&self, conversation_id: &str, text: &str) -> ChatResult<ByteStream>;
}

/// History request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest<'a> {
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

/// Send request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    conversation_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

/// HTTP gateway talking JSON for history and a raw chunked body for replies
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    history_url: String,
    send_url: String,
    request_timeout: Duration,
    visitor_email: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &Config) -> ChatResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ChatError::Config("base_url is not set".to_string()));
        }

        // No overall timeout on the client: it would cut long replies short.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            history_url: config.history_url(),
            send_url: config.send_url(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            visitor_email: config.visitor_email.clone(),
        })
    }

    pub fn history_url(&self) -> &str {
        &self.history_url
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }

    /// Turn a non-success response into a status error
    async fn reject(response: reqwest::Response) -> ChatError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ChatError::Status { status, body }
    }
}

#[async_trait]
impl ConversationGateway for HttpGateway {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ChatResult<ConversationPage> {
        let payload = HistoryRequest {
            conversation_id,
            cursor,
            limit: limit.max(1),
            email: self.visitor_email.as_deref(),
        };

        debug!(url = %self.history_url, conversation_id, ?cursor, limit, "fetching history page");

        let response = self
            .client
            .post(&self.history_url)
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::reject(response).await;
            warn!(error = %err, "history request rejected");
            return Err(err);
        }

        let body = response.bytes().await?;
        let page: ConversationPage = serde_json::from_slice(&body)?;

        debug!(
            messages = page.messages.len(),
            next_cursor = ?page.next_cursor,
            "history page received"
        );
        Ok(page)
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> ChatResult<ByteStream> {
        let payload = SendRequest {
            conversation_id,
            text,
            email: self.visitor_email.as_deref(),
        };

        debug!(url = %self.send_url, conversation_id, chars = text.chars().count(), "sending message");

        let response = self
            .client
            .post(&self.send_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::reject(response).await;
            warn!(error = %err, "send request rejected");
            return Err(err);
        }

        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            warn!(status = %response.status(), "send response has no body to stream");
            return Err(ChatError::StreamUnavailable);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from))
            .boxed();

        Ok(stream)
    }
}
