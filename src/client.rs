//! Gmail API client seam

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use google_gmail1::api::{Label, ModifyMessageRequest};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::models::{Header, MessageHeaders, MessageRef};

pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
pub const SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// Headers requested when fetching message metadata
pub const METADATA_HEADERS: &[&str] = &["Subject", "From"];

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Label creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLabel {
    pub name: String,
    /// `labelShow`, `labelShowIfUnread` or `labelHide`
    pub label_list_visibility: String,
    /// `show` or `hide`
    pub message_list_visibility: String,
}

impl NewLabel {
    /// Label visible in both the label list and the message list
    pub fn visible(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label_list_visibility: "labelShow".to_string(),
            message_list_visibility: "show".to_string(),
        }
    }
}

/// Message ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// RFC 2822 message, base64url encoded without padding
    pub raw: String,
    pub thread_id: Option<String>,
}

/// Gmail operations used by the auto-reply loop
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its ID
    async fn create_label(&self, label: &NewLabel) -> Result<String>;

    /// List all messages matching a query
    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>>;

    /// Fetch metadata (Subject and From headers, label set) for one message
    async fn get_message_metadata(&self, id: &str) -> Result<MessageHeaders>;

    /// Submit a raw message, returning the sent message ID
    async fn send_message(&self, message: &OutgoingMessage) -> Result<String>;

    /// Add and remove labels on a single message
    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;
}

/// Gmail client over the `google-gmail1` hub
///
/// No retries: a failed call surfaces to the poll loop, which logs it and
/// waits for the next cycle.
pub struct ProductionGmailClient {
    hub: GmailHub,
    timeout: Duration,
}

impl ProductionGmailClient {
    pub fn new(hub: GmailHub) -> Self {
        Self {
            hub,
            timeout: Duration::from_secs(30),
        }
    }

    /// Bound an API call so a hung connection cannot stall the loop forever
    async fn with_timeout<T, Fut>(&self, operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation_name, self.timeout);
                Err(GmailError::NetworkError(format!(
                    "{} timed out after {:?}",
                    operation_name, self.timeout
                )))
            }
        }
    }
}

/// Convert a Gmail API message into header metadata
fn parse_message_headers(msg: google_gmail1::api::Message) -> Result<MessageHeaders> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| match (h.name, h.value) {
            (Some(name), Some(value)) => Some(Header { name, value }),
            _ => None,
        })
        .collect();

    Ok(MessageHeaders {
        id,
        thread_id: msg.thread_id,
        headers,
        label_ids: msg.label_ids.unwrap_or_default(),
    })
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.with_timeout("list_labels", async {
            debug!("Calling Gmail API to list labels...");
            let (_, response) = self
                .hub
                .users()
                .labels_list("me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok::<_, GmailError>(labels)
        })
        .await
    }

    async fn create_label(&self, label: &NewLabel) -> Result<String> {
        self.with_timeout("create_label", async {
            let request = Label {
                name: Some(label.name.clone()),
                label_list_visibility: Some(label.label_list_visibility.clone()),
                message_list_visibility: Some(label.message_list_visibility.clone()),
                ..Default::default()
            };

            let (_, created_label) = self
                .hub
                .users()
                .labels_create(request, "me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            created_label
                .id
                .ok_or_else(|| GmailError::LabelError("Created label has no ID".to_string()))
        })
        .await
    }

    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(100);

            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let (_, response) = self
                .with_timeout("list_messages", async {
                    Ok::<_, GmailError>(call.add_scope(MODIFY_SCOPE).doit().await?)
                })
                .await?;

            all.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| {
                        m.id.map(|id| MessageRef {
                            id,
                            thread_id: m.thread_id,
                        })
                    }),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(all)
    }

    async fn get_message_metadata(&self, id: &str) -> Result<MessageHeaders> {
        self.with_timeout("get_message_metadata", async {
            let mut call = self.hub.users().messages_get("me", id).format("metadata");
            for header in METADATA_HEADERS {
                call = call.add_metadata_headers(header);
            }
            let (_, msg) = call.add_scope(MODIFY_SCOPE).doit().await?;
            parse_message_headers(msg)
        })
        .await
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        // The media endpoint takes the RFC 2822 bytes, not the base64url form
        let bytes = URL_SAFE_NO_PAD.decode(&message.raw).map_err(|e| {
            GmailError::InvalidMessageFormat(format!("Raw message is not base64url: {}", e))
        })?;
        let rfc822: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| GmailError::InvalidMessageFormat(format!("Bad MIME type: {}", e)))?;

        self.with_timeout("send_message", async {
            let request = google_gmail1::api::Message {
                thread_id: message.thread_id.clone(),
                ..Default::default()
            };

            let (_, sent) = self
                .hub
                .users()
                .messages_send(request, "me")
                .add_scope(SEND_SCOPE)
                .upload(Cursor::new(bytes), rfc822)
                .await?;

            sent.id
                .ok_or_else(|| GmailError::ApiError("Sent message has no ID".to_string()))
        })
        .await
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.with_timeout("modify_labels", async {
            let modify_request = ModifyMessageRequest {
                add_label_ids: non_empty(add_label_ids),
                remove_label_ids: non_empty(remove_label_ids),
            };

            self.hub
                .users()
                .messages_modify(modify_request, "me", message_id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            Ok::<_, GmailError>(())
        })
        .await
    }
}

/// Produces an authorized client; called when the poll loop enters `Authorizing`
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn GmailClient>>;
}

/// Production factory backed by the credential provider
///
/// The client is built once and shared by every caller, so the startup label
/// listing and the poll loop run on the same credential.
pub struct GmailConnector {
    credentials_path: PathBuf,
    token_path: PathBuf,
    client: OnceCell<Arc<dyn GmailClient>>,
}

impl GmailConnector {
    pub fn new(credentials_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            token_path: token_path.into(),
            client: OnceCell::new(),
        }
    }
}

#[async_trait]
impl ClientFactory for GmailConnector {
    async fn connect(&self) -> Result<Arc<dyn GmailClient>> {
        self.client
            .get_or_try_init(|| async {
                let hub =
                    crate::auth::initialize_gmail_hub(&self.credentials_path, &self.token_path)
                        .await?;
                let client: Arc<dyn GmailClient> = Arc::new(ProductionGmailClient::new(hub));
                Ok::<_, GmailError>(client)
            })
            .await
            .cloned()
    }
}
