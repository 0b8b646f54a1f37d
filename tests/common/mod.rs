//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use gmail_autoreply::client::{
    ClientFactory, GmailClient, LabelInfo, NewLabel, OutgoingMessage,
};
use gmail_autoreply::config::Config;
use gmail_autoreply::error::{GmailError, Result};
use gmail_autoreply::models::{Header, MessageHeaders, MessageRef};
use gmail_autoreply::poller::PollSettings;
use mockall::mock;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const SYSTEM_LABELS: &[&str] = &["INBOX", "SENT", "UNREAD", "CHAT", "SPAM", "TRASH"];

/// One message stored in the fake mailbox
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub thread_id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub label_ids: Vec<String>,
    pub from_me: bool,
}

impl StoredMessage {
    pub fn is_chat(&self) -> bool {
        self.label_ids.iter().any(|l| l == "CHAT")
    }

    pub fn has_user_label(&self) -> bool {
        self.label_ids
            .iter()
            .any(|l| !SYSTEM_LABELS.contains(&l.as_str()))
    }
}

/// Inbound message with a display-name From header
pub fn inbound(id: &str, from: &str, subject: &str) -> StoredMessage {
    StoredMessage {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
        from: Some(from.to_string()),
        subject: Some(subject.to_string()),
        label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
        from_me: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    ListLabels,
    CreateLabel(String),
    ListMessages,
    GetMetadata(String),
    Send { thread_id: Option<String> },
    Modify(String),
}

/// A recorded API call with its start and completion times
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub started: Instant,
    pub finished: Instant,
}

/// A reply accepted by the fake send endpoint
#[derive(Debug, Clone)]
pub struct SentReply {
    pub id: String,
    pub thread_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: BTreeMap<String, StoredMessage>,
    user_labels: Vec<LabelInfo>,
    sent: Vec<SentReply>,
    calls: Vec<Call>,
    list_failures: usize,
    modify_failures: usize,
    next_id: usize,
}

/// In-memory Gmail account that evaluates the candidate query itself
#[derive(Debug, Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    latency: Duration,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long (use with paused time)
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn add_message(&self, message: StoredMessage) {
        let mut state = self.state.lock().unwrap();
        state.messages.insert(message.id.clone(), message);
    }

    pub fn add_user_label(&self, id: &str, name: &str) {
        self.state.lock().unwrap().user_labels.push(LabelInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    /// Fail the next `count` list calls with a network error
    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().unwrap().list_failures = count;
    }

    /// Fail the next `count` modify calls with a server error
    pub fn fail_next_modifies(&self, count: usize) {
        self.state.lock().unwrap().modify_failures = count;
    }

    pub fn message(&self, id: &str) -> Option<StoredMessage> {
        self.state.lock().unwrap().messages.get(id).cloned()
    }

    pub fn sent(&self) -> Vec<SentReply> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn user_labels(&self) -> Vec<LabelInfo> {
        self.state.lock().unwrap().user_labels.clone()
    }

    async fn begin(&self) -> Instant {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        started
    }

    fn record(&self, kind: CallKind, started: Instant) {
        self.state.lock().unwrap().calls.push(Call {
            kind,
            started,
            finished: Instant::now(),
        });
    }
}

/// Evaluate the negative search terms the finder uses
pub fn matches_query(query: &str, message: &StoredMessage) -> Result<bool> {
    let mut include = true;
    for term in query.split_whitespace() {
        include &= match term {
            "-in:chat" => !message.is_chat(),
            "-from:me" => !message.from_me,
            "-has:userlabels" => !message.has_user_label(),
            other => {
                return Err(GmailError::BadRequest(format!(
                    "unsupported search term {}",
                    other
                )))
            }
        };
    }
    Ok(include)
}

#[async_trait]
impl GmailClient for FakeMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let started = self.begin().await;
        let mut labels: Vec<LabelInfo> = SYSTEM_LABELS
            .iter()
            .map(|l| LabelInfo {
                id: l.to_string(),
                name: l.to_string(),
            })
            .collect();
        labels.extend(self.user_labels());
        self.record(CallKind::ListLabels, started);
        Ok(labels)
    }

    async fn create_label(&self, label: &NewLabel) -> Result<String> {
        let started = self.begin().await;
        let result = {
            let mut state = self.state.lock().unwrap();
            let lower = label.name.to_lowercase();
            if state
                .user_labels
                .iter()
                .any(|l| l.name.to_lowercase() == lower)
            {
                Err(GmailError::Conflict("Label name exists or conflicts".to_string()))
            } else {
                state.next_id += 1;
                let id = format!("Label_{}", state.next_id);
                state.user_labels.push(LabelInfo {
                    id: id.clone(),
                    name: label.name.clone(),
                });
                Ok(id)
            }
        };
        self.record(CallKind::CreateLabel(label.name.clone()), started);
        result
    }

    async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>> {
        let started = self.begin().await;
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.list_failures > 0 {
                state.list_failures -= 1;
                Err(GmailError::NetworkError("connection reset".to_string()))
            } else {
                let mut refs = Vec::new();
                for message in state.messages.values() {
                    if matches_query(query, message)? {
                        refs.push(MessageRef::with_thread(
                            message.id.clone(),
                            message.thread_id.clone(),
                        ));
                    }
                }
                Ok(refs)
            }
        };
        self.record(CallKind::ListMessages, started);
        result
    }

    async fn get_message_metadata(&self, id: &str) -> Result<MessageHeaders> {
        let started = self.begin().await;
        let result = {
            let state = self.state.lock().unwrap();
            state
                .messages
                .get(id)
                .map(|m| {
                    let mut headers = Vec::new();
                    if let Some(subject) = &m.subject {
                        headers.push(Header {
                            name: "Subject".to_string(),
                            value: subject.clone(),
                        });
                    }
                    if let Some(from) = &m.from {
                        headers.push(Header {
                            name: "From".to_string(),
                            value: from.clone(),
                        });
                    }
                    MessageHeaders {
                        id: m.id.clone(),
                        thread_id: Some(m.thread_id.clone()),
                        headers,
                        label_ids: m.label_ids.clone(),
                    }
                })
                .ok_or_else(|| GmailError::NotFound(id.to_string()))
        };
        self.record(CallKind::GetMetadata(id.to_string()), started);
        result
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        let started = self.begin().await;
        let result = URL_SAFE_NO_PAD
            .decode(&message.raw)
            .map_err(|e| GmailError::BadRequest(format!("invalid raw payload: {}", e)))
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| GmailError::BadRequest(format!("invalid raw payload: {}", e)))
            })
            .map(|text| {
                let mut state = self.state.lock().unwrap();
                state.next_id += 1;
                let id = format!("sent_{}", state.next_id);
                state.sent.push(SentReply {
                    id: id.clone(),
                    thread_id: message.thread_id.clone(),
                    text,
                });
                // Sent copies live in the mailbox too and must never be candidates
                state.messages.insert(
                    id.clone(),
                    StoredMessage {
                        id: id.clone(),
                        thread_id: message.thread_id.clone().unwrap_or_else(|| id.clone()),
                        from: Some("me".to_string()),
                        subject: None,
                        label_ids: vec!["SENT".to_string()],
                        from_me: true,
                    },
                );
                id
            });
        self.record(
            CallKind::Send {
                thread_id: message.thread_id.clone(),
            },
            started,
        );
        result
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let started = self.begin().await;
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.modify_failures > 0 {
                state.modify_failures -= 1;
                Err(GmailError::ServerError {
                    status: 503,
                    message: "backend unavailable".to_string(),
                })
            } else {
                let known = |id: &String| {
                    SYSTEM_LABELS.contains(&id.as_str())
                        || state.user_labels.iter().any(|l| &l.id == id)
                };
                if let Some(unknown) = add_label_ids.iter().find(|id| !known(*id)) {
                    Err(GmailError::BadRequest(format!("Invalid label: {}", unknown)))
                } else {
                    match state.messages.get_mut(message_id) {
                        Some(message) => {
                            message.label_ids.retain(|l| !remove_label_ids.contains(l));
                            for id in add_label_ids {
                                if !message.label_ids.contains(id) {
                                    message.label_ids.push(id.clone());
                                }
                            }
                            Ok(())
                        }
                        None => Err(GmailError::NotFound(message_id.to_string())),
                    }
                }
            }
        };
        self.record(CallKind::Modify(message_id.to_string()), started);
        result
    }
}

/// Factory handing out a shared fake mailbox
pub struct FakeFactory(pub Arc<FakeMailbox>);

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(&self) -> Result<Arc<dyn GmailClient>> {
        Ok(Arc::clone(&self.0) as Arc<dyn GmailClient>)
    }
}

pub fn default_settings() -> PollSettings {
    PollSettings::from_config(&Config::default()).unwrap()
}

pub fn metadata(id: &str, from: &str, subject: &str) -> MessageHeaders {
    MessageHeaders {
        id: id.to_string(),
        thread_id: Some(format!("thread_{}", id)),
        headers: vec![
            Header {
                name: "Subject".to_string(),
                value: subject.to_string(),
            },
            Header {
                name: "From".to_string(),
                value: from.to_string(),
            },
        ],
        label_ids: vec!["INBOX".to_string()],
    }
}

// Mock implementation of GmailClient for call-order expectations
mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, label: &NewLabel) -> Result<String>;
        async fn list_messages(&self, query: &str) -> Result<Vec<MessageRef>>;
        async fn get_message_metadata(&self, id: &str) -> Result<MessageHeaders>;
        async fn send_message(&self, message: &OutgoingMessage) -> Result<String>;
        async fn modify_labels(
            &self,
            message_id: &str,
            add_label_ids: &[String],
            remove_label_ids: &[String],
        ) -> Result<()>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_predicate() {
        let query = gmail_autoreply::finder::CANDIDATE_QUERY;
        let mut message = inbound("m1", "A <a@example.com>", "Hi");
        assert!(matches_query(query, &message).unwrap());

        message.label_ids.push("Label_3".to_string());
        assert!(!matches_query(query, &message).unwrap());

        let mut chat = inbound("m2", "A <a@example.com>", "Hi");
        chat.label_ids.push("CHAT".to_string());
        assert!(!matches_query(query, &chat).unwrap());

        assert!(matches_query("label:foo", &chat).is_err());
    }
}
