//! Canned auto-reply composition and submission

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::sync::Arc;
use tracing::debug;

use crate::client::{GmailClient, OutgoingMessage};
use crate::error::{GmailError, Result};
use crate::models::{MessageHeaders, MessageRef, ReplyDraft};

const REPLY_PREFIX: &str = "Re:";

/// Address inside the angle brackets of a From header
///
/// Groups are tried from the end and the first one holding an address wins,
/// so brackets in display names or trailing comments are skipped. A bare
/// address without brackets is rejected.
pub fn extract_address(message_id: &str, from: &str) -> Result<String> {
    let malformed = || GmailError::MalformedHeader {
        message_id: message_id.to_string(),
        header: "From".to_string(),
        value: from.to_string(),
    };

    from.match_indices('<')
        .rev()
        .find_map(|(start, _)| {
            let rest = &from[start + 1..];
            let address = rest[..rest.find('>')?].trim();
            (!address.is_empty() && address.contains('@')).then(|| address.to_string())
        })
        .ok_or_else(malformed)
}

/// Prefix with "Re:" unless already present (case-sensitive)
pub fn reply_subject(subject: &str) -> String {
    if subject.starts_with(REPLY_PREFIX) {
        subject.to_string()
    } else {
        format!("{} {}", REPLY_PREFIX, subject)
    }
}

/// Keep header values on one line
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Build the reply for a message from its metadata
///
/// A missing Subject is treated as empty; a missing From is an error.
pub fn compose_reply(headers: &MessageHeaders, from: &str, body: &str) -> Result<ReplyDraft> {
    let sender = headers
        .get("From")
        .ok_or_else(|| GmailError::MissingHeader {
            message_id: headers.id.clone(),
            header: "From".to_string(),
        })?;
    let recipient = extract_address(&headers.id, sender)?;
    let subject = reply_subject(headers.get("Subject").unwrap_or_default());

    Ok(ReplyDraft {
        from: from.to_string(),
        recipient,
        subject,
        in_reply_to: headers.id.clone(),
        thread_id: headers.thread_id.clone(),
        body: body.to_string(),
    })
}

impl ReplyDraft {
    /// RFC 2822 text with CRLF line endings
    pub fn to_rfc2822(&self) -> String {
        let lines = [
            format!("From: {}", single_line(&self.from)),
            format!("To: {}", single_line(&self.recipient)),
            format!("Subject: {}", single_line(&self.subject)),
            format!("In-Reply-To: {}", single_line(&self.in_reply_to)),
            format!("References: {}", single_line(&self.in_reply_to)),
            String::new(),
            self.body.replace("\r\n", "\n").replace('\n', "\r\n"),
        ];
        lines.join("\r\n")
    }

    /// Base64url (no padding) form accepted by the send endpoint
    pub fn encode(&self) -> OutgoingMessage {
        OutgoingMessage {
            raw: URL_SAFE_NO_PAD.encode(self.to_rfc2822().as_bytes()),
            thread_id: self.thread_id.clone(),
        }
    }
}

/// Sends the canned reply for one message
pub struct AutoReplier {
    client: Arc<dyn GmailClient>,
    from: String,
    body: String,
}

impl AutoReplier {
    pub fn new(
        client: Arc<dyn GmailClient>,
        from: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            client,
            from: from.into(),
            body: body.into(),
        }
    }

    /// Fetch metadata, compose and send; returns the sent message ID
    pub async fn reply(&self, message: &MessageRef) -> Result<String> {
        let mut headers = self.client.get_message_metadata(&message.id).await?;
        if headers.thread_id.is_none() {
            headers.thread_id = message.thread_id.clone();
        }

        let draft = compose_reply(&headers, &self.from, &self.body)?;
        debug!(
            message_id = %message.id,
            recipient = %draft.recipient,
            subject = %draft.subject,
            "Sending auto-reply"
        );

        self.client.send_message(&draft.encode()).await
    }
}
