//! Unreplied-message lookup
use crate::client::GmailClient;
use crate::error::Result;
use crate::models::MessageRef;
use std::sync::Arc;
use tracing::debug;

/// Inbound, non-chat messages not sent by the owner and carrying no user label
pub const CANDIDATE_QUERY: &str = "-in:chat -from:me -has:userlabels";

/// Lists candidate messages; full content is fetched later by the replier
pub struct MessageFinder {
    client: Arc<dyn GmailClient>,
    query: String,
}

impl MessageFinder {
    pub fn new(client: Arc<dyn GmailClient>, query: impl Into<String>) -> Self {
        Self {
            client,
            query: query.into(),
        }
    }

    /// Candidate references; empty when nothing matches
    pub async fn find_candidates(&self) -> Result<Vec<MessageRef>> {
        let candidates = self.client.list_messages(&self.query).await?;
        debug!(query = %self.query, candidates = candidates.len(), "Listed candidates");
        Ok(candidates)
    }
}
