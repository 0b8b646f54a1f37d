//! Marks a message as processed
use crate::client::GmailClient;
use crate::error::Result;
use crate::models::MessageRef;
use std::sync::Arc;
use tracing::debug;

/// Adds the marker label and removes the inbox label in one modify call
pub struct MarkerApplier {
    client: Arc<dyn GmailClient>,
    remove_label_id: String,
}

impl MarkerApplier {
    pub fn new(client: Arc<dyn GmailClient>, remove_label_id: impl Into<String>) -> Self {
        Self {
            client,
            remove_label_id: remove_label_id.into(),
        }
    }

    pub async fn mark_processed(&self, message: &MessageRef, marker_label_id: &str) -> Result<()> {
        self.client
            .modify_labels(
                &message.id,
                &[marker_label_id.to_string()],
                &[self.remove_label_id.clone()],
            )
            .await?;
        debug!(message_id = %message.id, label_id = marker_label_id, "Applied marker label");
        Ok(())
    }
}
