//! Marker label management
use crate::client::{GmailClient, LabelInfo, NewLabel};
use crate::error::{GmailError, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Ensures the marker label exists and caches its ID for the process lifetime
pub struct LabelManager {
    client: Arc<dyn GmailClient>,
    marker_name: String,
    marker_id: OnceCell<String>,
}

impl LabelManager {
    pub fn new(client: Arc<dyn GmailClient>, marker_name: impl Into<String>) -> Self {
        Self {
            client,
            marker_name: marker_name.into(),
            marker_id: OnceCell::new(),
        }
    }

    pub fn marker_name(&self) -> &str {
        &self.marker_name
    }

    /// Marker label ID, if it has been resolved
    pub fn cached_marker_id(&self) -> Option<&str> {
        self.marker_id.get().map(String::as_str)
    }

    /// Returns the marker label ID, creating the label on first use
    ///
    /// A 409 from creation means the label already exists (a previous run
    /// made it); the ID is then looked up by name. Any other failure is
    /// returned to the caller.
    pub async fn ensure_marker_label(&self) -> Result<String> {
        self.marker_id
            .get_or_try_init(|| self.create_or_lookup())
            .await
            .cloned()
    }

    async fn create_or_lookup(&self) -> Result<String> {
        info!("Creating marker label: {}", self.marker_name);

        match self
            .client
            .create_label(&NewLabel::visible(self.marker_name.clone()))
            .await
        {
            Ok(id) => {
                info!(
                    "Successfully created label '{}' with ID: {}",
                    self.marker_name, id
                );
                Ok(id)
            }
            Err(GmailError::Conflict(reason)) => {
                debug!(
                    "Label '{}' already exists ({}), looking it up",
                    self.marker_name, reason
                );
                let id = self.find_label_id(&self.marker_name).await?.ok_or_else(|| {
                    GmailError::LabelError(format!(
                        "Label '{}' reported as existing but not found in label list",
                        self.marker_name
                    ))
                })?;
                info!("Using existing label '{}' with ID: {}", self.marker_name, id);
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Find a label ID by name
    ///
    /// Exact match wins; otherwise falls back to a case-insensitive match,
    /// since Gmail treats label names case-insensitively for conflicts.
    pub async fn find_label_id(&self, name: &str) -> Result<Option<String>> {
        let labels = self.client.list_labels().await?;
        Ok(match_label(&labels, name).map(|l| l.id.clone()))
    }
}

fn match_label<'a>(labels: &'a [LabelInfo], name: &str) -> Option<&'a LabelInfo> {
    labels.iter().find(|l| l.name == name).or_else(|| {
        let lower = name.to_lowercase();
        labels.iter().find(|l| l.name.to_lowercase() == lower)
    })
}

/// Write all labels as `- name:id` lines; returns the number listed
pub async fn list_labels<W: Write>(client: &dyn GmailClient, out: &mut W) -> Result<usize> {
    let labels = client.list_labels().await?;
    if labels.is_empty() {
        writeln!(out, "No labels found.")?;
        return Ok(0);
    }
    writeln!(out, "Labels:")?;
    for label in &labels {
        writeln!(out, "- {}:{}", label.name, label.id)?;
    }
    Ok(labels.len())
}
