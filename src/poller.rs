//! Poll loop controller: find → reply → mark, one cycle at a time.
//!
//! Lifecycle: `Idle → Authorizing → LabelEnsuring → Polling`. `Polling`
//! repeats until shutdown is requested; a new cycle is scheduled only after
//! the previous one has finished, with a delay sampled uniformly from the
//! configured whole-second range. Per-message failures are logged and the
//! message skipped; a listing failure ends the cycle early.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{ClientFactory, GmailClient};
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::finder::MessageFinder;
use crate::label_manager::LabelManager;
use crate::marker::MarkerApplier;
use crate::models::MessageRef;
use crate::reply::AutoReplier;
use crate::state::ReplyLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Authorizing,
    LabelEnsuring,
    Polling,
    Stopped,
    Failed,
}

impl LoopPhase {
    /// Whether a loop in this phase is still alive
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LoopPhase::Authorizing | LoopPhase::LabelEnsuring | LoopPhase::Polling
        )
    }
}

/// Observable loop status
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub phase: LoopPhase,
    pub label_id: Option<String>,
    pub cycles_completed: u64,
    pub messages_replied: u64,
    pub messages_failed: u64,
    pub last_cycle_started: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            phase: LoopPhase::Idle,
            label_id: None,
            cycles_completed: 0,
            messages_replied: 0,
            messages_failed: 0,
            last_cycle_started: None,
            last_error: None,
        }
    }
}

pub type StatusSender = Arc<watch::Sender<LoopStatus>>;

/// Inclusive whole-second jitter range between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl PollInterval {
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self> {
        if min_secs == 0 || min_secs > max_secs {
            return Err(GmailError::ConfigError(format!(
                "Invalid poll interval {}..={} seconds",
                min_secs, max_secs
            )));
        }
        Ok(Self { min_secs, max_secs })
    }

    pub fn next_delay(&self) -> Duration {
        Duration::from_secs(rand::thread_rng().gen_range(self.min_secs..=self.max_secs))
    }

    pub fn contains(&self, delay: Duration) -> bool {
        delay >= Duration::from_secs(self.min_secs) && delay <= Duration::from_secs(self.max_secs)
    }
}

/// Everything the loop needs from configuration
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub marker_name: String,
    pub remove_label: String,
    pub query: String,
    pub from: String,
    pub body: String,
    pub interval: PollInterval,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            marker_name: config.labels.marker_name.clone(),
            remove_label: config.labels.remove_label.clone(),
            query: config.reply.query.clone(),
            from: config.reply.from.clone(),
            body: config.reply.body.clone(),
            interval: PollInterval::new(
                config.poll.min_interval_secs,
                config.poll.max_interval_secs,
            )?,
        })
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Replied { sent_id: String },
    /// Reply was already sent by an earlier cycle; only the marker was applied
    MarkedOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub replied: usize,
    pub marked_only: usize,
    pub failed: usize,
}

pub struct PollController {
    labels: LabelManager,
    finder: MessageFinder,
    replier: AutoReplier,
    marker: MarkerApplier,
    ledger: ReplyLedger,
    interval: PollInterval,
    status: StatusSender,
}

impl PollController {
    pub fn new(
        client: Arc<dyn GmailClient>,
        settings: &PollSettings,
        ledger: ReplyLedger,
        status: StatusSender,
    ) -> Self {
        Self {
            labels: LabelManager::new(Arc::clone(&client), settings.marker_name.clone()),
            finder: MessageFinder::new(Arc::clone(&client), settings.query.clone()),
            replier: AutoReplier::new(
                Arc::clone(&client),
                settings.from.clone(),
                settings.body.clone(),
            ),
            marker: MarkerApplier::new(client, settings.remove_label.clone()),
            ledger,
            interval: settings.interval,
            status,
        }
    }

    /// Authorize through the factory and build a controller on the result
    pub async fn connect(
        factory: &dyn ClientFactory,
        settings: &PollSettings,
        ledger: ReplyLedger,
        status: StatusSender,
    ) -> Result<Self> {
        status.send_modify(|s| s.phase = LoopPhase::Authorizing);
        info!("Authorizing Gmail access");
        let client = factory.connect().await?;
        Ok(Self::new(client, settings, ledger, status))
    }

    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub fn ledger(&self) -> &ReplyLedger {
        &self.ledger
    }

    /// One find → reply → mark pass over all current candidates
    ///
    /// Messages are handled strictly in listing order. Only a failure to
    /// resolve the label or list candidates fails the whole cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.status
            .send_modify(|s| s.last_cycle_started = Some(Utc::now()));

        let label_id = self.labels.ensure_marker_label().await?;
        let candidates = self.finder.find_candidates().await?;
        let mut report = CycleReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            debug!("No new messages");
        } else {
            info!(candidates = candidates.len(), "Processing new messages");
        }

        for message in &candidates {
            match self.process_message(message, &label_id).await {
                Ok(MessageOutcome::Replied { sent_id }) => {
                    report.replied += 1;
                    info!(message_id = %message.id, sent_id = %sent_id, "Replied and marked");
                }
                Ok(MessageOutcome::MarkedOnly) => {
                    report.marked_only += 1;
                    info!(message_id = %message.id, "Already replied, applied marker only");
                }
                Err(e) if e.is_message_scoped() => {
                    report.failed += 1;
                    warn!(message_id = %message.id, "Skipping message: {}", e);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        message_id = %message.id,
                        transient = e.is_transient(),
                        "Message failed: {}",
                        e
                    );
                }
            }
        }

        self.status.send_modify(|s| {
            s.cycles_completed += 1;
            s.messages_replied += report.replied as u64;
            s.messages_failed += report.failed as u64;
        });
        Ok(report)
    }

    /// Reply (unless the ledger says it was already sent), then mark
    pub async fn process_message(
        &mut self,
        message: &MessageRef,
        label_id: &str,
    ) -> Result<MessageOutcome> {
        let outcome = if self.ledger.contains(&message.id) {
            MessageOutcome::MarkedOnly
        } else {
            let sent_id = self.replier.reply(message).await?;
            if let Err(e) = self.ledger.record_reply(&message.id, &sent_id).await {
                warn!(message_id = %message.id, "Failed to persist reply ledger: {}", e);
            }
            MessageOutcome::Replied { sent_id }
        };

        self.marker.mark_processed(message, label_id).await?;

        if let Err(e) = self.ledger.clear(&message.id).await {
            warn!(message_id = %message.id, "Failed to persist reply ledger: {}", e);
        }
        Ok(outcome)
    }

    /// Resolve the marker label, then poll until `shutdown` flips to true
    ///
    /// The first cycle runs after one sampled delay. Failure to resolve the
    /// label is fatal; cycle failures are logged and the loop carries on.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.status.send_modify(|s| s.phase = LoopPhase::LabelEnsuring);
        let label_id = self.labels.ensure_marker_label().await?;
        info!(label_id = %label_id, "Marker label '{}' ready", self.labels.marker_name());

        self.status.send_modify(|s| {
            s.phase = LoopPhase::Polling;
            s.label_id = Some(label_id);
        });

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = self.interval.next_delay();
            debug!(delay_secs = delay.as_secs(), "Next cycle scheduled");

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.run_cycle().await {
                Ok(report) => debug!(
                    candidates = report.candidates,
                    replied = report.replied,
                    failed = report.failed,
                    "Cycle complete"
                ),
                Err(e) => {
                    error!("Poll cycle failed: {}", e);
                    let message = e.to_string();
                    self.status.send_modify(|s| s.last_error = Some(message));
                }
            }
        }

        info!("Poll loop stopped");
        self.status.send_modify(|s| s.phase = LoopPhase::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LabelInfo, MockGmailClient};
    use crate::models::{Header, MessageHeaders};

    fn settings() -> PollSettings {
        PollSettings::from_config(&Config::default()).unwrap()
    }

    fn status() -> StatusSender {
        Arc::new(watch::channel(LoopStatus::default()).0)
    }

    fn metadata(id: &str, from: &str) -> MessageHeaders {
        MessageHeaders {
            id: id.to_string(),
            thread_id: Some(format!("t_{}", id)),
            headers: vec![
                Header {
                    name: "Subject".to_string(),
                    value: "Hello".to_string(),
                },
                Header {
                    name: "From".to_string(),
                    value: from.to_string(),
                },
            ],
            label_ids: vec!["INBOX".to_string()],
        }
    }

    #[test]
    fn test_interval_validation() {
        assert!(PollInterval::new(5, 10).is_ok());
        assert!(PollInterval::new(7, 7).is_ok());
        assert!(PollInterval::new(0, 10).is_err());
        assert!(PollInterval::new(11, 10).is_err());
    }

    #[test]
    fn test_next_delay_within_bounds() {
        let interval = PollInterval::new(5, 10).unwrap();
        for _ in 0..200 {
            let delay = interval.next_delay();
            assert!(interval.contains(delay), "{:?} out of range", delay);
            assert_eq!(delay.subsec_nanos(), 0);
        }
    }

    #[test]
    fn test_phase_activity() {
        assert!(!LoopPhase::Idle.is_active());
        assert!(LoopPhase::Authorizing.is_active());
        assert!(LoopPhase::Polling.is_active());
        assert!(!LoopPhase::Stopped.is_active());
        assert!(!LoopPhase::Failed.is_active());
    }

    #[test]
    fn test_status_serializes_snake_case_phase() {
        let json = serde_json::to_value(LoopStatus::default()).unwrap();
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["cycles_completed"], 0);

        let json = serde_json::to_value(LoopPhase::LabelEnsuring).unwrap();
        assert_eq!(json, "label_ensuring");
    }

    #[tokio::test]
    async fn test_cycle_skips_malformed_and_continues() {
        let mut mock = MockGmailClient::new();
        mock.expect_create_label()
            .times(1)
            .returning(|_| Ok("Label_1".to_string()));
        mock.expect_list_messages().times(1).returning(|_| {
            Ok(vec![
                MessageRef::new("bad"),
                MessageRef::new("good"),
            ])
        });
        mock.expect_get_message_metadata().returning(|id| {
            if id == "bad" {
                Ok(metadata(id, "no-brackets@example.com"))
            } else {
                Ok(metadata(id, "Jane <jane@example.com>"))
            }
        });
        mock.expect_send_message()
            .times(1)
            .returning(|_| Ok("sent_good".to_string()));
        mock.expect_modify_labels()
            .withf(|id, _, _| id == "good")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let status = status();
        let mut controller = PollController::new(
            Arc::new(mock),
            &settings(),
            ReplyLedger::in_memory(),
            Arc::clone(&status),
        );
        let report = controller.run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                candidates: 2,
                replied: 1,
                marked_only: 0,
                failed: 1,
            }
        );
        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.cycles_completed, 1);
        assert_eq!(snapshot.messages_replied, 1);
        assert_eq!(snapshot.messages_failed, 1);
        assert!(controller.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle() {
        let mut mock = MockGmailClient::new();
        mock.expect_create_label()
            .returning(|_| Ok("Label_1".to_string()));
        mock.expect_list_messages()
            .returning(|_| Err(GmailError::NetworkError("timed out".to_string())));
        mock.expect_send_message().times(0);

        let mut controller =
            PollController::new(Arc::new(mock), &settings(), ReplyLedger::in_memory(), status());
        assert!(controller.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_ledger_hit_marks_without_second_reply() {
        let mut mock = MockGmailClient::new();
        mock.expect_get_message_metadata().times(0);
        mock.expect_send_message().times(0);
        mock.expect_modify_labels()
            .withf(|id, add, remove| {
                id == "m1" && add == ["Label_1".to_string()] && remove == ["INBOX".to_string()]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut ledger = ReplyLedger::in_memory();
        ledger.record_reply("m1", "sent_earlier").await.unwrap();

        let mut controller = PollController::new(Arc::new(mock), &settings(), ledger, status());
        let outcome = controller
            .process_message(&MessageRef::new("m1"), "Label_1")
            .await
            .unwrap();

        assert_eq!(outcome, MessageOutcome::MarkedOnly);
        assert!(!controller.ledger().contains("m1"));
    }

    #[tokio::test]
    async fn test_failed_mark_keeps_ledger_entry() {
        let mut mock = MockGmailClient::new();
        mock.expect_get_message_metadata()
            .returning(|id| Ok(metadata(id, "Jane <jane@example.com>")));
        mock.expect_send_message()
            .times(1)
            .returning(|_| Ok("sent_1".to_string()));
        mock.expect_modify_labels()
            .returning(|_, _, _| Err(GmailError::ServerError {
                status: 503,
                message: "backend".to_string(),
            }));

        let mut controller =
            PollController::new(Arc::new(mock), &settings(), ReplyLedger::in_memory(), status());
        let result = controller
            .process_message(&MessageRef::new("m1"), "Label_1")
            .await;

        assert!(result.is_err());
        assert!(controller.ledger().contains("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let mut mock = MockGmailClient::new();
        mock.expect_create_label()
            .times(1)
            .returning(|_| Err(GmailError::Conflict("exists".to_string())));
        mock.expect_list_labels().times(1).returning(|| {
            Ok(vec![LabelInfo {
                id: "Label_9".to_string(),
                name: "PENDING".to_string(),
            }])
        });
        mock.expect_list_messages().returning(|_| Ok(vec![]));

        let status = status();
        let controller = PollController::new(
            Arc::new(mock),
            &settings(),
            ReplyLedger::in_memory(),
            Arc::clone(&status),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.phase, LoopPhase::Stopped);
        assert_eq!(snapshot.label_id.as_deref(), Some("Label_9"));
        assert!(snapshot.cycles_completed >= 3);
    }

    #[tokio::test]
    async fn test_fatal_label_error_aborts_run() {
        let mut mock = MockGmailClient::new();
        mock.expect_create_label()
            .returning(|_| Err(GmailError::Forbidden("scope".to_string())));
        mock.expect_list_messages().times(0);

        let status = status();
        let controller = PollController::new(
            Arc::new(mock),
            &settings(),
            ReplyLedger::in_memory(),
            Arc::clone(&status),
        );
        let (_tx, rx) = watch::channel(false);

        let result = controller.run(rx).await;
        assert!(matches!(result, Err(GmailError::Forbidden(_))));
        assert_eq!(status.borrow().phase, LoopPhase::LabelEnsuring);
    }
}
