//! Gmail Auto-Reply Service
//!
//! Polls a Gmail mailbox on a jittered timer and answers every new inbound
//! message once with a canned reply, tagging it with a marker label so it is
//! never answered twice.
//!
//! # Overview
//!
//! - **Authentication**: stored refresh credential or interactive OAuth2 consent
//! - **Label Management**: marker label created once, looked up on conflict
//! - **Finding**: search for non-chat, non-self, unlabelled messages
//! - **Replying**: RFC 2822 reply sent into the original thread
//! - **Marking**: marker label added, inbox label removed
//! - **Polling**: serialized cycles with a per-process supervisor and HTTP trigger
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_autoreply::{client::GmailConnector, config::Config, poller::PollSettings};
//! use gmail_autoreply::server::LoopSupervisor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("autoreply.toml".as_ref()).await?;
//!     let connector = Arc::new(GmailConnector::new("credentials.json", "token.json"));
//!
//!     let supervisor = LoopSupervisor::new(connector, PollSettings::from_config(&config)?, None);
//!     supervisor.trigger().await?;
//!     supervisor.join().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - Stored credential handling and Gmail hub initialization
//! - [`client`] - `GmailClient` trait and the `google-gmail1` implementation
//! - [`cli`] - Command-line interface and command handlers
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`finder`] - Candidate message lookup
//! - [`label_manager`] - Marker label creation and label listing
//! - [`marker`] - Marker label application
//! - [`models`] - Core data structures
//! - [`poller`] - Poll loop controller
//! - [`reply`] - Reply composition and submission
//! - [`server`] - HTTP trigger and loop supervisor
//! - [`state`] - Persisted replied-message ledger

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod finder;
pub mod label_manager;
pub mod marker;
pub mod models;
pub mod poller;
pub mod reply;
pub mod server;
pub mod state;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{Header, MessageHeaders, MessageRef, ReplyDraft};

// Config types
pub use config::{Config, LabelConfig, PollConfig, ReplyConfig, ServerConfig};

// Client traits
pub use client::{ClientFactory, GmailClient, GmailConnector, ProductionGmailClient};

// Pipeline stages
pub use finder::MessageFinder;
pub use label_manager::LabelManager;
pub use marker::MarkerApplier;
pub use reply::AutoReplier;

// Loop control
pub use poller::{LoopPhase, LoopStatus, PollController, PollInterval, PollSettings};
pub use server::LoopSupervisor;
pub use state::ReplyLedger;
