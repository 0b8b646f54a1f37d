//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::auth::initialize_gmail_hub;
use crate::client::{ClientFactory, GmailConnector, MODIFY_SCOPE};
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::label_manager::list_labels;
use crate::poller::PollSettings;
use crate::server::{self, LoopSupervisor};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "gmail-autoreply")]
#[command(version = "0.1.0")]
#[command(about = "Automatic canned replies for new Gmail messages", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "autoreply.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 client configuration file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to the stored credential
    #[arg(long, default_value = "token.json")]
    pub token_cache: PathBuf,

    /// Path to the replied-message ledger
    #[arg(long, default_value = ".gmail-autoreply/replied.json")]
    pub ledger: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if a credential is stored
        #[arg(long)]
        force: bool,
    },

    /// Print all labels in the account
    Labels,

    /// List labels, then wait for HTTP triggers to start the poll loop
    Serve,

    /// Start the poll loop immediately, without the HTTP endpoint
    Run,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "autoreply.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the authorization flow and confirm access with a profile lookup
pub async fn authenticate(cli: &Cli, force: bool) -> Result<()> {
    if force && cli.token_cache.exists() {
        tokio::fs::remove_file(&cli.token_cache).await?;
        info!("Removed stored credential");
    }

    let hub = initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;

    println!("Successfully authenticated with Gmail API");
    println!("Credential stored at: {:?}", cli.token_cache);

    let (_, profile) = hub
        .users()
        .get_profile("me")
        .add_scope(MODIFY_SCOPE)
        .doit()
        .await?;
    println!(
        "Connected to account: {}",
        profile.email_address.unwrap_or_default()
    );
    Ok(())
}

/// One-shot label listing to stdout
pub async fn print_labels(factory: &dyn ClientFactory) -> Result<usize> {
    let client = factory.connect().await?;
    let mut out = Vec::new();
    let count = list_labels(client.as_ref(), &mut out).await?;
    print!("{}", String::from_utf8_lossy(&out));
    Ok(count)
}

fn supervisor(
    cli: &Cli,
    config: &Config,
    connector: Arc<GmailConnector>,
) -> Result<LoopSupervisor> {
    Ok(LoopSupervisor::new(
        connector,
        PollSettings::from_config(config)?,
        Some(cli.ledger.clone()),
    ))
}

/// Wait for the loop to wind down after a shutdown request
async fn finish(supervisor: &LoopSupervisor) -> Result<()> {
    match tokio::time::timeout(SHUTDOWN_GRACE, supervisor.join()).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Poll loop did not stop within {:?}, exiting", SHUTDOWN_GRACE);
            Ok(())
        }
    }
}

/// Startup label listing plus the HTTP trigger endpoint
pub async fn serve(cli: &Cli, config: &Config) -> Result<()> {
    let connector = Arc::new(GmailConnector::new(&cli.credentials, &cli.token_cache));
    let supervisor = Arc::new(supervisor(cli, config, Arc::clone(&connector))?);

    // Diagnostic only; the trigger endpoint does not wait for it
    let diagnostic = Arc::clone(&connector);
    tokio::spawn(async move {
        if let Err(e) = print_labels(diagnostic.as_ref()).await {
            error!("Label listing failed: {}", e);
        }
    });

    let router = server::routes(Arc::clone(&supervisor), config.server.success_body.clone());
    let stopping = Arc::clone(&supervisor);
    server::serve(&config.server.bind, router, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Shutdown requested");
        stopping.shutdown();
    })
    .await?;

    supervisor.shutdown();
    finish(&supervisor).await
}

/// Start the poll loop directly and run until Ctrl-C
pub async fn run(cli: &Cli, config: &Config) -> Result<()> {
    let connector = Arc::new(GmailConnector::new(&cli.credentials, &cli.token_cache));
    let supervisor = Arc::new(supervisor(cli, config, connector)?);
    supervisor.trigger().await?;

    let stopping = Arc::clone(&supervisor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            stopping.shutdown();
        }
    });

    // Returns on shutdown or on a fatal setup error
    let result = supervisor.join().await;
    let status = supervisor.status();
    info!(
        cycles = status.cycles_completed,
        replied = status.messages_replied,
        failed = status.messages_failed,
        "Poll loop finished"
    );
    result
}

/// Write the default configuration, refusing to clobber without `force`
pub async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(GmailError::ConfigError(format!(
            "{:?} already exists (use --force to overwrite)",
            output
        )));
    }
    Config::create_example(output).await?;
    println!("Created example configuration at {:?}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["gmail-autoreply", "serve"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("autoreply.toml"));
        assert_eq!(cli.credentials, PathBuf::from("credentials.json"));
        assert_eq!(cli.token_cache, PathBuf::from("token.json"));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn test_parse_auth_force() {
        let cli = Cli::try_parse_from(["gmail-autoreply", "-v", "auth", "--force"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Auth { force: true }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["gmail-autoreply"]).is_err());
    }

    #[tokio::test]
    async fn test_init_config_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autoreply.toml");

        init_config(&path, false).await.unwrap();
        assert!(Config::load(&path).await.is_ok());

        let err = init_config(&path, false).await.unwrap_err();
        assert!(matches!(err, GmailError::ConfigError(_)));

        init_config(&path, true).await.unwrap();
    }
}
