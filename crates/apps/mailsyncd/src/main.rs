//! mailsyncd - mailbox sync daemon and admin CLI
//!
//! Runs the HTTP trigger endpoint, or a single sync from the command line.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use mailsync::{
    AccountRegistry, Contact, GmailClient, MailboxAccount, MessageStore, OAuthClient, SqliteStore,
    SyncConfig, SyncEngine, SyncOptions, SyncServer, TokenStore,
};

#[derive(Parser)]
#[command(name = "mailsyncd")]
#[command(about = "Mirror connected Gmail mailboxes into a local store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/mailsync/mailsync.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve POST /sync/{accountId}
    Serve {
        /// Listen address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one sync for an account and print the summary
    Sync {
        account_id: i64,
    },

    /// Register a connected mailbox
    AddAccount {
        #[arg(long)]
        org: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Seconds until the access token expires
        #[arg(long, default_value_t = 0)]
        expires_in: i64,
    },

    /// Add a contact that synced messages can be matched to
    AddContact {
        #[arg(long)]
        org: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// List registered accounts
    Accounts,

    /// Show an account's sync state and most recent messages
    Status {
        account_id: i64,
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.config.is_none()
        && let Err(e) = config::init()
    {
        warn!("Failed to initialize config directory: {}", e);
    }

    let cfg = SyncConfig::load(cli.config.as_deref())?;
    let store = Arc::new(open_store(&cfg)?);

    match cli.command {
        Commands::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| cfg.bind_addr.clone());
            let engine = Arc::new(build_engine(&cfg, store));
            SyncServer::bind(&addr, engine)?.serve()
        }
        Commands::Sync { account_id } => {
            let engine = build_engine(&cfg, store);
            let summary = engine.sync_account(account_id, None)?;
            print_json(&summary)
        }
        Commands::AddAccount {
            org,
            email,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let account = store.insert_account(MailboxAccount::new(
                org,
                email,
                access_token,
                refresh_token,
                Utc::now() + Duration::seconds(expires_in),
            ))?;
            info!("Added account {} ({})", account.id, account.email);
            print_json(&account_json(&account))
        }
        Commands::AddContact { org, email, name } => {
            let contact = store.insert_contact(Contact::new(0, org, email, name))?;
            print_json(&contact)
        }
        Commands::Accounts => {
            let accounts: Vec<_> = store.list_accounts()?.iter().map(account_json).collect();
            print_json(&accounts)
        }
        Commands::Status { account_id, recent } => {
            let account = store
                .get_account(account_id)?
                .with_context(|| format!("Account {} not found", account_id))?;
            let messages = store.list_messages(account_id, recent)?;
            print_json(&json!({
                "account": account_json(&account),
                "message_count": store.count_messages(account_id)?,
                "recent": messages,
            }))
        }
    }
}

fn open_store(cfg: &SyncConfig) -> Result<SqliteStore> {
    let path = cfg.resolved_db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!("Using database {}", path.display());
    SqliteStore::open(&path)
}

fn build_engine(cfg: &SyncConfig, store: Arc<SqliteStore>) -> SyncEngine {
    if !cfg.has_client_credentials() {
        warn!("No OAuth client credentials configured; expired tokens cannot be refreshed");
    }

    let provider = Arc::new(GmailClient::new(cfg.api_base_url.clone(), cfg.http_timeout()));
    let refresher = Arc::new(OAuthClient::new(
        cfg.client_id.clone(),
        cfg.client_secret.clone(),
        cfg.token_url.clone(),
        cfg.http_timeout(),
    ));
    SyncEngine::with_store(store, provider, refresher, SyncOptions::from(cfg))
}

/// Account view without credentials
fn account_json(account: &MailboxAccount) -> serde_json::Value {
    json!({
        "id": account.id,
        "organization_id": account.organization_id,
        "email": account.email,
        "status": account.status.as_str(),
        "has_refresh_token": account.refresh_token.is_some(),
        "token_expires_at": account.token_expires_at.to_rfc3339(),
        "history_id": account.history_id,
        "last_synced_at": account.last_synced_at.map(|t| t.to_rfc3339()),
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
