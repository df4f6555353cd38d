//! `beacon` command line: inspect and manage notifications over REST, or
//! follow them live over the push connection.
//!
//! ## Commands
//!
//! - `beacon list [--page N] [--size N]`
//! - `beacon unread`
//! - `beacon count`
//! - `beacon read <ID>`
//! - `beacon read-all`
//! - `beacon delete <ID>...`
//! - `beacon watch`

mod render;
mod watch_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use beacon_backend_client::HttpNotificationApi;
use beacon_backend_client::NotificationApi;
use beacon_core::BeaconConfig;
use beacon_core::ConfigLoader;
use beacon_core::Credentials;
use beacon_core::NotificationStore;
use clap::Parser;
use clap::Subcommand;

pub use render::render_record;

#[derive(Debug, Parser)]
#[command(name = "beacon", version, about = "Real-time notification client")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args)]
pub struct GlobalArgs {
    /// Bearer token for the notification API and push broker.
    #[arg(long, env = "BEACON_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// User whose notifications are listed.
    #[arg(long = "user", env = "BEACON_USER_ID", global = true)]
    pub user_id: Option<String>,

    /// Directory holding `config.toml` (defaults to `$BEACON_HOME` or `~/.beacon`).
    #[arg(long = "config-home", global = true)]
    pub config_home: Option<PathBuf>,

    /// Output as JSON.
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Debug logging on stderr.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List one page of notifications, newest first.
    List {
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Page size (defaults to the configured page size).
        #[arg(long)]
        size: Option<u32>,
    },
    /// List unread notifications.
    Unread,
    /// Print the server-side unread count.
    Count,
    /// Mark one notification as read.
    Read { id: String },
    /// Mark every notification as read.
    ReadAll,
    /// Delete one or more notifications.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Connect to the push broker and print notifications as they arrive.
    Watch,
}

impl GlobalArgs {
    fn load_config(&self) -> Result<BeaconConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(home) = &self.config_home {
            loader = loader.with_beacon_home(home.clone());
        }
        loader.load().context("failed to load configuration")
    }

    fn credentials(&self) -> Result<Credentials> {
        let token = self
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .context("no token given; pass --token or set BEACON_TOKEN")?;
        let user_id = self
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .context("no user given; pass --user or set BEACON_USER_ID")?;
        Ok(Credentials { token, user_id })
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let Cli { global, command } = self;
        let config = global.load_config()?;
        let credentials = global.credentials()?;
        let json = global.json;
        if let Command::Watch = command {
            return watch_cmd::run(&config, credentials, json).await;
        }
        run_request(command, &config, credentials, json).await
    }
}

/// One-shot REST commands.
async fn run_request(
    command: Command,
    config: &BeaconConfig,
    credentials: Credentials,
    json: bool,
) -> Result<()> {
    let Credentials { token, user_id } = credentials;
    let api = Arc::new(
        HttpNotificationApi::new(&config.api, token).context("failed to build API client")?,
    );
    let store = NotificationStore::new(api.clone(), user_id.clone());

    match command {
        Command::Watch => {}
        Command::List { page, size } => {
            let size = size.unwrap_or(config.session.page_size);
            store.fetch_page(page, size).await?;
            render::print_records(&store.notifications(), store.page_info(), json)?;
        }
        Command::Unread => {
            store.fetch_unread().await?;
            render::print_records(&store.notifications(), None, json)?;
        }
        Command::Count => {
            let count = api
                .unread_count(&user_id)
                .await
                .context("failed to load unread count")?;
            if json {
                println!("{}", serde_json::json!({ "unreadCount": count }));
            } else {
                println!("{count}");
            }
        }
        Command::Read { id } => {
            store.mark_as_read(&id).await?;
            if !json {
                println!("Marked {id} as read");
            }
        }
        Command::ReadAll => {
            let marked = store.mark_all_as_read().await?;
            if json {
                println!("{}", serde_json::json!({ "marked": marked }));
            } else {
                println!("Marked {marked} notification(s) as read");
            }
        }
        Command::Delete { ids } => {
            if let [id] = ids.as_slice() {
                store.delete_notification(id).await?;
            } else {
                store.delete_notifications(&ids).await?;
            }
            if json {
                println!("{}", serde_json::json!({ "deleted": ids }));
            } else {
                println!("Deleted {} notification(s)", ids.len());
            }
        }
    }
    Ok(())
}
