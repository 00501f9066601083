//! # Mailcast: recurring mailing dispatcher
//!
//! Usage:
//!   mailcast tick                          # advance statuses, then dispatch
//!   mailcast advance                       # created → started only
//!   mailcast dispatch                      # one dispatch cycle only
//!   mailcast watch --interval 300          # tick forever
//!   mailcast stats --owner 7               # per-owner counts
//!   mailcast deactivate 42                 # force a campaign to finished
//!   mailcast history 42                    # attempt log of a campaign
//!
//! Reports are printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mailcast_core::traits::{Clock, FixedClock, SystemClock, Transport};
use mailcast_core::MailcastConfig;
use mailcast_engine::{Mailcast, SmtpTransport, alerts_from_config, run_periodic};
use mailcast_store::MailingDb;

#[derive(Parser)]
#[command(name = "mailcast", version, about = "📬 Mailcast: recurring mailing dispatcher")]
struct Cli {
    /// Config file (default: ~/.mailcast/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides `database.path`
    #[arg(long, global = true)]
    db: Option<String>,

    /// Run as if the current time were this RFC 3339 instant
    #[arg(long, global = true, value_parser = parse_instant)]
    at: Option<DateTime<Utc>>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Promote created campaigns whose start time has passed
    Advance,
    /// Run one dispatch cycle
    Dispatch,
    /// Advance, then dispatch
    Tick,
    /// Tick periodically until interrupted
    Watch {
        /// Seconds between ticks (default: dispatch.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Campaign and recipient counts for one owner
    Stats {
        #[arg(long)]
        owner: i64,
    },
    /// Force a campaign to finished
    Deactivate { campaign_id: i64 },
    /// Attempt log of a campaign, newest first
    History { campaign_id: i64 },
}

fn parse_instant(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<MailcastConfig> {
    let mut config = match &cli.config {
        Some(path) => MailcastConfig::load_from(path)?,
        None => MailcastConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_db(path: &Path) -> Result<MailingDb> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(MailingDb::open(path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "mailcast=debug,mailcast_core=debug,mailcast_store=debug,mailcast_engine=debug"
    } else {
        "mailcast=info,mailcast_engine=info,mailcast_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let db_path = config.database.resolved_path();
    let db = Arc::new(open_db(&db_path)?);
    tracing::debug!("Database: {}", db_path.display());

    let clock: Arc<dyn Clock> = match cli.at {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let transport: Arc<dyn Transport> = Arc::new(SmtpTransport::from_config(&config.smtp)?);
    let alert = alerts_from_config(&config, transport.clone());
    let mailcast = Mailcast::new(db.clone(), db, transport, alert, clock, &config);
    let now = mailcast.now();

    match cli.command {
        Command::Advance => print_json(&mailcast.advance_statuses(now)?)?,
        Command::Dispatch => print_json(&mailcast.run_dispatch_cycle(now).await?)?,
        Command::Tick => print_json(&mailcast.tick(now).await?)?,
        Command::Watch { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.dispatch.interval());
            if interval.is_zero() {
                anyhow::bail!("watch interval must be at least one second");
            }
            let runner = tokio::spawn(run_periodic(Arc::new(mailcast), interval));
            tokio::signal::ctrl_c().await?;
            runner.abort();
            tracing::info!("👋 Stopped");
        }
        Command::Stats { owner } => print_json(&mailcast.stats(owner, now)?)?,
        Command::Deactivate { campaign_id } => {
            let changed = mailcast.deactivate(campaign_id)?;
            print_json(&serde_json::json!({
                "campaign_id": campaign_id,
                "deactivated": changed,
            }))?;
        }
        Command::History { campaign_id } => print_json(&mailcast.history(campaign_id)?)?,
    }

    Ok(())
}
