//! md365: mirror Microsoft 365 calendars and contacts as Markdown files.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use md365::commands::{self, App};
use md365::{Config, EnvTokenProvider};

#[derive(Parser, Debug)]
#[command(name = "md365")]
#[command(version, about = "Local Markdown mirror of Microsoft 365 calendars and contacts")]
struct Cli {
    /// Path to the config file (default: $MD365_CONFIG or <config dir>/md365/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync calendars and contacts from Microsoft 365
    Sync {
        /// Account to sync, or "all"
        #[arg(long)]
        account: Option<String>,
    },
    /// Calendar commands
    Cal {
        #[command(subcommand)]
        command: CalCommand,
    },
    /// Contact commands
    Contacts {
        #[command(subcommand)]
        command: ContactsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CalCommand {
    /// List synced events
    List {
        /// First day to show (YYYY-MM-DD, default today)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to show (YYYY-MM-DD, default today + 14 days)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only events whose file contains this text
        #[arg(long)]
        search: Option<String>,
        /// Limit to one account
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ContactsCommand {
    /// Search synced contacts
    Search {
        query: String,
        /// Limit to one account
        #[arg(long)]
        account: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "debug,md365=debug"
    } else {
        "info,md365=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!("Data directory: {}", config.data_dir.display());
    let app = App::new(config);

    match cli.command {
        Command::Sync { account } => {
            let tokens = EnvTokenProvider::from_config(&app.config);
            let summaries = commands::sync::run(&app, &tokens, account.as_deref()).await?;

            let mut failed = 0;
            for summary in &summaries {
                for line in summary.lines() {
                    println!("{}", line);
                }
                for error in &summary.errors {
                    eprintln!("Failed to sync '{}': {}", summary.account, error);
                }
                if !summary.is_success() {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} of {} account(s) failed to sync", failed, summaries.len());
            }
        }
        Command::Cal {
            command:
                CalCommand::List {
                    from,
                    to,
                    search,
                    account,
                },
        } => {
            let lines =
                commands::cal::list(&app, from, to, search.as_deref(), account.as_deref()).await?;
            for line in lines {
                println!("{}", line);
            }
        }
        Command::Contacts {
            command: ContactsCommand::Search { query, account },
        } => {
            let lines = commands::contacts::search(&app, &query, account.as_deref()).await?;
            for line in lines {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
