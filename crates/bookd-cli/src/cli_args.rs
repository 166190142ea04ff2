//! Top-level CLI surface (§6): `serve` runs the orchestration service in
//! this process; every other subcommand is a thin client against a running
//! `serve` instance's `/api/*` surface.

use anyhow::Result;
use clap::{Parser, Subcommand};

use bookd_core::config;

use crate::commands;
use crate::http_client::ApiClient;

#[derive(Debug, Parser)]
#[command(name = "bookd")]
#[command(about = "bookd: book-acquisition download orchestration service", long_about = None)]
pub struct Cli {
    /// Base URL of a running `bookd serve` instance, for every subcommand but `serve`.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8084")]
    pub api_url: String,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the download orchestration service (HTTP + WebSocket + scheduler).
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "127.0.0.1:8084")]
        bind: String,
    },

    /// Search the catalog for releases.
    Search {
        /// Free-text query.
        query: String,
        /// Restrict to one or more languages.
        #[arg(long)]
        lang: Vec<String>,
        /// Restrict to one or more formats (epub, mobi, ...).
        #[arg(long)]
        format: Vec<String>,
    },

    /// Enqueue a release (by the id returned from `search`) for download.
    Download {
        /// Release id.
        id: String,
        /// Queue priority (lower runs first).
        #[arg(long)]
        priority: Option<i64>,
    },

    /// Cancel a queued or in-progress download.
    Cancel {
        /// Task id.
        id: String,
    },

    /// Show the queue grouped by status.
    Status,

    /// Queue inspection and mutation.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueueAction {
    /// List queued task ids in scheduling order.
    Order,
    /// List currently active (non-terminal) task ids.
    Active,
    /// Remove completed/terminal tasks past the status timeout.
    Clear,
    /// Change a queued task's priority.
    Priority {
        /// Task id.
        id: String,
        /// New priority (lower runs first).
        priority: i64,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        if let CliCommand::Serve { bind } = &cli.command {
            let cfg = config::load_or_init()?;
            tracing::debug!("loaded config: {:?}", cfg);
            return commands::serve::run(bind, cfg).await;
        }

        let client = ApiClient::new(cli.api_url);
        match cli.command {
            CliCommand::Serve { .. } => unreachable!("handled above"),
            CliCommand::Search { query, lang, format } => commands::search::run(&client, &query, &lang, &format)?,
            CliCommand::Download { id, priority } => commands::download::run(&client, &id, priority)?,
            CliCommand::Cancel { id } => commands::download::cancel(&client, &id)?,
            CliCommand::Status => commands::status::run(&client)?,
            CliCommand::Queue { action } => match action {
                QueueAction::Order => commands::queue::order(&client)?,
                QueueAction::Active => commands::queue::active(&client)?,
                QueueAction::Clear => commands::queue::clear(&client)?,
                QueueAction::Priority { id, priority } => commands::queue::set_priority(&client, &id, priority)?,
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> CliCommand {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn parses_serve_with_default_bind() {
        match parse(&["bookd", "serve"]) {
            CliCommand::Serve { bind } => assert_eq!(bind, "127.0.0.1:8084"),
            _ => panic!("expected Serve"),
        }
    }

    #[test]
    fn parses_search_with_lang_filters() {
        match parse(&["bookd", "search", "dune", "--lang", "en", "--lang", "fr"]) {
            CliCommand::Search { query, lang, format } => {
                assert_eq!(query, "dune");
                assert_eq!(lang, vec!["en", "fr"]);
                assert!(format.is_empty());
            }
            _ => panic!("expected Search"),
        }
    }

    #[test]
    fn parses_download_with_priority() {
        match parse(&["bookd", "download", "abc123", "--priority", "5"]) {
            CliCommand::Download { id, priority } => {
                assert_eq!(id, "abc123");
                assert_eq!(priority, Some(5));
            }
            _ => panic!("expected Download"),
        }
    }

    #[test]
    fn parses_queue_priority_subcommand() {
        match parse(&["bookd", "queue", "priority", "abc123", "2"]) {
            CliCommand::Queue { action: QueueAction::Priority { id, priority } } => {
                assert_eq!(id, "abc123");
                assert_eq!(priority, 2);
            }
            _ => panic!("expected Queue Priority"),
        }
    }

    #[test]
    fn global_api_url_defaults_to_localhost() {
        let cli = Cli::try_parse_from(["bookd", "status"]).unwrap();
        assert_eq!(cli.api_url, "http://127.0.0.1:8084");
    }
}
