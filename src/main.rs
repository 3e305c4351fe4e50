//! # BugSeek CLI (`bugseek`)
//!
//! ## Usage
//!
//! ```bash
//! bugseek --config ./config/bugseek.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bugseek init` | Create the SQLite database and run schema migrations |
//! | `bugseek import <file.json>` | Load incidents from a JSON array |
//! | `bugseek analyze <id>` | Run pattern recognition, AI summary and solutions |
//! | `bugseek similar <id>` | Find similar incidents |
//! | `bugseek analysis <id>` | Show the stored analysis result |
//! | `bugseek health` | Probe the AI endpoint |
//! | `bugseek status` | Show AI usage and connectivity counters |
//! | `bugseek serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `bugseek=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use bugseek::{commands, config, incidents, migrate, server};

/// BugSeek: error log triage with pattern recognition, AI summaries and
/// similar-incident lookup.
#[derive(Parser)]
#[command(name = "bugseek", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bugseek.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import incidents from a JSON file.
    ///
    /// The file holds an array of objects with `id`, `team_name`, `module`,
    /// `error_name`, `description` and either `content` or `log_file`.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Analyze an incident.
    Analyze {
        /// Incident id.
        id: String,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Find incidents similar to the given one.
    Similar {
        /// Incident id.
        id: String,

        /// Minimum score in [0.0, 1.0]. Defaults to `[similarity] threshold`.
        #[arg(long)]
        threshold: Option<f64>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the stored analysis for an incident.
    Analysis {
        /// Incident id.
        id: String,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check connectivity to the AI endpoint.
    Health,

    /// Show AI usage and connectivity counters.
    Status,

    /// Start the HTTP server on `[server] bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bugseek=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            incidents::run_import(&cfg, &file).await?;
        }
        Commands::Analyze { id, json } => {
            commands::run_analyze(&cfg, &id, json).await?;
        }
        Commands::Similar {
            id,
            threshold,
            json,
        } => {
            if let Some(t) = threshold {
                if !(0.0..=1.0).contains(&t) {
                    anyhow::bail!("--threshold must be between 0.0 and 1.0");
                }
            }
            commands::run_similar(&cfg, &id, threshold, json).await?;
        }
        Commands::Analysis { id, json } => {
            commands::run_show_analysis(&cfg, &id, json).await?;
        }
        Commands::Health => {
            commands::run_health(&cfg).await?;
        }
        Commands::Status => {
            commands::run_status(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
