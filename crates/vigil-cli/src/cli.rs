//! Command-line surface for the vigil engine.
//!
//! ```bash
//! vigil --db vigil.db baseline set u-1 68
//! vigil --db vigil.db ingest samples.jsonl --subject u-1 --session night-1 --replay
//! vigil --db vigil.db feedback u-1 mild denied
//! vigil --db vigil.db status u-1
//! vigil --db vigil.db alerts u-1 --limit 10
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vigil_core::{Severity, UserResponse};

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about = "Sustained heart-rate anomaly detection with confirmation-aware alerts")]
#[command(propagate_version = true)]
pub struct Cli {
    /// SQLite database shared by every vigil process.
    #[arg(long, value_name = "FILE", default_value = "vigil.db")]
    pub db: PathBuf,

    /// TOML configuration file. `VIGIL__SECTION__KEY` env vars override it.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage resting heart-rate baselines
    #[command(subcommand)]
    Baseline(BaselineCommand),

    /// Store and evaluate samples from a JSON-lines file, one sample per line
    Ingest {
        file: PathBuf,
        #[arg(long)]
        subject: String,
        /// Session id; a fresh one is generated when omitted
        #[arg(long)]
        session: Option<String>,
        /// Use each sample's timestamp as the evaluation clock instead of wall time
        #[arg(long, default_value_t = false)]
        replay: bool,
    },

    /// Record the subject's answer to a notification
    Feedback {
        subject: String,
        #[arg(value_parser = parse_severity)]
        severity: Severity,
        #[arg(value_parser = parse_response)]
        response: UserResponse,
    },

    /// Show cooldown state for every severity
    Status { subject: String },

    /// List recent alert audit records
    Alerts {
        subject: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum BaselineCommand {
    Set { subject: String, bpm: f64 },
    Show { subject: String },
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    s.parse().map_err(|e: vigil_core::ParseEnumError| e.to_string())
}

fn parse_response(s: &str) -> Result<UserResponse, String> {
    s.parse().map_err(|e: vigil_core::ParseEnumError| e.to_string())
}
