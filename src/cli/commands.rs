use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use crate::storage::ApplicationStatus;

#[derive(Parser)]
#[command(name = "fas")]
#[command(about = "Financial assistance scheme engine: applicants, schemes, eligibility and applications")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "fas.toml")]
    pub config: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file and create the database
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Manage applicants and their households
    Applicant {
        #[command(subcommand)]
        action: ApplicantCommand,
    },

    /// Manage schemes and check eligibility
    Scheme {
        #[command(subcommand)]
        action: SchemeCommand,
    },

    /// Manage applications
    Application {
        #[command(subcommand)]
        action: ApplicationCommand,
    },

    /// Show pooled criteria and benefits with their reference counts
    Pool {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove pooled definitions no scheme links to
    Sweep {
        /// Keep running, sweeping on an interval
        #[arg(short, long)]
        watch: bool,

        /// Seconds between sweeps (defaults to sweep.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show database statistics
    Stats {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Bulk load applicants and schemes from a seed document
    Import {
        /// JSON seed file with `applicants` and `schemes` arrays
        file: String,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
}

#[derive(Subcommand)]
pub enum ApplicantCommand {
    /// Register an applicant from JSON (file or stdin)
    Create {
        #[arg(short, long)]
        file: Option<String>,
    },
    List {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    Get {
        id: String,
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Replace an applicant and their household from JSON
    Update {
        id: String,
        #[arg(short, long)]
        file: Option<String>,
    },
    Delete {
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum SchemeCommand {
    /// Create a scheme from JSON (file or stdin)
    Create {
        #[arg(short, long)]
        file: Option<String>,
    },
    List {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    Get {
        id: String,
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Replace a scheme's name, criteria and benefits from JSON
    Update {
        id: String,
        #[arg(short, long)]
        file: Option<String>,
    },
    Delete {
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List the schemes an applicant qualifies for
    Eligible {
        applicant_id: String,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Show which criteria an applicant misses for every scheme
    Explain {
        applicant_id: String,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum ApplicationCommand {
    /// Apply an applicant to a scheme from JSON `{applicant_id, scheme_id}`
    Create {
        #[arg(short, long)]
        file: Option<String>,
    },
    List {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    Get {
        id: String,
    },
    /// Change status and/or applied date
    Update {
        id: String,
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
        #[arg(short = 'd', long)]
        applied_date: Option<NaiveDate>,
    },
    Delete {
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_application_update() {
        let cli = Cli::try_parse_from([
            "fas",
            "application",
            "update",
            "app-1",
            "--status",
            "approved",
            "--applied-date",
            "2024-03-01",
        ])
        .unwrap();

        match cli.command {
            Commands::Application {
                action: ApplicationCommand::Update { id, status, applied_date },
            } => {
                assert_eq!(id, "app-1");
                assert_eq!(status, Some(ApplicationStatus::Approved));
                assert_eq!(applied_date, NaiveDate::from_ymd_opt(2024, 3, 1));
            }
            _ => panic!("parsed the wrong command"),
        }
        assert_eq!(cli.config, "fas.toml");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let parsed = Cli::try_parse_from(["fas", "application", "update", "x", "--status", "maybe"]);

        assert!(parsed.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["fas", "stats", "--format", "json", "-c", "other.toml"]).unwrap();

        assert_eq!(cli.config, "other.toml");
        assert!(matches!(cli.command, Commands::Stats { format: OutputFormat::Json }));
    }
}
