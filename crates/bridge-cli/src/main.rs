mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, records::RecordsSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "auction-bridge",
    about = "Follow the tenders feed and launch auction workers for planning, announcement and cancellation",
    version,
    propagate_version = true
)]
struct Cli {
    /// Bridge config file (YAML)
    #[arg(long, global = true, env = "AUCTION_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,

        /// Read tenders from a JSON file instead of the API feed
        #[arg(long, value_name = "JSON")]
        from_file: Option<PathBuf>,
    },

    /// Show what the bridge would do with a set of tenders, without launching workers
    Evaluate {
        /// JSON file with a tender array or a {"data": [...]} envelope
        file: PathBuf,

        /// Evaluation time (RFC 3339, default: now)
        #[arg(long)]
        now: Option<String>,

        /// Evaluate in re-planning mode
        #[arg(long)]
        replanning: bool,

        /// Seed the schedule index from a JSON record array instead of the schedule db
        #[arg(long, value_name = "JSON")]
        records: Option<PathBuf>,
    },

    /// Validate the bridge configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect and seed the schedule db
    Records {
        #[command(subcommand)]
        subcommand: RecordsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    init_tracing(default_level, cli.log_json);

    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run { once, from_file } => cmd::run::run(config, once, from_file, cli.json),
        Commands::Evaluate {
            file,
            now,
            replanning,
            records,
        } => cmd::evaluate::run(
            config,
            &file,
            now.as_deref(),
            replanning,
            records.as_deref(),
            cli.json,
        ),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
        Commands::Records { subcommand } => cmd::records::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(default_level: tracing::Level, json: bool) {
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into());
    // stdout is reserved for command output.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
