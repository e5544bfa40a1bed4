mod channels;
mod feed;
mod render;

use std::{io::stderr, path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a channel database to merge with the built-in channels.
    #[arg(short, long, global = true, value_name = "path")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog channels.
    Channels {
        /// Only list channels in this subsystem, ignoring case.
        #[arg(short, long)]
        subsystem: Option<String>,

        /// Only list channels whose name or identifier matches this regular expression.
        #[arg(short = 'm', long = "match", value_name = "regex")]
        pattern: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: render::Format,
    },
    /// Show a channel definition and its decode table.
    Channel {
        /// Channel name or alias
        name: String,
    },
    /// Replay a recorded feed and show the final value of each channel.
    ///
    /// The recording is JSON lines, one item update per line, e.g.,
    /// {"item": "USLAB000058", "fields": {"Value": "758.2"}}
    Replay {
        /// Only show these channels.
        #[arg(short, long, value_delimiter = ',', value_name = "csv")]
        names: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: render::Format,

        /// Recorded feed
        input: PathBuf,
    },
    /// Replay a recorded feed in real time, periodically printing channel values.
    Watch {
        /// Channels to show. Defaults to a set of common channels.
        #[arg(short, long, value_delimiter = ',', value_name = "csv")]
        names: Vec<String>,

        /// Seconds between printing values.
        #[arg(short, long, default_value = "2", value_name = "secs")]
        interval: u64,

        /// Milliseconds between replayed updates.
        #[arg(short, long, default_value = "100", value_name = "ms")]
        pace: u64,

        /// Recorded feed
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("ISSLIVE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Channels {
            subsystem,
            pattern,
            format,
        } => channels::list_channels(
            cli.db.as_ref(),
            subsystem.as_deref(),
            pattern.as_deref(),
            format,
        ),
        Commands::Channel { name } => channels::channel_info(cli.db.as_ref(), name),
        Commands::Replay {
            names,
            format,
            input,
        } => {
            let catalog = channels::load_catalog(cli.db.as_ref())?;
            feed::replay(catalog, input, names, format)
        }
        Commands::Watch {
            names,
            interval,
            pace,
            input,
        } => {
            let catalog = channels::load_catalog(cli.db.as_ref())?;
            feed::watch(
                catalog,
                input,
                names,
                Duration::from_secs(*interval),
                Duration::from_millis(*pace),
            )
        }
    }
}
