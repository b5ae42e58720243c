use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use wallfeed_cli::cli::{run, Action, CliConfig, RunOptions};
use wallfeed_core::tracing_setup::init_tracing;

#[derive(Parser)]
#[command(name = "wallfeed")]
#[command(about = "Merged, time-ordered feed across many channels")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (wall tuning, settings, fixture path)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Fixture with sources and messages; overrides the config's fixture
    #[arg(long, short = 'f')]
    fixture: Option<PathBuf>,

    /// Entries per window; overrides the config
    #[arg(long)]
    page_size: Option<usize>,

    /// Give up waiting on the engine after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the initial window
    Show,

    /// Slide the window towards newer messages
    Scroll {
        /// Number of pages to advance
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Load older history across all sources
    LoadAll {
        /// Maximum number of load-all requests
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },

    /// Mark the initial window as read
    MarkRead {
        /// Only messages at or before this unix timestamp
        #[arg(long)]
        before: Option<i32>,
    },

    /// List sources and whether the filter includes them
    Sources,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(&cli);
    if let Some(fixture) = cli.fixture {
        config.fixture = Some(fixture);
    }
    if let Some(page_size) = cli.page_size {
        config.wall.page_size = page_size.max(1);
    }

    let action = match cli.command {
        Some(Commands::Show) | None => Action::Show,
        Some(Commands::Scroll { steps }) => Action::Scroll { steps },
        Some(Commands::LoadAll { pages }) => Action::LoadAll { pages },
        Some(Commands::MarkRead { before }) => Action::MarkRead { before },
        Some(Commands::Sources) => Action::Sources,
    };

    let options = RunOptions {
        config,
        pretty: cli.pretty,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    if let Err(e) = run(options, action).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Priority: --config > default config file > built-in defaults
fn load_config(cli: &Cli) -> CliConfig {
    if let Some(ref path) = cli.config {
        match CliConfig::load(path) {
            Ok(config) => return config,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    match CliConfig::load_default() {
        Ok(Some(config)) => config,
        Ok(None) => CliConfig::default(),
        Err(e) => {
            eprintln!("Warning: ignoring default config: {:#}", e);
            CliConfig::default()
        }
    }
}
