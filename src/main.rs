//! # Salesbot CLI (`salesbot`)
//!
//! ## Usage
//!
//! ```bash
//! salesbot --config ./config/salesbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `salesbot init` | Create the SQLite database and run schema migrations |
//! | `salesbot load [path]` | Validate and publish a product catalog |
//! | `salesbot stats` | Catalog, embedding and conversation counts |
//! | `salesbot search "<message>"` | Run retrieval for a message, no LLM call |
//! | `salesbot serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! salesbot init
//! salesbot load data/catalog.json
//! salesbot search "laptops under \$1000"
//! RUST_LOG=salesbot=debug salesbot serve
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use salesbot::{catalog, config, migrate, search, server, stats};

/// Salesbot: a retrieval-augmented sales assistant for an online tech store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Credentials are read from the environment; a `.env` file in the
/// working directory is loaded first.
#[derive(Parser)]
#[command(name = "salesbot", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/salesbot.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Validate a catalog file and publish it as the active catalog.
    ///
    /// Searches keep reading the previous catalog until the new one is
    /// fully written.
    Load {
        /// Catalog JSON file. Defaults to `[catalog].path`.
        path: Option<PathBuf>,

        /// Validate and summarize without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show catalog and conversation statistics.
    Stats,

    /// Run the retrieval engine for a customer message.
    Search {
        /// The customer message.
        query: String,

        /// What to print.
        #[arg(long, value_enum, default_value = "context")]
        output: OutputArg,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputArg {
    Context,
    Prompt,
    Json,
}

impl From<OutputArg> for search::SearchOutput {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Context => search::SearchOutput::Context,
            OutputArg::Prompt => search::SearchOutput::Prompt,
            OutputArg::Json => search::SearchOutput::Json,
        }
    }
}

/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("salesbot=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { path, dry_run } => {
            catalog::run_load(&cfg, path.as_deref(), dry_run).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search { query, output } => {
            search::run_search(&cfg, &query, output.into()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
