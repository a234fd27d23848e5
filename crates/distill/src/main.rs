//! # Distill CLI (`distill`)
//!
//! ## Usage
//!
//! ```bash
//! distill --config ./config/distill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `distill init` | Create the SQLite database and run schema migrations |
//! | `distill import <file>` | Import exported conversations from JSON |
//! | `distill embed pending` | Backfill missing or stale embeddings |
//! | `distill embed rebuild` | Delete and regenerate all embeddings |
//! | `distill search "<query>"` | Semantic search over chunks or learnings |
//! | `distill extract --all` | Distill sources into learnings |
//! | `distill explain "<concept>"` | Explain a concept through past learnings |
//! | `distill learnings` | List recent or random learnings |
//! | `distill stats` | Database counts and embedding coverage |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use distill::config;
use distill::extract::Selection;
use distill::progress::ProgressMode;
use distill::search::SearchArgs;
use distill::{embed_cmd, explain, extract, import, learnings, logging, migrate, search, stats};
use distill_core::models::SourceKind;

/// Distill: archive conversations, search them semantically, and distill
/// them into learnings.
#[derive(Parser)]
#[command(name = "distill", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/distill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import conversations from a JSON export file.
    ///
    /// Sources already in the archive only gain messages beyond those
    /// stored before.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Manage embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search archived conversations.
    Search {
        /// The search query.
        query: String,

        /// Number of vector candidates; filters apply after this cut.
        #[arg(long)]
        limit: Option<usize>,

        /// Only spans created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only spans created on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Only spans with this role. Repeatable.
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Only spans from this source id. Repeatable.
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Context spans shown before each hit.
        #[arg(long)]
        before: Option<usize>,

        /// Context spans shown after each hit.
        #[arg(long)]
        after: Option<usize>,

        /// Search learnings instead of conversation chunks.
        #[arg(long)]
        learnings: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract learnings from archived sources with the configured LLM.
    Extract {
        /// Extract every stored source.
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Source id to extract. Repeatable.
        #[arg(long)]
        id: Vec<String>,

        /// With --all, restrict to one kind (conversation or topic).
        #[arg(long)]
        kind: Option<SourceKind>,

        /// Re-extract sources that already have learnings.
        #[arg(long)]
        overwrite: bool,

        /// Override extraction.concurrency.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Explain a concept through structural parallels with past learnings.
    Explain {
        /// The concept to explain.
        concept: String,

        /// Number of related learnings to draw on.
        #[arg(long)]
        limit: Option<usize>,

        /// File holding a custom prompt; `{concept}` is substituted.
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Print the explanation as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List stored learnings.
    Learnings {
        /// Shuffle instead of newest first.
        #[arg(long)]
        random: bool,

        #[arg(long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks and learnings that are missing or have stale embeddings.
    Pending {
        /// Maximum number of items per kind to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Only count what would be embedded.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete all embeddings and regenerate them.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Search {
            query,
            limit,
            since,
            until,
            roles,
            sources,
            before,
            after,
            learnings,
            json,
        } => {
            let args = SearchArgs {
                query,
                limit,
                since,
                until,
                roles,
                sources,
                before,
                after,
                learnings,
                json,
            };
            search::run_search(&cfg, &args).await?;
        }
        Commands::Extract {
            all,
            id,
            kind,
            overwrite,
            concurrency,
            progress,
        } => {
            let selection = if all {
                Selection::All(kind)
            } else if !id.is_empty() {
                Selection::Ids(id)
            } else {
                anyhow::bail!("Specify --all or at least one --id");
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            extract::run_extract(&cfg, selection, overwrite, concurrency, progress).await?;
        }
        Commands::Explain {
            concept,
            limit,
            prompt_file,
            json,
        } => {
            explain::run_explain(&cfg, &concept, limit, prompt_file.as_deref(), json).await?;
        }
        Commands::Learnings {
            random,
            limit,
            json,
        } => {
            learnings::run_learnings(&cfg, random, limit, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
