//! # Weave CLI Module
//!
//! ## Available Commands
//!
//! - `check` - Parse and validate a schema
//! - `order` - Show the generation order and deferred edges
//! - `draft` - Draft an entity without side effects
//! - `cascade` - Run a full cascade against an in-memory store

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use weave_core::{SearchMode, WeaveError};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Weave - schema-first cascade generation
///
/// Resolves relationships between generated and existing entities.
#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Compact JSON output instead of pretty-printed
    #[arg(long, global = true)]
    pub compact: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Union search mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchModeArg {
    Ordered,
    Parallel,
}

impl From<SearchModeArg> for SearchMode {
    fn from(arg: SearchModeArg) -> Self {
        match arg {
            SearchModeArg::Ordered => Self::Ordered,
            SearchModeArg::Parallel => Self::Parallel,
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and validate a schema
    Check {
        /// Schema file (JSON or TOML)
        schema: PathBuf,
    },

    /// Show the generation order
    Order {
        /// Schema file (JSON or TOML)
        schema: PathBuf,
    },

    /// Draft an entity and print it
    Draft {
        /// Schema file (JSON or TOML)
        schema: PathBuf,

        /// Entity type to draft
        entity_type: String,

        /// Input object (JSON file)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Draft, resolve and recurse
    Cascade {
        /// Schema file (JSON or TOML)
        schema: PathBuf,

        /// Root entity type
        entity_type: String,

        /// Input object (JSON file)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Existing entities to load first: {"Type": [{...}, ...]}
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Depth bound for generated children
        #[arg(long)]
        max_depth: Option<usize>,

        /// Fuzzy threshold override
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Union search mode
        #[arg(long, value_enum)]
        search_mode: Option<SearchModeArg>,

        /// Seed for placeholder values and derived ids
        #[arg(long)]
        seed: Option<u64>,

        /// Fail a field instead of substituting a placeholder when generation fails
        #[arg(long)]
        fail_on_fallback: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), WeaveError> {
    let pretty = !cli.compact;

    match cli.command {
        Commands::Check { schema } => cmd_check(&schema, pretty),
        Commands::Order { schema } => cmd_order(&schema, pretty),
        Commands::Draft {
            schema,
            entity_type,
            input,
        } => cmd_draft(&schema, &entity_type, input.as_deref(), pretty),
        Commands::Cascade {
            schema,
            entity_type,
            input,
            data,
            max_depth,
            threshold,
            search_mode,
            seed,
            fail_on_fallback,
        } => {
            let args = CascadeArgs {
                schema,
                entity_type,
                input,
                data,
                max_depth,
                threshold,
                search_mode: search_mode.map(SearchMode::from),
                seed,
                fail_on_fallback,
            };
            cmd_cascade(cli.config.as_deref(), &args, pretty).await
        }
    }
}
