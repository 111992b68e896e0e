//! # Weave
//!
//! The command-line binary for the Weave cascade engine.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a schema
//! weave check schema.json
//!
//! # Generation order and deferred edges
//! weave order schema.toml
//!
//! # Cascade a Blog from input, linking against preloaded data
//! weave cascade schema.json Blog --input blog.json --data existing.json --max-depth 2 --seed 7
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weave::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // WEAVE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("WEAVE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "weave=info,weave_core=info".into());

    // Logs go to stderr; stdout carries the JSON output.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
