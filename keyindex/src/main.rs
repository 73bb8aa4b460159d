// Forbid unwrap() in production code to prevent panics from corrupt files.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::fmt::Write as _;
use std::process::ExitCode;

use keyindex::config::InspectConfig;
use keyindex::{Index, IndexError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyindex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match InspectConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Opening a missing path would create a fresh index.
    if !config.path.is_file() {
        tracing::error!("No index file at {}", config.path.display());
        return ExitCode::FAILURE;
    }

    match inspect(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Failed to inspect {}: {e}", config.path.display());
            ExitCode::FAILURE
        }
    }
}

fn inspect(config: &InspectConfig) -> Result<(), IndexError> {
    let mut index = Index::open(&config.path, config.key_size)?;

    let stats = index.verify()?;
    println!("file:        {}", config.path.display());
    println!("key size:    {}", index.key_size()?);
    println!("capacity:    {}", index.capacity()?);
    println!("pages:       {}", index.page_count()?);
    println!("depth:       {}", stats.depth);
    println!("tree pages:  {} ({} leaves)", stats.pages, stats.leaves);
    println!("entries:     {}", stats.entries);

    for entry in index.iterate()?.take(config.dump_limit) {
        let (key, value) = entry?;
        println!("{} -> {value}", hex(&key));
    }

    tracing::debug!("{} pages mapped during inspection", index.cached_pages()?);
    index.close()
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            // fmt::Write for String never returns an error
            let _ = write!(out, "{b:02x}");
            out
        })
}
