//! Ingest the Google Books Ngram dataset into a compact numeric database.
//!
//! General documentation on the dataset can be found at
//! <http://storage.googleapis.com/books/ngrams/books/datasetsv3.html>. We
//! fetch every shard of every n-gram order, aggregate per-ngram match
//! counts across years, resolve multi-word ngrams to the integer ids of
//! their component words, and persist the result in SQLite. Completed
//! shards are tracked in a ledger so an interrupted run can be resumed
//! without redoing finished work.

mod config;
mod fetch;
mod index;
mod languages;
mod parse;
mod pipeline;
mod progress;
mod storage;
#[cfg(test)]
mod testutil;

use crate::{
    config::Config, fetch::RetryingFetcher, pipeline::Pipeline, progress::ProgressReport,
    storage::SqliteStore,
};
use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use std::{fmt, num::NonZeroUsize, path::PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Download the Google Books Ngram corpus into a local SQLite database
///
/// The ingestion is resumable: shards that were fully committed during a
/// previous run are skipped, so re-invoking the program after a crash or
/// an interrupt picks up where it left off.
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// Short name of the Google Books Ngram language to be used, e.g. "eng"
    ///
    /// Will interactively prompt for a supported language if not specified.
    #[arg(short, long, default_value = None)]
    language: Option<Box<str>>,

    /// Database file to ingest into
    ///
    /// Defaults to "ngrams-<language>.sqlite" in the working directory.
    /// Pointing several runs at the same file is how interrupted ingestions
    /// get resumed.
    #[arg(short, long, default_value = None)]
    database: Option<PathBuf>,

    /// Number of shards processed in parallel
    ///
    /// Each worker carries one shard through fetch, parse and write. Parsing
    /// is CPU-bound, so there is little point in raising this far beyond the
    /// machine's core count.
    #[arg(short, long, default_value = "4")]
    parallelism: NonZeroUsize,

    /// Maximum number of simultaneous downloads
    ///
    /// The network is the scarcest and most failure-prone resource of the
    /// whole pipeline, so it gets its own cap, independent of worker
    /// parallelism.
    #[arg(short, long, default_value = "2")]
    fetch_concurrency: NonZeroUsize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;

    // Decode CLI arguments and pick a corpus language
    let args = Args::parse();
    let language = languages::pick(&args)?;
    let config = Config::new(args, language);

    // Open the target database
    let store = SqliteStore::open(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.display()))?;

    // A Ctrl-C requests a clean stop: in-flight shards are abandoned without
    // a ledger mark and will be re-ingested by the next run.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, stopping after in-flight work unwinds");
                cancel.cancel();
            }
        });
    }

    // Run the ingestion pipeline
    let report = ProgressReport::new();
    let client = reqwest::Client::new();
    let fetcher = RetryingFetcher::new(client, config.clone(), cancel.clone());
    let pipeline = Pipeline::new(config.clone(), store, fetcher, cancel.clone());
    let summary = pipeline.run(&report).await?;

    // Report the outcome
    {
        let stdout = tokio::io::stdout();
        let mut stdout = BufWriter::new(stdout);
        let tally = format!(
            "shards completed: {}, skipped (already done): {}, abandoned: {}\n",
            summary.completed,
            summary.skipped,
            summary.abandoned.len(),
        );
        stdout.write_all(tally.as_bytes()).await?;
        for shard in &summary.abandoned {
            stdout
                .write_all(format!("abandoned: {shard}\n").as_bytes())
                .await?;
        }
        stdout.flush().await?;
    }
    if !summary.abandoned.is_empty() {
        anyhow::bail!(
            "{} shard(s) abandoned; re-run with the same database to retry them",
            summary.abandoned.len()
        );
    }
    Ok(())
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// N-gram order, i.e. number of words per ngram (1 through 5)
pub type Order = u8;

/// Highest n-gram order present in the dataset
pub const MAX_ORDER: Order = 5;

/// Aggregate number of matches for one ngram
///
/// Per-year match counts are summed over all years of the corpus, and for
/// words additionally over all shards, so this wants to be a wide type:
/// common English words exceed u32 by orders of magnitude.
pub type Score = u64;

/// Identifier assigned to a word when its order-1 record is created
///
/// Stable for the lifetime of a database; higher-order ngram records refer
/// to their component words through it.
pub type WordId = i64;

/// One remote data file, identified by its n-gram order and its position
/// within that order's fixed shard count
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Shard {
    /// N-gram order this shard belongs to
    pub order: Order,

    /// Index of this shard within the order (0-based)
    pub index: u32,
}
//
impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-gram shard {}", self.order, self.index)
    }
}

/// Set up logging
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}
