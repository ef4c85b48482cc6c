//! Orchestration of the shard ingestion workflow
//!
//! A run moves through fixed stages: migrate the schema, ingest every
//! order-1 shard, build the word index from the committed words, ingest
//! the order-2 to order-5 shards, compact the store. The step from order-1
//! ingestion to index construction is a hard barrier: higher orders
//! resolve their tokens against the index, so not a single one of their
//! shards may start before every order-1 shard has either committed,
//! been skipped as already done, or been abandoned.
//!
//! Within a stage, shards are processed by a pool of workers bounded by
//! two counting permits owned here: one for workers overall, one held only
//! for the duration of a download. A shard that fails along the way is
//! abandoned for this run (logged, left out of the ledger, retried by the
//! next run) without disturbing its siblings.

use crate::{
    config::Config,
    fetch::Fetch,
    index::{resolve_ngram, WordIndex},
    parse::ShardParser,
    progress::ProgressReport,
    storage::{SqliteStore, WordRow},
    Order, Result, Shard, MAX_ORDER,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

/// How one shard's journey through the pipeline ended
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ShardOutcome {
    /// Fully ingested and recorded in the ledger during this run
    Completed,

    /// Recorded in the ledger by an earlier run; nothing to do
    Skipped,

    /// Failed or cancelled mid-way; not in the ledger, retried next run
    Abandoned,
}

/// Per-shard tally of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Shards fully ingested during this run
    pub completed: usize,

    /// Shards skipped because an earlier run already ingested them
    pub skipped: usize,

    /// Shards this run gave up on; re-running will retry exactly these
    pub abandoned: Vec<Shard>,
}
//
impl RunSummary {
    fn record(&mut self, shard: Shard, outcome: ShardOutcome) {
        match outcome {
            ShardOutcome::Completed => self.completed += 1,
            ShardOutcome::Skipped => self.skipped += 1,
            ShardOutcome::Abandoned => self.abandoned.push(shard),
        }
    }
}

/// The ingestion orchestrator
pub struct Pipeline<F: Fetch> {
    config: Arc<Config>,
    store: SqliteStore,
    fetcher: F,

    /// Permits for shard workers; bounds everything downstream of the queue
    workers: Arc<Semaphore>,

    /// Permits for downloads, shared across all orders and held only while
    /// bytes are on the wire
    fetch_permits: Arc<Semaphore>,

    cancel: CancellationToken,
}
//
impl<F: Fetch> Pipeline<F> {
    /// Set up a pipeline run over every shard of the configured corpus
    pub fn new(
        config: Arc<Config>,
        store: SqliteStore,
        fetcher: F,
        cancel: CancellationToken,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.parallelism.get()));
        let fetch_permits = Arc::new(Semaphore::new(config.fetch_concurrency.get()));
        Self {
            config,
            store,
            fetcher,
            workers,
            fetch_permits,
            cancel,
        }
    }

    /// Drive the run to completion (or to a clean cancellation)
    ///
    /// Shard-level failures end up in the summary, not here; an `Err` means
    /// the run itself is broken (storage gone, worker panicked, ...).
    pub async fn run(&self, report: &ProgressReport) -> Result<RunSummary> {
        log::info!("migrating the database schema");
        self.store
            .migrate()
            .await
            .context("migrating the database schema")?;

        let mut summary = RunSummary::default();

        // Not one higher-order shard is scheduled before every order-1
        // worker has been drained: resolution needs the complete index.
        self.ingest("Ingesting 1-grams", 1..=1, None, &mut summary, report)
            .await?;
        if self.cancel.is_cancelled() {
            return Ok(summary);
        }

        let index = Arc::new(self.build_word_index(report).await?);

        self.ingest(
            "Ingesting 2- to 5-grams",
            2..=MAX_ORDER,
            Some(index),
            &mut summary,
            report,
        )
        .await?;
        if self.cancel.is_cancelled() {
            return Ok(summary);
        }

        log::info!("compacting the database");
        self.store
            .compact()
            .await
            .context("compacting the database")?;
        log::info!(
            "run finished: {} completed, {} skipped, {} abandoned",
            summary.completed,
            summary.skipped,
            summary.abandoned.len()
        );
        Ok(summary)
    }

    /// Ingest every shard of a set of orders through the worker pool
    ///
    /// Returns once every shard has an outcome, which makes each call a
    /// barrier between pipeline stages.
    async fn ingest(
        &self,
        label: &'static str,
        orders: impl IntoIterator<Item = Order>,
        index: Option<Arc<WordIndex>>,
        summary: &mut RunSummary,
        report: &ProgressReport,
    ) -> Result<()> {
        let shards = orders
            .into_iter()
            .flat_map(|order| self.config.shards(order))
            .collect::<Vec<_>>();
        log::info!("{label}: {} shards", shards.len());
        let progress = report.add_steps(label, shards.len());

        let mut tasks = JoinSet::new();
        for shard in shards {
            let worker = ShardWorker {
                store: self.store.clone(),
                fetcher: self.fetcher.clone(),
                index: index.clone(),
                workers: self.workers.clone(),
                fetch_permits: self.fetch_permits.clone(),
                cancel: self.cancel.clone(),
            };
            tasks.spawn(async move { (shard, worker.run(shard).await) });
        }
        while let Some(joined) = tasks.join_next().await {
            let (shard, outcome) = joined.context("collecting the outcome of a shard worker")?;
            progress.make_progress();
            summary.record(shard, outcome);
        }
        progress.finish();
        Ok(())
    }

    /// Build the word index from every committed order-1 row
    async fn build_word_index(&self, report: &ProgressReport) -> Result<WordIndex> {
        log::info!("building the word index");
        let progress = report.add_spinner("Building the word index");
        let words = self
            .store
            .all_words()
            .await
            .context("scanning committed words")?;
        // Inserting millions of words is pure CPU work; keep it off the
        // runtime threads that the shard workers live on.
        let index = tokio::task::spawn_blocking(move || WordIndex::build(words))
            .await
            .context("building the word index")?;
        progress.finish();
        log::info!("word index holds {} words", index.len());
        Ok(index)
    }
}

/// Everything one worker needs to carry one shard through the pipeline
#[derive(Clone)]
struct ShardWorker<F: Fetch> {
    store: SqliteStore,
    fetcher: F,

    /// Word index to resolve against; `None` during order-1 ingestion
    index: Option<Arc<WordIndex>>,

    workers: Arc<Semaphore>,
    fetch_permits: Arc<Semaphore>,
    cancel: CancellationToken,
}
//
impl<F: Fetch> ShardWorker<F> {
    /// Process one shard, converting every failure into abandonment
    async fn run(self, shard: Shard) -> ShardOutcome {
        let Some(_slot) = self.acquire(&self.workers).await else {
            return ShardOutcome::Abandoned;
        };
        match self.process(shard).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("abandoning {shard} for this run: {err:#}");
                ShardOutcome::Abandoned
            }
        }
    }

    /// The per-shard workflow: ledger check, fetch, parse, resolve, write
    async fn process(&self, shard: Shard) -> Result<ShardOutcome> {
        if self.store.is_shard_done(shard).await? {
            log::debug!("{shard} already ingested, skipping");
            return Ok(ShardOutcome::Skipped);
        }
        if self.cancel.is_cancelled() {
            return Ok(ShardOutcome::Abandoned);
        }

        // Download while holding a fetch permit; the permit goes back
        // before parsing so CPU work never sits on the download pool.
        let payload = {
            let Some(_permit) = self.acquire(&self.fetch_permits).await else {
                return Ok(ShardOutcome::Abandoned);
            };
            self.fetcher.fetch(shard).await?
        };

        let mut parser = ShardParser::new(payload, shard.order);
        match &self.index {
            // Order 1: entries are single words, stored as text with their
            // scores; identifiers get assigned by the store
            None => {
                let mut rows = Vec::new();
                while let Some(mut entry) = parser.next_entry().await? {
                    if self.cancel.is_cancelled() {
                        return Ok(ShardOutcome::Abandoned);
                    }
                    debug_assert_eq!(entry.tokens.len(), 1);
                    rows.push(WordRow {
                        word: entry.tokens.swap_remove(0),
                        score: entry.score,
                    });
                }
                log::debug!(
                    "parsed {shard}: {} words ({} lines skipped)",
                    rows.len(),
                    parser.skipped()
                );
                if self.cancel.is_cancelled() {
                    return Ok(ShardOutcome::Abandoned);
                }
                self.store.insert_words(shard, rows).await?;
            }
            // Orders 2..=5: entries resolve to word-id tuples, or drop
            Some(index) => {
                let mut rows = Vec::new();
                let mut dropped = 0u64;
                while let Some(entry) = parser.next_entry().await? {
                    if self.cancel.is_cancelled() {
                        return Ok(ShardOutcome::Abandoned);
                    }
                    match resolve_ngram(index, &entry) {
                        Some(row) => rows.push(row),
                        None => dropped += 1,
                    }
                }
                log::debug!(
                    "parsed {shard}: {} ngrams ({} lines skipped, {dropped} unresolvable)",
                    rows.len(),
                    parser.skipped()
                );
                if self.cancel.is_cancelled() {
                    return Ok(ShardOutcome::Abandoned);
                }
                self.store.insert_ngrams(shard, rows).await?;
            }
        }
        log::info!("committed {shard}");
        Ok(ShardOutcome::Completed)
    }

    /// Acquire from one of the bounded pools, unless the run gets cancelled
    async fn acquire(&self, pool: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            permit = pool.clone().acquire_owned() => permit.ok(),
            () = self.cancel.cancelled() => None,
        }
    }
}
