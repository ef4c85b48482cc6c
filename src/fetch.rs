//! Retrying shard downloads

use crate::{config::Config, Result, Shard};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rand::random;
use reqwest::Response;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Initial retry delay after a failed download
const RETRY_BASE_MS: u64 = 500;

/// Ceiling on the retry delay, however many attempts have failed
const RETRY_MAX_MS: u64 = 60_000;

/// Source of raw shard payloads
///
/// The pipeline only needs "give me the bytes of this shard", which keeps
/// the orchestration testable with a deterministic in-memory source.
pub trait Fetch: Clone + Send + Sync + 'static {
    /// Fetch one shard's raw (still gzip-compressed) payload
    fn fetch(&self, shard: Shard) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Shard downloader that retries failed transfers until cancelled
///
/// Corpus downloads run for hours and the provider occasionally serves
/// errors or drops connections, so every transport-level failure is retried
/// with exponentially growing, capped, jittered delays. The only way a
/// fetch gives up is through the run's cancellation token.
#[derive(Clone, Debug)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    config: Arc<Config>,
    cancel: CancellationToken,
}
//
impl RetryingFetcher {
    /// Set up a fetcher for this run
    pub fn new(client: reqwest::Client, config: Arc<Config>, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Make a single download attempt
    async fn attempt(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)?;
        let mut payload = BytesMut::with_capacity(
            usize::try_from(response.content_length().unwrap_or(0)).unwrap_or(0),
        );
        let mut chunks = Box::pin(response.bytes_stream());
        loop {
            tokio::select! {
                chunk = chunks.next() => match chunk {
                    Some(chunk) => payload.extend_from_slice(&chunk?),
                    None => break,
                },
                () = self.cancel.cancelled() => anyhow::bail!("transfer cancelled"),
            }
        }
        Ok(payload.freeze())
    }
}
//
impl Fetch for RetryingFetcher {
    async fn fetch(&self, shard: Shard) -> Result<Bytes> {
        let url = self.config.shard_url(shard);
        let total = self.config.total_shards(shard.order);
        let mut backoff = Backoff::new(RETRY_BASE_MS, RETRY_MAX_MS);
        loop {
            anyhow::ensure!(
                !self.cancel.is_cancelled(),
                "download of {shard} cancelled"
            );
            match self.attempt(&url).await {
                Ok(payload) => {
                    log::debug!(
                        "downloaded {shard} of {total} ({} compressed bytes)",
                        payload.len()
                    );
                    return Ok(payload);
                }
                Err(err) => {
                    anyhow::ensure!(
                        !self.cancel.is_cancelled(),
                        "download of {shard} cancelled"
                    );
                    let delay = backoff.next_delay();
                    log::warn!("retrying {shard} in {delay:?} after error: {err:#}");
                    tokio::select! {
                        () = sleep(delay) => {}
                        () = self.cancel.cancelled() => {
                            anyhow::bail!("download of {shard} cancelled")
                        }
                    }
                }
            }
        }
    }
}

/// Exponential backoff calculator with jitter
struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}
//
impl Backoff {
    /// Create a new backoff starting at `base_ms` with a cap of `max_ms`
    fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Get the next delay duration and increment the attempt counter
    fn next_delay(&mut self) -> Duration {
        let exp = 1u64
            .checked_shl(self.attempt)
            .map_or(u64::MAX, |factor| self.base_ms.saturating_mul(factor));
        let capped = exp.min(self.max_ms);
        let jitter = random::<u64>() % (capped / 4 + 1);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped + jitter)
    }
}
