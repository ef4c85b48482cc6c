//! Shared test fixtures

use crate::{config::Config, MAX_ORDER};
use async_compression::tokio::bufread::GzipEncoder;
use bytes::Bytes;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::io::AsyncReadExt;

/// Compress shard lines into the gzip payload a fetcher would hand over
pub async fn gzip_fixture(lines: &[&str]) -> Bytes {
    let text = lines
        .iter()
        .map(|line| format!("{line}\n"))
        .collect::<String>();
    let mut encoder = GzipEncoder::new(text.as_bytes());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .await
        .expect("compressing a fixture shard");
    compressed.into()
}

/// A configuration with hand-picked shard counts and concurrency knobs
pub fn test_config(
    shard_counts: [u32; MAX_ORDER as usize],
    parallelism: usize,
    fetch_concurrency: usize,
) -> Arc<Config> {
    Arc::new(Config {
        language_id: "eng".into(),
        shard_counts,
        database: "unused.sqlite".into(),
        parallelism: NonZeroUsize::new(parallelism).expect("nonzero parallelism"),
        fetch_concurrency: NonZeroUsize::new(fetch_concurrency).expect("nonzero fetch concurrency"),
    })
}
