//! Streaming decode of gzipped n-gram shard files
//!
//! A shard line looks like `ngram<TAB>year,match_count,volume_count ...`,
//! with the ngram's words separated by spaces and one comma-separated
//! triple per year. Only the match counts matter downstream; they are
//! summed into a single score per ngram. Lines arrive sorted by ngram, so
//! repeats of the same token sequence are always adjacent and can be folded
//! together while holding no more than one entry in memory.

use crate::{Order, Result, Score};
use anyhow::Context;
use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use std::io::Cursor;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Standalone part-of-speech tags, never words
const PART_OF_SPEECH_TAGS: [&str; 12] = [
    "_NOUN_", "_._", "_VERB_", "_ADP_", "_DET_", "_ADJ_", "_PRON_", "_ADV_", "_NUM_", "_CONJ_",
    "_PRT_", "_X_",
];

/// Suffixes that mark a word as part-of-speech tagged
const PART_OF_SPEECH_SUFFIXES: [&str; 12] = [
    "_NOUN", "_.", "_VERB", "_ADP", "_DET", "_ADJ", "_PRON", "_ADV", "_NUM", "_CONJ", "_PRT", "_X",
];

/// Truth that a token is an ingestible word
///
/// The corpus interleaves plain words with part-of-speech annotated
/// variants ("run_VERB") and standalone tag pseudo-words ("_VERB_"); only
/// the plain words are wanted.
pub fn is_valid_word(word: &str) -> bool {
    !word.is_empty()
        && !PART_OF_SPEECH_TAGS.contains(&word)
        && !PART_OF_SPEECH_SUFFIXES
            .iter()
            .any(|suffix| word.ends_with(suffix))
}

/// One ngram and its aggregated score
///
/// Within one shard's output, token sequences are unique as long as the
/// input honors its sort order (see [`ShardParser`]).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AggregatedEntry {
    /// Words of the ngram, in order; length equals the shard's n-gram order
    pub tokens: Vec<Box<str>>,

    /// Match count summed over all years (and merged adjacent lines)
    pub score: Score,
}

/// Streaming parser for one shard payload
///
/// Decompresses and parses lazily: each [`next_entry()`](Self::next_entry)
/// call pulls just enough lines from the stream to finish one aggregated
/// entry, so memory use is independent of shard size. The sequence is
/// consumed exactly once; after `None` the parser is exhausted.
pub struct ShardParser {
    /// Decompressed payload, line by line
    lines: Lines<BufReader<GzipDecoder<Cursor<Bytes>>>>,

    /// N-gram order of the shard, i.e. expected token count per line
    order: Order,

    /// Entry still accumulating adjacent lines with the same tokens
    pending: Option<AggregatedEntry>,

    /// Number of lines rejected by validation so far
    skipped: u64,

    /// Truth that the underlying stream is exhausted
    done: bool,
}
//
impl ShardParser {
    /// Start parsing a shard's raw (gzip-compressed) payload
    pub fn new(payload: Bytes, order: Order) -> Self {
        let lines = BufReader::new(GzipDecoder::new(Cursor::new(payload))).lines();
        Self {
            lines,
            order,
            pending: None,
            skipped: 0,
            done: false,
        }
    }

    /// Produce the next aggregated entry, or `None` at end of shard
    ///
    /// Invalid lines are skipped and counted, never fatal; an error means
    /// the stream itself could not be decoded and the whole shard is lost.
    pub async fn next_entry(&mut self) -> Result<Option<AggregatedEntry>> {
        if self.done {
            return Ok(None);
        }
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("decoding shard stream")?
        {
            let Some(parsed) = parse_line(&line, self.order) else {
                self.skipped += 1;
                continue;
            };
            match self.pending.take() {
                // Same tokens as the entry being accumulated: merge
                Some(mut pending) if pending.tokens == parsed.tokens => {
                    pending.score += parsed.score;
                    self.pending = Some(pending);
                }
                // Tokens changed: the accumulated entry is finished
                Some(finished) => {
                    self.pending = Some(parsed);
                    return Ok(Some(finished));
                }
                None => self.pending = Some(parsed),
            }
        }
        self.done = true;
        Ok(self.pending.take())
    }

    /// Number of lines that were rejected by validation
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Decode one shard line, or reject it
fn parse_line(line: &str, order: Order) -> Option<AggregatedEntry> {
    let (ngram_field, year_counts) = line.split_once('\t')?;
    let tokens = ngram_field.split(' ').collect::<Vec<_>>();
    if tokens.len() != usize::from(order) || !tokens.iter().copied().all(is_valid_word) {
        return None;
    }
    let mut score: Score = 0;
    for year_triple in year_counts.split(' ') {
        score += match_count(year_triple)?;
    }
    Some(AggregatedEntry {
        tokens: tokens.into_iter().map(Box::from).collect(),
        score,
    })
}

/// Extract the match count from one `year,match_count,volume_count` triple
fn match_count(year_triple: &str) -> Option<Score> {
    let mut fields = year_triple.split(',');
    let (_year, matches, _volumes) = (fields.next()?, fields.next()?, fields.next()?);
    if fields.next().is_some() {
        return None;
    }
    matches.parse().ok()
}
