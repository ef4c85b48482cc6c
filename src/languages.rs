//! Supported Google Books Ngrams languages

use crate::{Args, Order, Result, MAX_ORDER};
use anyhow::Context;
use dialoguer::FuzzySelect;

/// Base URL of the v3 (20200217) n-gram corpus
pub const DATASET_BASE_URL: &str = "http://storage.googleapis.com/books/ngrams/books/20200217";

/// Resolve the language requested on the command line, or prompt for one
pub fn pick(args: &Args) -> Result<LanguageInfo> {
    match &args.language {
        Some(short_name) => get(short_name),
        None => prompt().context("prompting for a corpus language"),
    }
}

/// Get information about a language corpus
pub fn get(short_name: &str) -> Result<LanguageInfo> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(_long_name, lang)| lang.short_name == short_name)
        .map(|(_long, lang)| *lang)
        .with_context(|| format!("Failed to find user-requested language {short_name}"))
}

/// Ask the user to select a language corpus
pub fn prompt() -> dialoguer::Result<LanguageInfo> {
    let language_names = SUPPORTED_LANGUAGES
        .iter()
        .map(|(name, info)| format!("{name} ({})", info.short_name))
        .collect::<Vec<_>>();
    let language_idx = FuzzySelect::new()
        .with_prompt("Which corpus should I ingest?")
        .items(&language_names)
        .default(0)
        .max_length(usize::MAX)
        .interact()?;
    Ok(SUPPORTED_LANGUAGES[language_idx].1)
}

/// What we know about a language in the Google Books Ngrams dataset
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LanguageInfo {
    /// Short name, as in dataset URLs
    pub short_name: &'static str,

    /// Number of shard files per n-gram order (index 0 is order 1)
    ///
    /// These totals are fixed by the corpus provider and appear in every
    /// shard's file name, so they cannot be discovered, only known.
    pub shard_counts: [u32; MAX_ORDER as usize],
}
//
impl LanguageInfo {
    /// Shard count for one n-gram order
    pub fn total_shards(&self, order: Order) -> u32 {
        assert!(
            (1..=MAX_ORDER).contains(&order),
            "n-gram order must be between 1 and {MAX_ORDER}"
        );
        self.shard_counts[usize::from(order) - 1]
    }
}

/// Languages this program can ingest, keyed by human-readable name
//
// NOTE: Adding a language requires knowing its per-order shard counts in
//       the 20200217 release; they are part of the shard URLs.
const SUPPORTED_LANGUAGES: &[(&str, LanguageInfo)] = &[(
    "English",
    LanguageInfo {
        short_name: "eng",
        shard_counts: [24, 589, 6881, 6668, 19423],
    },
)];
