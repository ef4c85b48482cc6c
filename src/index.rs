//! Word identifier lookup and n-gram resolution
//!
//! After every order-1 shard is committed, the words table is scanned once
//! into an in-memory index. From then on the index is immutable: workers of
//! every higher order share it read-only, and tokens it does not know are
//! dropped rather than added (a word that never survived order-1 validation
//! has no identifier to resolve to).

use crate::{parse::AggregatedEntry, storage::NgramRow, WordId};
use radix_trie::{Trie, TrieCommon};

/// Immutable text → word id lookup over the committed order-1 rows
///
/// Backed by a prefix tree, so a lookup costs O(word length) no matter how
/// many millions of distinct words the corpus holds.
pub struct WordIndex {
    trie: Trie<String, WordId>,
}
//
impl WordIndex {
    /// Build the index from committed word rows
    pub fn build(words: impl IntoIterator<Item = (WordId, String)>) -> Self {
        let mut trie = Trie::new();
        for (id, word) in words {
            trie.insert(word, id);
        }
        Self { trie }
    }

    /// Identifier of a word, if it was ingested during order-1 processing
    pub fn lookup(&self, word: &str) -> Option<WordId> {
        self.trie.get(word).copied()
    }

    /// Number of indexed words
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    /// Truth that the index holds no words at all
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

/// Resolve a parsed ngram into the ids of its component words
///
/// All-or-nothing: if any token is absent from the index the ngram is
/// dropped (`None`). That is expected corpus noise, not an error. The score
/// passes through unchanged.
pub fn resolve_ngram(index: &WordIndex, entry: &AggregatedEntry) -> Option<NgramRow> {
    let mut word_ids = Vec::with_capacity(entry.tokens.len());
    for token in &entry.tokens {
        word_ids.push(index.lookup(token)?);
    }
    Some(NgramRow {
        word_ids,
        score: entry.score,
    })
}
