//! SQL schema for the ngram store
//!
//! Executed at the start of every run; idempotent thanks to
//! `CREATE TABLE IF NOT EXISTS`.

pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS words (
    id     INTEGER PRIMARY KEY,
    word   TEXT NOT NULL UNIQUE,
    score  INTEGER NOT NULL
);

-- One fixed-width table per n-gram order. The uniqueness constraint over
-- the word-id tuple is a backstop: the shard ledger already prevents
-- re-ingestion, so a constraint trip means a control-flow bug or a corpus
-- that violates its sort-order contract.
CREATE TABLE IF NOT EXISTS two_grams (
    word1_id  INTEGER NOT NULL REFERENCES words(id),
    word2_id  INTEGER NOT NULL REFERENCES words(id),
    score     INTEGER NOT NULL,
    UNIQUE (word1_id, word2_id)
);

CREATE TABLE IF NOT EXISTS three_grams (
    word1_id  INTEGER NOT NULL REFERENCES words(id),
    word2_id  INTEGER NOT NULL REFERENCES words(id),
    word3_id  INTEGER NOT NULL REFERENCES words(id),
    score     INTEGER NOT NULL,
    UNIQUE (word1_id, word2_id, word3_id)
);

CREATE TABLE IF NOT EXISTS four_grams (
    word1_id  INTEGER NOT NULL REFERENCES words(id),
    word2_id  INTEGER NOT NULL REFERENCES words(id),
    word3_id  INTEGER NOT NULL REFERENCES words(id),
    word4_id  INTEGER NOT NULL REFERENCES words(id),
    score     INTEGER NOT NULL,
    UNIQUE (word1_id, word2_id, word3_id, word4_id)
);

CREATE TABLE IF NOT EXISTS five_grams (
    word1_id  INTEGER NOT NULL REFERENCES words(id),
    word2_id  INTEGER NOT NULL REFERENCES words(id),
    word3_id  INTEGER NOT NULL REFERENCES words(id),
    word4_id  INTEGER NOT NULL REFERENCES words(id),
    word5_id  INTEGER NOT NULL REFERENCES words(id),
    score     INTEGER NOT NULL,
    UNIQUE (word1_id, word2_id, word3_id, word4_id, word5_id)
);

-- Ledger of fully ingested shards. A row is only ever written in the same
-- transaction as the shard's data rows.
CREATE TABLE IF NOT EXISTS fetched_shards (
    ngram_order  INTEGER NOT NULL,
    shard_index  INTEGER NOT NULL,
    PRIMARY KEY (ngram_order, shard_index)
);
";
