//! SQLite persistence for words, ngram records and the shard ledger
//!
//! All database access goes through [`tokio_rusqlite`], which runs it on
//! one dedicated thread off the async runtime. That thread doubles as the
//! pipeline's single writer lane: SQLite's write path gains nothing from
//! concurrent writers, so they are serialized here instead of contending
//! inside the storage engine.

mod schema;

use crate::{Order, Score, Shard, WordId};
use rusqlite::{params, params_from_iter, OptionalExtension as _};
use std::path::Path;
use thiserror::Error;

/// Errors from the storage boundary
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    /// Only orders 2 through 5 have an ngram table; order 1 has the words
    /// table with its own insert path.
    #[error("no ngram table for order {0}")]
    UnsupportedOrder(Order),

    #[error("row holds {found} word ids, the {expected}-gram table needs exactly {expected}")]
    WrongArity { expected: Order, found: usize },

    #[error("score {0} does not fit the storage integer type")]
    ScoreOverflow(Score),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Order-1 storage row: one word and its aggregate score
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WordRow {
    pub word: Box<str>,
    pub score: Score,
}

/// Order-k storage row: k word identifiers and an aggregate score
///
/// One shape serves every order; `word_ids.len()` must equal the target
/// shard's order, which the insert path checks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NgramRow {
    pub word_ids: Vec<WordId>,
    pub score: Score,
}

/// The ngram database
///
/// Cloning is cheap — the inner connection is reference-counted, and every
/// clone funnels into the same serialized writer lane.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}
//
impl SqliteStore {
    /// Open (or create) a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref().to_owned()).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory database — useful for testing
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Ok(Self { conn })
    }

    /// Create any table that does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(schema::SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Truth that a shard was fully ingested by this or an earlier run
    pub async fn is_shard_done(&self, shard: Shard) -> Result<bool> {
        let done = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT 1 FROM fetched_shards
                         WHERE ngram_order = ?1 AND shard_index = ?2",
                        params![shard.order, shard.index],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some())
            })
            .await?;
        Ok(done)
    }

    /// Commit an order-1 shard: upsert its words and mark the shard done,
    /// all in one transaction
    ///
    /// A word already present (from another shard of the corpus) keeps its
    /// id and has the new score added onto its total.
    pub async fn insert_words(&self, shard: Shard, rows: Vec<WordRow>) -> Result<()> {
        let rows = rows
            .into_iter()
            .map(|row| Ok((String::from(row.word), encode_score(row.score)?)))
            .collect::<Result<Vec<_>>>()?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO words (word, score) VALUES (?1, ?2)
                         ON CONFLICT (word) DO UPDATE SET score = score + excluded.score",
                    )?;
                    for (word, score) in &rows {
                        stmt.execute(params![word, score])?;
                    }
                }
                mark_shard_done(&tx, shard)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Commit an order-k shard (k ≥ 2): insert its resolved rows and mark
    /// the shard done, all in one transaction
    pub async fn insert_ngrams(&self, shard: Shard, rows: Vec<NgramRow>) -> Result<()> {
        let sql = ngram_insert_sql(shard.order)?;
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            if row.word_ids.len() != usize::from(shard.order) {
                return Err(Error::WrongArity {
                    expected: shard.order,
                    found: row.word_ids.len(),
                });
            }
            let mut values = row.word_ids;
            values.push(encode_score(row.score)?);
            encoded.push(values);
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(sql)?;
                    for values in &encoded {
                        stmt.execute(params_from_iter(values.iter().copied()))?;
                    }
                }
                mark_shard_done(&tx, shard)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert one word (or add onto its score) and return its id
    pub async fn create_word(&self, word: &str, score: Score) -> Result<WordId> {
        let word = word.to_owned();
        let score = encode_score(score)?;
        let id = self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    "INSERT INTO words (word, score) VALUES (?1, ?2)
                     ON CONFLICT (word) DO UPDATE SET score = score + excluded.score
                     RETURNING id",
                    params![word, score],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    /// Id of a word, if it has a row
    pub async fn find_word_id(&self, word: &str) -> Result<Option<WordId>> {
        let word = word.to_owned();
        let id = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id FROM words WHERE word = ?1",
                        params![word],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(id)
    }

    /// Scan every committed word row, for word index construction
    pub async fn all_words(&self) -> Result<Vec<(WordId, String)>> {
        let words = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, word FROM words")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(words)
    }

    /// Rebuild the database file to reclaim free pages after ingestion
    pub async fn compact(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("VACUUM")?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Record a shard in the ledger, within the caller's transaction
fn mark_shard_done(conn: &rusqlite::Connection, shard: Shard) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO fetched_shards (ngram_order, shard_index) VALUES (?1, ?2)",
        params![shard.order, shard.index],
    )?;
    Ok(())
}

/// Insert statement for one ngram order's table
fn ngram_insert_sql(order: Order) -> Result<&'static str> {
    match order {
        2 => Ok("INSERT INTO two_grams (word1_id, word2_id, score) VALUES (?1, ?2, ?3)"),
        3 => Ok("INSERT INTO three_grams (word1_id, word2_id, word3_id, score) \
                 VALUES (?1, ?2, ?3, ?4)"),
        4 => Ok("INSERT INTO four_grams (word1_id, word2_id, word3_id, word4_id, score) \
                 VALUES (?1, ?2, ?3, ?4, ?5)"),
        5 => Ok(
            "INSERT INTO five_grams (word1_id, word2_id, word3_id, word4_id, word5_id, score) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        ),
        _ => Err(Error::UnsupportedOrder(order)),
    }
}

/// Name of one ngram order's table
#[cfg(test)]
fn ngram_table(order: Order) -> Result<&'static str> {
    match order {
        2 => Ok("two_grams"),
        3 => Ok("three_grams"),
        4 => Ok("four_grams"),
        5 => Ok("five_grams"),
        _ => Err(Error::UnsupportedOrder(order)),
    }
}

/// Scores are u64 in the pipeline but SQLite integers are signed
fn encode_score(score: Score) -> Result<i64> {
    i64::try_from(score).map_err(|_| Error::ScoreOverflow(score))
}

// Extra read paths that only the tests need
#[cfg(test)]
impl SqliteStore {
    /// Number of word rows
    pub(crate) async fn count_words(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM words".to_owned()).await
    }

    /// Number of rows in one ngram order's table
    pub(crate) async fn count_ngrams(&self, order: Order) -> Result<i64> {
        let table = ngram_table(order)?;
        self.count(format!("SELECT COUNT(*) FROM {table}")).await
    }

    /// Aggregate score of a word, if present
    pub(crate) async fn word_score(&self, word: &str) -> Result<Option<i64>> {
        let word = word.to_owned();
        let score = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT score FROM words WHERE word = ?1",
                        params![word],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(score)
    }

    /// Aggregate score of an ngram identified by its word-id tuple
    pub(crate) async fn ngram_score(&self, word_ids: &[WordId]) -> Result<Option<i64>> {
        let order = Order::try_from(word_ids.len()).map_err(|_| Error::UnsupportedOrder(0))?;
        let table = ngram_table(order)?;
        let conditions = (1..=word_ids.len())
            .map(|i| format!("word{i}_id = ?{i}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT score FROM {table} WHERE {conditions}");
        let word_ids = word_ids.to_vec();
        let score = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, params_from_iter(word_ids.iter().copied()), |row| {
                        row.get(0)
                    })
                    .optional()?)
            })
            .await?;
        Ok(score)
    }

    async fn count(&self, sql: String) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory()
            .await
            .expect("in-memory store");
        store.migrate().await.expect("migration");
        store
    }

    fn shard(order: Order, index: u32) -> Shard {
        Shard { order, index }
    }

    fn word_row(word: &str, score: Score) -> WordRow {
        WordRow {
            word: word.into(),
            score,
        }
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let s = store().await;
        s.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn ledger_starts_empty_and_records_commits() {
        let s = store().await;
        assert!(!s.is_shard_done(shard(1, 0)).await.unwrap());

        s.insert_words(shard(1, 0), vec![word_row("the", 5)])
            .await
            .unwrap();

        assert!(s.is_shard_done(shard(1, 0)).await.unwrap());
        assert!(!s.is_shard_done(shard(1, 1)).await.unwrap());
        assert!(!s.is_shard_done(shard(2, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn word_upsert_sums_scores_and_keeps_ids() {
        let s = store().await;
        s.insert_words(shard(1, 0), vec![word_row("the", 5), word_row("cat", 2)])
            .await
            .unwrap();
        let the_id = s.find_word_id("the").await.unwrap().unwrap();

        // The same word surfacing in another shard merges into one row
        s.insert_words(shard(1, 1), vec![word_row("the", 7)])
            .await
            .unwrap();

        assert_eq!(s.find_word_id("the").await.unwrap(), Some(the_id));
        assert_eq!(s.word_score("the").await.unwrap(), Some(12));
        assert_eq!(s.word_score("cat").await.unwrap(), Some(2));
        assert_eq!(s.count_words().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn create_and_find_word() {
        let s = store().await;
        assert_eq!(s.find_word_id("cat").await.unwrap(), None);

        let id = s.create_word("cat", 3).await.unwrap();
        assert!(id >= 1);
        assert_eq!(s.find_word_id("cat").await.unwrap(), Some(id));

        // Creating again merges rather than duplicating
        assert_eq!(s.create_word("cat", 4).await.unwrap(), id);
        assert_eq!(s.word_score("cat").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn ngram_batch_commits_rows_and_ledger_together() {
        let s = store().await;
        let the = s.create_word("the", 10).await.unwrap();
        let cat = s.create_word("cat", 5).await.unwrap();

        s.insert_ngrams(
            shard(2, 3),
            vec![
                NgramRow {
                    word_ids: vec![the, cat],
                    score: 4,
                },
                NgramRow {
                    word_ids: vec![cat, the],
                    score: 2,
                },
            ],
        )
        .await
        .unwrap();

        assert_eq!(s.count_ngrams(2).await.unwrap(), 2);
        assert_eq!(s.ngram_score(&[the, cat]).await.unwrap(), Some(4));
        assert!(s.is_shard_done(shard(2, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_rows_and_no_ledger_mark() {
        let s = store().await;
        let the = s.create_word("the", 10).await.unwrap();
        let cat = s.create_word("cat", 5).await.unwrap();

        // The duplicate tuple trips the uniqueness backstop mid-batch; the
        // whole transaction, ledger mark included, must vanish.
        let result = s
            .insert_ngrams(
                shard(2, 0),
                vec![
                    NgramRow {
                        word_ids: vec![the, cat],
                        score: 4,
                    },
                    NgramRow {
                        word_ids: vec![the, cat],
                        score: 9,
                    },
                ],
            )
            .await;

        assert!(result.is_err());
        assert_eq!(s.count_ngrams(2).await.unwrap(), 0);
        assert!(!s.is_shard_done(shard(2, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn arity_mismatch_is_rejected_up_front() {
        let s = store().await;
        let the = s.create_word("the", 10).await.unwrap();

        let result = s
            .insert_ngrams(
                shard(2, 0),
                vec![NgramRow {
                    word_ids: vec![the, the, the],
                    score: 1,
                }],
            )
            .await;

        assert!(matches!(
            result,
            Err(Error::WrongArity {
                expected: 2,
                found: 3,
            })
        ));
        assert!(!s.is_shard_done(shard(2, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn order_one_has_no_ngram_table() {
        let s = store().await;
        let result = s.insert_ngrams(shard(1, 0), vec![]).await;
        assert!(matches!(result, Err(Error::UnsupportedOrder(1))));
    }

    #[tokio::test]
    async fn all_words_returns_every_row() {
        let s = store().await;
        let the = s.create_word("the", 10).await.unwrap();
        let cat = s.create_word("cat", 5).await.unwrap();

        let mut words = s.all_words().await.unwrap();
        words.sort();
        assert_eq!(
            words,
            vec![(the, "the".to_owned()), (cat, "cat".to_owned())]
        );
    }

    #[tokio::test]
    async fn compact_runs_after_ingestion() {
        let s = store().await;
        s.create_word("the", 10).await.unwrap();
        s.compact().await.unwrap();
    }
}
