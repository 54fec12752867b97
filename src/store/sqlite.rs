//! SQLite-backed [`ProductStore`] implementation.
//!
//! A collection named `c` is three SQLite objects:
//!
//! | Object | Kind | Purpose |
//! |--------|------|---------|
//! | `c` | table | Product rows, plus an `embedding` BLOB when vectors are enabled |
//! | `c_fts` | FTS5 | Full-text index over the four text fields |
//! | `c_vocab` | fts5vocab | Per-column term list used to expand fuzzy terms |
//!
//! Fuzzy search expands each query term into the indexed terms within its
//! edit budget (see [`crate::fuzzy`]), then runs a single FTS5 `MATCH`
//! restricted to the requested columns and ranked by BM25.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::fuzzy::{is_fuzzy_match, tokenize};
use crate::models::{ProductField, ProductHit, ProductRecord};

use super::{CollectionSchema, ProductStore};

/// SQLite implementation of the [`ProductStore`] trait.
///
/// The collection name is interpolated into SQL, so it must be a plain
/// identifier; `Config::validate` enforces that.
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    fn fts_table(&self) -> String {
        format!("{}_fts", self.collection)
    }

    fn vocab_table(&self) -> String {
        format!("{}_vocab", self.collection)
    }

    async fn collection_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(&self.collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn ensure_exists(&self) -> Result<()> {
        if !self.collection_exists().await? {
            bail!("collection '{}' does not exist", self.collection);
        }
        Ok(())
    }

    async fn create_objects(
        &self,
        conn: &mut SqliteConnection,
        schema: &CollectionSchema,
    ) -> Result<()> {
        let c = &self.collection;
        let vector_column = if schema.vector_dims.is_some() {
            ",\n                embedding BLOB"
        } else {
            ""
        };

        sqlx::query(&format!(
            r#"
            CREATE TABLE {c} (
                id TEXT PRIMARY KEY,
                product_name TEXT NOT NULL,
                tid TEXT NOT NULL,
                price_retail TEXT NOT NULL,
                url TEXT{vector_column}
            )
            "#
        ))
        .execute(&mut *conn)
        .await?;

        sqlx::query(&format!("CREATE INDEX idx_{c}_tid ON {c}(tid)"))
            .execute(&mut *conn)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE VIRTUAL TABLE {fts} USING fts5(
                doc_id UNINDEXED,
                product_name,
                tid,
                price_retail,
                url,
                tokenize = 'unicode61 remove_diacritics 0'
            )
            "#,
            fts = self.fts_table()
        ))
        .execute(&mut *conn)
        .await?;

        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE {vocab} USING fts5vocab({fts}, 'col')",
            vocab = self.vocab_table(),
            fts = self.fts_table()
        ))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn drop_objects(&self, conn: &mut SqliteConnection) -> Result<()> {
        // The vocab table reads from the FTS table, so drop it first.
        for table in [self.vocab_table(), self.fts_table(), self.collection.clone()] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

fn row_to_hit(row: &SqliteRow, score: f64) -> ProductHit {
    // The embedding column only exists for vector-enabled collections.
    let embedding = row
        .try_get::<Option<Vec<u8>>, _>("embedding")
        .ok()
        .flatten()
        .map(|blob| blob_to_vec(&blob));

    ProductHit {
        id: row.get("id"),
        score,
        record: ProductRecord {
            product_name: row.get("product_name"),
            tid: row.get("tid"),
            price_retail: row.get("price_retail"),
            url: row.get("url"),
            embedding,
        },
    }
}

/// Quotes a term as an FTS5 string literal.
fn fts_quote(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

#[async_trait]
impl ProductStore for SqliteStore {
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.create_objects(&mut *tx, schema).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.drop_objects(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop and recreate under one `BEGIN IMMEDIATE` transaction. Taking the
    /// write lock up front makes concurrent resets queue on `busy_timeout`
    /// instead of failing between the drop and the create.
    async fn replace_all(&self, schema: &CollectionSchema) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            self.drop_objects(&mut *conn).await?;
            self.create_objects(&mut *conn, schema).await
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(error = %rollback, "rollback after failed reset");
                }
                Err(e)
            }
        }
    }

    async fn index_document(&self, record: &ProductRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        match &record.embedding {
            Some(vector) => {
                sqlx::query(&format!(
                    "INSERT INTO {} (id, product_name, tid, price_retail, url, embedding) VALUES (?, ?, ?, ?, ?, ?)",
                    self.collection
                ))
                .bind(&id)
                .bind(&record.product_name)
                .bind(&record.tid)
                .bind(&record.price_retail)
                .bind(&record.url)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO {} (id, product_name, tid, price_retail, url) VALUES (?, ?, ?, ?, ?)",
                    self.collection
                ))
                .bind(&id)
                .bind(&record.product_name)
                .bind(&record.tid)
                .bind(&record.price_retail)
                .bind(&record.url)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(&format!(
            "INSERT INTO {} (doc_id, product_name, tid, price_retail, url) VALUES (?, ?, ?, ?, ?)",
            self.fts_table()
        ))
        .bind(&id)
        .bind(&record.product_name)
        .bind(&record.tid)
        .bind(&record.price_retail)
        .bind(&record.url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn exact_match(&self, field: ProductField, value: &str) -> Result<Vec<ProductHit>> {
        self.ensure_exists().await?;

        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY rowid",
            self.collection,
            field.column()
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row_to_hit(row, 1.0)).collect())
    }

    async fn fuzzy_match(
        &self,
        fields: &[ProductField],
        text: &str,
        limit: usize,
    ) -> Result<Vec<ProductHit>> {
        self.ensure_exists().await?;

        let query_terms = tokenize(text);
        if query_terms.is_empty() || fields.is_empty() {
            return Ok(Vec::new());
        }

        let columns: Vec<&str> = fields.iter().map(|f| f.column()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let vocab_sql = format!(
            "SELECT DISTINCT term FROM {} WHERE col IN ({})",
            self.vocab_table(),
            placeholders
        );
        let mut vocab_query = sqlx::query_scalar::<_, String>(&vocab_sql);
        for col in &columns {
            vocab_query = vocab_query.bind(*col);
        }
        let vocabulary = vocab_query.fetch_all(&self.pool).await?;

        let expanded: Vec<String> = vocabulary
            .into_iter()
            .filter(|term| query_terms.iter().any(|q| is_fuzzy_match(q, term)))
            .collect();

        if expanded.is_empty() {
            return Ok(Vec::new());
        }

        let match_expr = format!(
            "{{{}}} : ({})",
            columns.join(" "),
            expanded
                .iter()
                .map(|t| fts_quote(t))
                .collect::<Vec<_>>()
                .join(" OR ")
        );

        let rows = sqlx::query(&format!(
            r#"
            SELECT d.*, m.rank AS rank
            FROM (
                SELECT doc_id, rank FROM {fts}
                WHERE {fts} MATCH ?
                ORDER BY rank
                LIMIT ?
            ) m
            JOIN {c} d ON d.id = m.doc_id
            ORDER BY m.rank
            "#,
            fts = self.fts_table(),
            c = self.collection
        ))
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                // FTS5 rank is negative BM25; flip so larger is better.
                let rank: f64 = row.get("rank");
                row_to_hit(row, -rank)
            })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        if !self.collection_exists().await? {
            return Ok(0);
        }
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.collection))
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}
