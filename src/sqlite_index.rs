//! SQLite-backed [`ProductIndex`] and [`ConversationIndex`].
//!
//! # Catalog generations
//!
//! Every [`SqliteIndex::publish`] writes the whole catalog under a fresh
//! generation number, then flips `catalog_state.active_generation` in one
//! statement, then deletes older generations. Readers always filter on the
//! active generation, so a reload never leaves search without a catalog.
//!
//! # Ranking
//!
//! With an embedder configured and vectors stored for its model, search is
//! brute-force cosine similarity over `product_vectors`. Otherwise it is
//! FTS5 BM25 over the rendered documents. Equal scores keep catalog order.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use salesbot_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use salesbot_core::index::memory::query_terms;
use salesbot_core::index::{memory_document, ConversationIndex, MetadataFilter, ProductIndex};
use salesbot_core::models::{Product, ProductDocument};

use crate::embedding::embed_batched;

const ACTIVE_GENERATION: &str = "active_generation";

/// Outcome of one catalog publication.
#[derive(Debug, Clone, Default)]
pub struct PublishStats {
    pub generation: i64,
    pub products: usize,
    /// Vectors computed by the embedding provider.
    pub embedded: usize,
    /// Vectors reused from a previous generation with identical text.
    pub reused: usize,
}

/// SQLite implementation of the index traits.
#[derive(Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
    batch_size: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            embedder: None,
            batch_size: 64,
        }
    }

    /// Rank by vector similarity using `embedder` when vectors exist.
    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>, batch_size: usize) -> Self {
        self.embedder = embedder;
        self.batch_size = batch_size;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn active_generation(&self) -> Result<Option<i64>> {
        let generation: Option<i64> =
            sqlx::query_scalar("SELECT value FROM catalog_state WHERE key = ?")
                .bind(ACTIVE_GENERATION)
                .fetch_optional(&self.pool)
                .await?;
        Ok(generation)
    }

    /// Publish `docs` as the new catalog.
    pub async fn publish(&self, docs: &[ProductDocument]) -> Result<PublishStats> {
        let generation: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(g), 0) + 1 FROM (
                SELECT generation AS g FROM products
                UNION ALL
                SELECT value AS g FROM catalog_state WHERE key = ?
            )
            "#,
        )
        .bind(ACTIVE_GENERATION)
        .fetch_one(&self.pool)
        .await?;

        let hashes: Vec<String> = docs.iter().map(|d| content_hash(&d.text)).collect();
        let mut stats = PublishStats {
            generation,
            products: docs.len(),
            ..Default::default()
        };
        let vectors = match &self.embedder {
            Some(embedder) => Some(
                self.vectors_for(embedder.as_ref(), docs, &hashes, &mut stats)
                    .await?,
            ),
            None => None,
        };

        // Phase 1: write the new generation.
        let mut tx = self.pool.begin().await?;
        for (seq, (doc, hash)) in docs.iter().zip(&hashes).enumerate() {
            let metadata_json = serde_json::to_string(&doc.product)?;
            sqlx::query(
                r#"
                INSERT INTO products (generation, id, seq, name, category, model, price,
                                      document, metadata_json, content_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(generation)
            .bind(&doc.id)
            .bind(seq as i64)
            .bind(&doc.product.name)
            .bind(&doc.product.category)
            .bind(&doc.product.model)
            .bind(doc.product.price)
            .bind(&doc.text)
            .bind(&metadata_json)
            .bind(hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO products_fts (generation, id, document) VALUES (?, ?, ?)")
                .bind(generation)
                .bind(&doc.id)
                .bind(&doc.text)
                .execute(&mut *tx)
                .await?;

            if let (Some(vectors), Some(embedder)) = (&vectors, &self.embedder) {
                let vector = &vectors[seq];
                sqlx::query(
                    r#"
                    INSERT INTO product_vectors (generation, id, model, dims, content_hash, embedding)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(generation)
                .bind(&doc.id)
                .bind(embedder.model_name())
                .bind(vector.len() as i64)
                .bind(hash)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        // Phase 2: swap the pointer.
        sqlx::query(
            r#"
            INSERT INTO catalog_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(ACTIVE_GENERATION)
        .bind(generation)
        .execute(&self.pool)
        .await?;

        // Phase 3: drop everything that is not the active generation.
        for table in ["products", "products_fts", "product_vectors"] {
            sqlx::query(&format!("DELETE FROM {} WHERE generation != ?", table))
                .bind(generation)
                .execute(&self.pool)
                .await?;
        }

        tracing::info!(
            generation,
            products = stats.products,
            embedded = stats.embedded,
            reused = stats.reused,
            "catalog published"
        );
        Ok(stats)
    }

    /// One vector per doc, reusing stored vectors whose text hash and model match.
    async fn vectors_for(
        &self,
        embedder: &dyn Embedder,
        docs: &[ProductDocument],
        hashes: &[String],
        stats: &mut PublishStats,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(docs.len());
        for hash in hashes {
            let cached: Option<Vec<u8>> = sqlx::query_scalar(
                "SELECT embedding FROM product_vectors WHERE content_hash = ? AND model = ? LIMIT 1",
            )
            .bind(hash)
            .bind(embedder.model_name())
            .fetch_optional(&self.pool)
            .await?;
            vectors.push(cached.map(|b| blob_to_vec(&b)));
        }

        let missing: Vec<usize> = (0..docs.len()).filter(|&i| vectors[i].is_none()).collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| docs[i].text.clone()).collect();
            let fresh = embed_batched(embedder, &texts, self.batch_size).await?;
            for (i, v) in missing.iter().zip(fresh) {
                vectors[*i] = Some(v);
            }
        }
        stats.embedded = missing.len();
        stats.reused = docs.len() - missing.len();

        vectors
            .into_iter()
            .map(|v| v.ok_or_else(|| anyhow::anyhow!("missing embedding vector")))
            .collect()
    }

    async fn has_vectors(&self, generation: i64, model: &str) -> Result<bool> {
        let present: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM product_vectors WHERE generation = ? AND model = ?",
        )
        .bind(generation)
        .bind(model)
        .fetch_one(&self.pool)
        .await?;
        Ok(present)
    }

    async fn vector_search(
        &self,
        embedder: &dyn Embedder,
        generation: i64,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ProductDocument>> {
        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        let (clause, binds) = filter_clause(filter)?;
        let sql = format!(
            r#"
            SELECT p.id, p.document, p.metadata_json, v.embedding
            FROM products p
            JOIN product_vectors v ON v.generation = p.generation AND v.id = p.id
            WHERE p.generation = ? AND v.model = ? {}
            ORDER BY p.seq
            "#,
            clause
        );
        let mut q = sqlx::query(&sql).bind(generation).bind(embedder.model_name());
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut scored: Vec<(f32, ProductDocument)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let sim = cosine_similarity(&query_vec, &blob_to_vec(&blob));
            scored.push((sim, row_to_document(row)?));
        }
        // Stable: equal similarity keeps catalog order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(top_k).map(|(_, d)| d).collect())
    }

    async fn keyword_search(
        &self,
        generation: i64,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ProductDocument>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let (clause, binds) = filter_clause(filter)?;
        let sql = format!(
            r#"
            SELECT p.id, p.document, p.metadata_json
            FROM products_fts
            JOIN products p ON p.generation = products_fts.generation AND p.id = products_fts.id
            WHERE products_fts MATCH ? AND products_fts.generation = ? {}
            ORDER BY bm25(products_fts), p.seq
            LIMIT ?
            "#,
            clause
        );
        let mut q = sqlx::query(&sql).bind(fts_query).bind(generation);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.bind(top_k as i64).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }
}

/// SHA-256 of a document's text, used to reuse vectors across reloads.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Quote every term so user text can never be parsed as FTS5 syntax.
fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// `AND ...` fragment plus binds for an optional metadata filter.
fn filter_clause(filter: Option<&MetadataFilter>) -> Result<(String, Vec<String>)> {
    let Some(f) = filter else {
        return Ok((String::new(), Vec::new()));
    };
    let clause = match f.field.as_str() {
        "name" | "category" | "model" => format!("AND p.{} = ?", f.field),
        "price" => "AND p.price = CAST(? AS REAL)".to_string(),
        field if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
            format!("AND CAST(json_extract(p.metadata_json, '$.{}') AS TEXT) = ?", field)
        }
        other => bail!("Unsupported metadata filter field: '{}'", other),
    };
    Ok((clause, vec![f.value.clone()]))
}

fn row_to_document(row: &SqliteRow) -> Result<ProductDocument> {
    let metadata_json: String = row.get("metadata_json");
    let product: Product = serde_json::from_str(&metadata_json)?;
    Ok(ProductDocument {
        id: row.get("id"),
        text: row.get("document"),
        product,
    })
}

#[async_trait]
impl ProductIndex for SqliteIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ProductDocument>> {
        let Some(generation) = self.active_generation().await? else {
            return Ok(Vec::new());
        };
        if let Some(embedder) = &self.embedder {
            if self.has_vectors(generation, embedder.model_name()).await? {
                return self
                    .vector_search(embedder.as_ref(), generation, query, top_k, filter)
                    .await;
            }
            tracing::debug!(
                model = embedder.model_name(),
                "no vectors for model, using keyword ranking"
            );
        }
        self.keyword_search(generation, query, top_k, filter).await
    }

    async fn get_by_filter(
        &self,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ProductDocument>> {
        let Some(generation) = self.active_generation().await? else {
            return Ok(Vec::new());
        };
        let (clause, binds) = filter_clause(filter)?;
        let sql = format!(
            "SELECT p.id, p.document, p.metadata_json FROM products p WHERE p.generation = ? {} ORDER BY p.seq LIMIT ?",
            clause
        );
        let mut q = sqlx::query(&sql).bind(generation);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.bind(limit as i64).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn count(&self) -> Result<usize> {
        let Some(generation) = self.active_generation().await? else {
            return Ok(0);
        };
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE generation = ?")
            .bind(generation)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[async_trait]
impl ConversationIndex for SqliteIndex {
    async fn remember(
        &self,
        session_id: &str,
        user_message: &str,
        reply: &str,
    ) -> Result<String> {
        // Sequence allocation and insert are one statement, so concurrent
        // writers for a session cannot collide.
        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO conversation_memory (id, session_id, seq, document, created_at)
            SELECT ? || '-' || (COALESCE(MAX(seq), 0) + 1), ?, COALESCE(MAX(seq), 0) + 1, ?, ?
            FROM conversation_memory WHERE session_id = ?
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(session_id)
        .bind(memory_document(user_message, reply))
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn recall(&self, session_id: &str, limit: usize) -> Result<Vec<String>> {
        let docs: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT document FROM (
                SELECT document, seq FROM conversation_memory
                WHERE session_id = ?
                ORDER BY seq DESC
                LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    async fn memory_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_memory")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("laptops \"OR\" NEAR(x)").as_deref(),
            Some("\"laptops\" OR \"or\" OR \"near\" OR \"x\"")
        );
        assert_eq!(fts_query("?!"), None);
    }

    #[test]
    fn test_filter_clause() {
        let (sql, binds) = filter_clause(Some(&MetadataFilter::category("Laptops"))).unwrap();
        assert_eq!(sql, "AND p.category = ?");
        assert_eq!(binds, vec!["Laptops".to_string()]);

        let (sql, _) = filter_clause(Some(&MetadataFilter::new("memory", "16GB"))).unwrap();
        assert!(sql.contains("json_extract(p.metadata_json, '$.memory')"));

        assert!(filter_clause(Some(&MetadataFilter::new("x'); DROP", "1"))).is_err());
        assert_eq!(filter_clause(None).unwrap().0, "");
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
