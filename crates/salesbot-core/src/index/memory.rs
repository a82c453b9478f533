//! In-memory index for tests and single-process deployments.
//!
//! The catalog lives behind `RwLock<Arc<_>>`: [`InMemoryIndex::replace`]
//! and [`InMemoryIndex::publish`] swap it in one write, so a reader sees
//! either the old or the new catalog, never a mix.
//!
//! With an [`Embedder`] and a catalog published through
//! [`InMemoryIndex::publish`], search is a cosine scan that always returns
//! the `top_k` nearest documents. Otherwise it falls back to term-overlap
//! scoring over the rendered document text.

use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{Product, ProductDocument};

use super::{memory_document, ConversationIndex, MetadataFilter, ProductIndex};

struct MemoryEntry {
    id: String,
    session_id: String,
    text: String,
}

/// A published catalog. `vectors` is either empty or parallel to `docs`.
#[derive(Default)]
struct Catalog {
    docs: Vec<ProductDocument>,
    vectors: Vec<Vec<f32>>,
}

/// In-memory product and conversation index.
pub struct InMemoryIndex {
    products: RwLock<Arc<Catalog>>,
    memories: RwLock<Vec<MemoryEntry>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            products: RwLock::new(Arc::new(Catalog::default())),
            memories: RwLock::new(Vec::new()),
            embedder: None,
        }
    }

    /// Build an index preloaded with `products`, ranked by keywords.
    pub fn with_products(products: &[Product]) -> Self {
        let index = Self::new();
        index.replace(products.iter().map(Product::to_document).collect());
        index
    }

    /// Rank by vector similarity for catalogs loaded with [`publish`](Self::publish).
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Publish a new catalog without vectors, replacing the previous one atomically.
    pub fn replace(&self, docs: Vec<ProductDocument>) {
        *self.products.write().unwrap() = Arc::new(Catalog {
            docs,
            vectors: Vec::new(),
        });
    }

    /// Embed `docs` (when an embedder is set) and swap them in as the catalog.
    pub async fn publish(&self, docs: Vec<ProductDocument>) -> Result<()> {
        let vectors = match &self.embedder {
            Some(embedder) if !docs.is_empty() => {
                let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
                let vectors = embedder.embed(&texts).await?;
                if vectors.len() != docs.len() {
                    bail!(
                        "Embedder returned {} vectors for {} documents",
                        vectors.len(),
                        docs.len()
                    );
                }
                vectors
            }
            _ => Vec::new(),
        };
        *self.products.write().unwrap() = Arc::new(Catalog { docs, vectors });
        Ok(())
    }

    fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.products.read().unwrap())
    }

    async fn nearest(
        &self,
        embedder: &dyn Embedder,
        catalog: &Catalog,
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
        let mut scored: Vec<(f32, &ProductDocument)> = catalog
            .docs
            .iter()
            .zip(&catalog.vectors)
            .filter(|(d, _)| filter.map_or(true, |f| f.matches(d)))
            .map(|(d, v)| (cosine_similarity(&query_vec, v), d))
            .collect();
        // Stable: equal similarity keeps catalog order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased alphanumeric terms of `text`.
pub fn query_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ProductIndex for InMemoryIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ProductDocument>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let catalog = self.snapshot();
        if let Some(embedder) = &self.embedder {
            if !catalog.vectors.is_empty() {
                return self
                    .nearest(embedder.as_ref(), &catalog, query, top_k, filter)
                    .await;
            }
        }

        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, &ProductDocument)> = catalog
            .docs
            .iter()
            .filter(|d| filter.map_or(true, |f| f.matches(d)))
            .filter_map(|d| {
                let text = d.text.to_lowercase();
                let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (hits > 0).then_some((hits, d))
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn get_by_filter(
        &self,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ProductDocument>> {
        let catalog = self.snapshot();
        Ok(catalog
            .docs
            .iter()
            .filter(|d| filter.map_or(true, |f| f.matches(d)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.snapshot().docs.len())
    }
}

#[async_trait]
impl ConversationIndex for InMemoryIndex {
    async fn remember(
        &self,
        session_id: &str,
        user_message: &str,
        reply: &str,
    ) -> Result<String> {
        let mut memories = self.memories.write().unwrap();
        let n = memories
            .iter()
            .filter(|m| m.session_id == session_id)
            .count()
            + 1;
        let id = format!("{}-{}", session_id, n);
        memories.push(MemoryEntry {
            id: id.clone(),
            session_id: session_id.to_string(),
            text: memory_document(user_message, reply),
        });
        Ok(id)
    }

    async fn recall(&self, session_id: &str, limit: usize) -> Result<Vec<String>> {
        let memories = self.memories.read().unwrap();
        let mine: Vec<&MemoryEntry> = memories
            .iter()
            .filter(|m| m.session_id == session_id)
            .collect();
        let skip = mine.len().saturating_sub(limit);
        Ok(mine.into_iter().skip(skip).map(|m| m.text.clone()).collect())
    }

    async fn memory_count(&self) -> Result<usize> {
        Ok(self.memories.read().unwrap().len())
    }
}

impl InMemoryIndex {
    /// Ids of remembered exchanges for a session, oldest first.
    pub fn memory_ids(&self, session_id: &str) -> Vec<String> {
        self.memories
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| m.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LetterEmbedder;

    fn product(name: &str, category: &str, price: f64) -> Product {
        Product {
            name: name.to_string(),
            category: category.to_string(),
            model: name.to_uppercase().replace(' ', "-"),
            price,
            billing_ref: None,
            attributes: Default::default(),
        }
    }

    fn catalog() -> InMemoryIndex {
        InMemoryIndex::with_products(&[
            product("Aero 14", "Laptops", 950.0),
            product("Pulse Buds", "Headphones", 120.0),
            product("Aero 16", "Laptops", 1200.0),
        ])
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let index = catalog();
        let hits = index.search("aero laptops", 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|d| d.product.category == "Laptops"));
    }

    #[tokio::test]
    async fn test_search_with_filter() {
        let index = catalog();
        let filter = MetadataFilter::category("Headphones");
        let hits = index.search("products buds", 5, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product.name, "Pulse Buds");
    }

    #[tokio::test]
    async fn test_get_by_filter_and_count() {
        let index = catalog();
        assert_eq!(index.count().await.unwrap(), 3);
        let all = index.get_by_filter(None, 2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].product.name, "Aero 14");
    }

    #[tokio::test]
    async fn test_replace_swaps_catalog() {
        let index = catalog();
        index.replace(vec![product("Solo", "Tablets", 300.0).to_document()]);
        assert_eq!(index.count().await.unwrap(), 1);
        assert!(index.search("aero", 5, None).await.unwrap().is_empty());
    }

    async fn embedded_catalog() -> InMemoryIndex {
        let index = InMemoryIndex::new().with_embedder(Arc::new(LetterEmbedder));
        let docs = [
            product("Aero 14", "Laptops", 950.0),
            product("Pulse Buds", "Headphones", 120.0),
            product("Aero 16", "Laptops", 1200.0),
        ]
        .iter()
        .map(Product::to_document)
        .collect();
        index.publish(docs).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_vector_search_returns_nearest_without_shared_words() {
        let index = embedded_catalog().await;
        let hits = index.search("what would you recommend?", 5, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        let hits = index.search("what would you recommend?", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_vector_search_honours_filter() {
        let index = embedded_catalog().await;
        let filter = MetadataFilter::category("Laptops");
        let hits = index.search("anything at all", 5, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|d| d.product.category == "Laptops"));
    }

    #[tokio::test]
    async fn test_replace_without_vectors_uses_keywords() {
        let index = embedded_catalog().await;
        index.replace(vec![product("Solo", "Tablets", 300.0).to_document()]);
        assert!(index.search("gaming", 5, None).await.unwrap().is_empty());
        assert_eq!(index.search("tablets", 5, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remember_assigns_sequential_ids() {
        let index = InMemoryIndex::new();
        let a = index.remember("s1", "hi", "hello").await.unwrap();
        let b = index.remember("s1", "laptops?", "sure").await.unwrap();
        index.remember("s2", "x", "y").await.unwrap();
        assert_eq!(a, "s1-1");
        assert_eq!(b, "s1-2");
        assert_eq!(index.memory_ids("s1"), vec!["s1-1", "s1-2"]);

        let recalled = index.recall("s1", 1).await.unwrap();
        assert_eq!(recalled, vec!["User: laptops?\nBot: sure".to_string()]);
        assert_eq!(index.memory_count().await.unwrap(), 3);
    }
}
