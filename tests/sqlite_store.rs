//! SQLite index, memory and history stores against a throwaway database.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use salesbot::catalog::build_documents;
use salesbot::history::SqliteHistory;
use salesbot::sqlite_index::SqliteIndex;
use salesbot::{db, migrate};
use salesbot_core::embedding::Embedder;
use salesbot_core::history::HistoryStore;
use salesbot_core::index::{ConversationIndex, MetadataFilter, ProductIndex};
use salesbot_core::models::{Product, Sender};

// ─── Fixtures ───────────────────────────────────────────────────────

fn product(name: &str, category: &str, model: &str, price: f64) -> Product {
    let mut p = Product {
        name: name.to_string(),
        category: category.to_string(),
        model: model.to_string(),
        price,
        billing_ref: None,
        attributes: Default::default(),
    };
    if category == "Laptops" {
        p.attributes
            .insert("memory".to_string(), serde_json::json!("16GB"));
    }
    p
}

fn catalog() -> Vec<Product> {
    vec![
        product("Aero 14", "Laptops", "AERO-14", 800.0),
        product("Aero 15", "Laptops", "AERO-15", 950.0),
        product("Aero 16", "Laptops", "AERO-16", 1200.0),
        product("Pulse Buds", "Headphones", "PULSE-1", 120.0),
    ]
}

async fn open(tmp: &TempDir) -> SqliteIndex {
    let pool = db::connect_path(&tmp.path().join("data/salesbot.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    SqliteIndex::new(pool)
}

/// Three-word vocabulary embedder that counts calls.
struct VocabEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for VocabEmbedder {
    fn model_name(&self) -> &str {
        "vocab-3"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                ["laptop", "headphone", "tablet"]
                    .iter()
                    .map(|w| if t.contains(w) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

// ─── Product index ──────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_index_has_no_generation() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;
    assert_eq!(index.active_generation().await.unwrap(), None);
    assert_eq!(index.count().await.unwrap(), 0);
    assert!(index.search("laptop", 5, None).await.unwrap().is_empty());
    assert!(index.get_by_filter(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_and_keyword_search() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;

    let stats = index.publish(&build_documents(&catalog())).await.unwrap();
    assert_eq!(stats.generation, 1);
    assert_eq!(stats.products, 4);
    assert_eq!(index.count().await.unwrap(), 4);

    let hits = index.search("headphones", 5, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].product.name, "Pulse Buds");

    // Stemming: the singular matches the plural category.
    let hits = index.search("laptop", 5, None).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|d| d.product.category == "Laptops"));

    let none = index.search("refrigerator", 5, None).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_filters_and_catalog_order() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;
    index.publish(&build_documents(&catalog())).await.unwrap();

    let all = index.get_by_filter(None, 100).await.unwrap();
    let names: Vec<&str> = all.iter().map(|d| d.product.name.as_str()).collect();
    assert_eq!(names, vec!["Aero 14", "Aero 15", "Aero 16", "Pulse Buds"]);
    assert_eq!(all[0].id, "product_aero_14");

    let filter = MetadataFilter::category("Headphones");
    let hits = index.get_by_filter(Some(&filter), 10).await.unwrap();
    assert_eq!(hits.len(), 1);

    let filter = MetadataFilter::new("memory", "16GB");
    assert_eq!(index.get_by_filter(Some(&filter), 10).await.unwrap().len(), 3);

    let filter = MetadataFilter::category("Laptops");
    let hits = index.search("Laptops products", 2, Some(&filter)).await.unwrap();
    assert_eq!(hits.len(), 2);

    let bad = MetadataFilter::new("bad field", "x");
    assert!(index.get_by_filter(Some(&bad), 10).await.is_err());
}

#[tokio::test]
async fn test_republish_swaps_generation() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;
    index.publish(&build_documents(&catalog())).await.unwrap();

    let replacement = vec![product("Slate 11", "Tablets", "SLATE-11", 600.0)];
    let stats = index.publish(&build_documents(&replacement)).await.unwrap();
    assert_eq!(stats.generation, 2);
    assert_eq!(index.active_generation().await.unwrap(), Some(2));
    assert_eq!(index.count().await.unwrap(), 1);

    assert!(index.search("laptop", 5, None).await.unwrap().is_empty());
    let hits = index.search("tablets", 5, None).await.unwrap();
    assert_eq!(hits[0].product.name, "Slate 11");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(index.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1, "old generation rows are removed");
}

#[tokio::test]
async fn test_vector_search_and_reuse() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(VocabEmbedder {
        calls: AtomicUsize::new(0),
    });
    let shared: Arc<dyn Embedder> = embedder.clone();
    let index = open(&tmp).await.with_embedder(Some(shared), 2);
    let docs = build_documents(&catalog());

    let first = index.publish(&docs).await.unwrap();
    assert_eq!(first.embedded, 4);
    assert_eq!(first.reused, 0);

    let second = index.publish(&docs).await.unwrap();
    assert_eq!(second.embedded, 0);
    assert_eq!(second.reused, 4);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);

    let hits = index.search("wireless headphone", 2, None).await.unwrap();
    assert_eq!(hits[0].product.name, "Pulse Buds");

    let filter = MetadataFilter::category("Laptops");
    let hits = index.search("headphone", 5, Some(&filter)).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|d| d.product.category == "Laptops"));
}

#[tokio::test]
async fn test_vector_search_returns_top_k_without_shared_words() {
    let tmp = TempDir::new().unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(VocabEmbedder {
        calls: AtomicUsize::new(0),
    });
    let index = open(&tmp).await.with_embedder(Some(embedder), 8);
    index.publish(&build_documents(&catalog())).await.unwrap();

    let query = "what would you recommend for gaming?";
    assert_eq!(index.search(query, 2, None).await.unwrap().len(), 2);
    assert_eq!(index.search(query, 5, None).await.unwrap().len(), 4);
}

// ─── Conversation memory ────────────────────────────────────────────

#[tokio::test]
async fn test_remember_assigns_sequential_ids() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;

    assert_eq!(index.remember("s1", "hi", "hello").await.unwrap(), "s1-1");
    assert_eq!(index.remember("s1", "laptops?", "sure").await.unwrap(), "s1-2");
    assert_eq!(index.remember("s2", "yo", "hey").await.unwrap(), "s2-1");
    assert_eq!(index.memory_count().await.unwrap(), 3);

    assert_eq!(
        index.recall("s1", 10).await.unwrap(),
        vec!["User: hi\nBot: hello", "User: laptops?\nBot: sure"]
    );
    assert_eq!(
        index.recall("s1", 1).await.unwrap(),
        vec!["User: laptops?\nBot: sure"]
    );
}

#[tokio::test]
async fn test_concurrent_remember_never_collides() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let index = index.clone();
        handles.push(tokio::spawn(async move {
            index.remember("busy", &format!("q{}", i), "a").await
        }));
    }
    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

// ─── History ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_history_is_chronological_and_bounded() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp).await;
    let history = SqliteHistory::new(index.pool().clone());

    for i in 0..6 {
        let sender = if i % 2 == 0 { Sender::User } else { Sender::Agent };
        history.append("s1", sender, &format!("m{}", i)).await.unwrap();
    }
    history.append("other", Sender::User, "x").await.unwrap();

    assert_eq!(history.count("s1").await.unwrap(), 6);

    let all = history.recent("s1", 50).await.unwrap();
    let messages: Vec<&str> = all.iter().map(|t| t.message.as_str()).collect();
    assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
    assert_eq!(all[1].sender, Sender::Agent);

    let last = history.recent("s1", 4).await.unwrap();
    let messages: Vec<&str> = last.iter().map(|t| t.message.as_str()).collect();
    assert_eq!(messages, vec!["m2", "m3", "m4", "m5"]);

    assert!(history.recent("nobody", 10).await.unwrap().is_empty());
}
