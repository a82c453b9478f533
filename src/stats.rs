//! Catalog and conversation statistics.
//!
//! Used by `salesbot stats` to confirm a catalog load landed: product and
//! vector counts for the active generation, stored conversations, a
//! per-category breakdown, and a sample search.

use anyhow::Result;
use sqlx::Row;

use salesbot_core::index::{ConversationIndex, ProductIndex};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_index::SqliteIndex;

const SAMPLE_QUERY: &str = "laptop";
const SAMPLE_RESULTS: usize = 3;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let embedder = create_provider(&config.embedding)?;
    let index = SqliteIndex::new(pool.clone()).with_embedder(embedder, config.embedding.batch_size);

    let generation = index.active_generation().await?;
    let products = index.count().await?;
    let memories = index.memory_count().await?;

    let embedded: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM product_vectors WHERE generation = \
         (SELECT value FROM catalog_state WHERE key = 'active_generation')",
    )
    .fetch_one(&pool)
    .await?;
    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages")
        .fetch_one(&pool)
        .await?;
    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT session_id) FROM chat_messages")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Salesbot — Catalog Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Generation:  {}",
        generation.map_or_else(|| "none".to_string(), |g| g.to_string())
    );
    println!();
    println!("  Products:    {}", products);
    println!(
        "  Embedded:    {} / {} ({}%)",
        embedded,
        products,
        percent(embedded as usize, products)
    );
    println!("  Memories:    {}", memories);
    println!("  Messages:    {} across {} session(s)", messages, sessions);

    let category_rows = sqlx::query(
        r#"
        SELECT category, COUNT(*) AS n, MIN(price) AS lo, MAX(price) AS hi
        FROM products
        WHERE generation = (SELECT value FROM catalog_state WHERE key = 'active_generation')
        GROUP BY category
        ORDER BY category
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !category_rows.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<28} {:>8} {:>12} {:>12}", "CATEGORY", "PRODUCTS", "FROM", "TO");
        println!("  {}", "-".repeat(64));
        for row in &category_rows {
            let category: String = row.get("category");
            let n: i64 = row.get("n");
            let lo: f64 = row.get("lo");
            let hi: f64 = row.get("hi");
            println!(
                "  {:<28} {:>8} {:>12} {:>12}",
                category,
                n,
                format!("${}", salesbot_core::models::format_price(lo)),
                format!("${}", salesbot_core::models::format_price(hi))
            );
        }
    }

    if products > 0 {
        println!();
        println!("  Sample search \"{}\":", SAMPLE_QUERY);
        let hits = index.search(SAMPLE_QUERY, SAMPLE_RESULTS, None).await?;
        if hits.is_empty() {
            println!("    (no matches)");
        }
        for doc in &hits {
            println!(
                "    {} ({}) - ${}",
                doc.product.name,
                doc.product.category,
                salesbot_core::models::format_price(doc.product.price)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn percent(part: usize, whole: usize) -> usize {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
