//! Catalog loading: read product records, validate them, and publish them
//! into the product index.
//!
//! The catalog file is a JSON array of objects with `name`, `category`,
//! `model`, `price`, an optional `stripe_price_id`, and any number of extra
//! attribute fields.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use salesbot_core::models::{Product, ProductDocument};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_index::{PublishStats, SqliteIndex};

/// Read a catalog file into product records.
pub fn read_catalog(path: &Path) -> Result<Vec<Product>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    let products: Vec<Product> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog file: {}", path.display()))?;
    Ok(products)
}

/// Reject records that would produce an ambiguous or broken index.
pub fn validate(products: &[Product]) -> Result<()> {
    let mut seen_models = HashSet::new();
    let mut seen_ids = HashSet::new();
    for (i, p) in products.iter().enumerate() {
        let at = || format!("product #{} ({:?})", i + 1, p.name);
        if p.name.trim().is_empty() {
            bail!("{}: name must not be empty", at());
        }
        if p.category.trim().is_empty() {
            bail!("{}: category must not be empty", at());
        }
        if p.model.trim().is_empty() {
            bail!("{}: model must not be empty", at());
        }
        if !p.price.is_finite() || p.price < 0.0 {
            bail!("{}: price must be a non-negative number", at());
        }
        if !seen_models.insert(p.model.as_str()) {
            bail!("{}: duplicate model '{}'", at(), p.model);
        }
        if !seen_ids.insert(p.document_id()) {
            bail!(
                "{}: model '{}' collides with another model after normalisation",
                at(),
                p.model
            );
        }
    }
    Ok(())
}

/// Render every product into its indexed document.
pub fn build_documents(products: &[Product]) -> Vec<ProductDocument> {
    products.iter().map(Product::to_document).collect()
}

/// Load and publish a catalog into an existing index.
pub async fn load_into(index: &SqliteIndex, path: &Path) -> Result<PublishStats> {
    let products = read_catalog(path)?;
    validate(&products)?;
    let docs = build_documents(&products);
    index.publish(&docs).await
}

fn resolve_path(config: &Config, path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p.to_path_buf()),
        None => config.catalog.path.clone().ok_or_else(|| {
            anyhow::anyhow!("No catalog file given and catalog.path is not set in config")
        }),
    }
}

/// Entry point for `salesbot load`.
pub async fn run_load(config: &Config, path: Option<&Path>, dry_run: bool) -> Result<()> {
    let path = resolve_path(config, path)?;
    let products = read_catalog(&path)?;
    validate(&products)?;

    if dry_run {
        println!("load {} (dry-run)", path.display());
        println!("  products: {}", products.len());
        let mut categories: Vec<&str> = products.iter().map(|p| p.category.as_str()).collect();
        categories.sort();
        categories.dedup();
        println!("  categories: {}", categories.join(", "));
        return Ok(());
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let embedder = create_provider(&config.embedding)?;
    let index = SqliteIndex::new(pool.clone()).with_embedder(embedder, config.embedding.batch_size);

    let stats = index.publish(&build_documents(&products)).await?;

    println!("load {}", path.display());
    println!("  products: {}", stats.products);
    println!("  generation: {}", stats.generation);
    if config.embedding.is_enabled() {
        println!("  embeddings computed: {}", stats.embedded);
        println!("  embeddings reused: {}", stats.reused);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
