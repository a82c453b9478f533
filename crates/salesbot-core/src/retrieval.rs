//! Intent extraction and product retrieval.
//!
//! Turns a raw customer message into a [`RetrievalResult`] by layering two
//! keyword heuristics over a similarity search:
//!
//! 1. General search for the raw message (`general_top_k`, no filter).
//! 2. Category override: the first known category whose name, or its
//!    trailing-`s`-stripped form, occurs in the lowercased message replaces
//!    the result set with a category-filtered search (`category_top_k`).
//! 3. Price override: a number in the message plus one of the trigger words
//!    `budget`, `price`, `under`, `between` replaces the result set with the
//!    sampled products inside the extracted [`PriceRange`].
//!
//! Overrides only apply when they produce at least one product. When both
//! apply, price wins over category; the two are never intersected.
//!
//! Every step here is a pure function except [`retrieve`], which talks to a
//! [`ProductIndex`].

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::index::{MetadataFilter, ProductIndex};
use crate::models::{format_price, ProductDocument, ProductSummary};

/// Two integers, optionally `$`-prefixed, optionally joined by `to`, `-` or `and`.
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$?(\d+)(?:\s*(?:to|-|and)?\s*\$?(\d+))?").expect("price pattern is valid")
});

const PRICE_TRIGGERS: &[&str] = &["budget", "price", "under", "between"];

/// Labels removed from a document before it is quoted in the context.
const DESCRIPTION_LABELS: &[&str] = &["Product:", "Category:", "Model:", "Price:"];

/// Retrieval tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub general_top_k: usize,
    pub category_top_k: usize,
    /// How many products to sample when listing categories.
    pub category_sample_size: usize,
    /// How many products to sample for the price filter.
    pub price_sample_size: usize,
    /// Maximum products kept by the price filter.
    pub price_top_k: usize,
    /// Maximum products rendered into the context string.
    pub context_items: usize,
    /// Maximum characters of each cleaned description.
    pub description_chars: usize,
    /// Upper-bound width used when only one price is given.
    pub default_price_band: u64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            general_top_k: 5,
            category_top_k: 6,
            category_sample_size: 100,
            price_sample_size: 100,
            price_top_k: 5,
            context_items: 5,
            description_chars: 150,
            default_price_band: 500,
        }
    }
}

/// Per-request retrieval outcome. Never persisted.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RetrievalResult {
    pub found: bool,
    /// Numbered, human-readable product list for the system prompt.
    pub context: String,
    pub count: usize,
    pub products: Vec<ProductSummary>,
    /// Known categories, or `None` if listing them failed.
    pub categories: Option<Vec<String>>,
}

impl RetrievalResult {
    /// The degraded result used when retrieval fails outright.
    pub fn not_found(categories: Option<Vec<String>>) -> Self {
        Self {
            categories,
            ..Self::default()
        }
    }
}

/// Which heuristic produced the final product set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    General,
    Category,
    Price,
}

/// Inclusive price bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRange {
    pub min: u64,
    pub max: u64,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min as f64 && price <= self.max as f64
    }
}

/// Extract a price range from `message`, if it asks about price.
///
/// - `"under $N"` gives `[0, N]`.
/// - `"between $A and $B"`, `"$A-$B"`, `"$A to $B"` give `[min(A,B), max(A,B)]`.
/// - A single number with a trigger word gives `[A, A + band]`.
///
/// Only the first number (pair) in the message is considered. Numbers too
/// large for `u64` yield `None`.
pub fn extract_price_range(message: &str, band: u64) -> Option<PriceRange> {
    let lower = message.to_lowercase();
    if !PRICE_TRIGGERS.iter().any(|w| lower.contains(w)) {
        return None;
    }
    let caps = PRICE_RE.captures(message)?;
    let first: u64 = caps.get(1)?.as_str().parse().ok()?;
    if lower.contains("under") {
        return Some(PriceRange { min: 0, max: first });
    }
    match caps.get(2) {
        Some(m) => {
            let second: u64 = m.as_str().parse().ok()?;
            Some(PriceRange {
                min: first.min(second),
                max: first.max(second),
            })
        }
        None => Some(PriceRange {
            min: first,
            max: first.saturating_add(band),
        }),
    }
}

/// First category mentioned in `message`, by full name or naive singular.
///
/// `categories` is scanned in order, so the caller decides precedence.
pub fn detect_category<'a>(message: &str, categories: &'a [String]) -> Option<&'a str> {
    let lower = message.to_lowercase();
    categories
        .iter()
        .find(|c| {
            let name = c.to_lowercase();
            let singular = name.trim_end_matches('s');
            (!name.is_empty() && lower.contains(&name))
                || (!singular.is_empty() && lower.contains(singular))
        })
        .map(String::as_str)
}

/// Distinct categories across a sample of the catalog, sorted.
pub async fn list_categories(index: &dyn ProductIndex, sample: usize) -> Result<Vec<String>> {
    let docs = index.get_by_filter(None, sample).await?;
    let mut categories: Vec<String> = docs.into_iter().map(|d| d.product.category).collect();
    categories.sort();
    categories.dedup();
    Ok(categories)
}

/// Strip the header labels from a product document and truncate it.
pub fn clean_description(text: &str, max_chars: usize) -> String {
    let mut cleaned = text.to_string();
    for label in DESCRIPTION_LABELS {
        cleaned = cleaned.replace(label, "");
    }
    cleaned.chars().take(max_chars).collect()
}

/// Render the numbered context block quoted in the system prompt.
///
/// ```text
///
/// 1. Aero 14 (Laptops) - $950
///    Name: Aero 14
///  Laptops
///  AERO-14
///  $950...
/// ```
pub fn format_context(products: &[ProductSummary], params: &RetrievalParams) -> String {
    let mut out = String::new();
    for (i, p) in products.iter().take(params.context_items).enumerate() {
        out.push_str(&format!(
            "\n{}. {} ({}) - ${}",
            i + 1,
            p.name,
            p.category,
            format_price(p.price)
        ));
        if !p.description.is_empty() {
            out.push_str(&format!(
                "\n   {}...",
                clean_description(&p.description, params.description_chars)
            ));
        }
    }
    out
}

/// Run the full retrieval pipeline for one message.
///
/// A failing general search is an error. A failing category listing or
/// override search only skips that override.
pub async fn retrieve(
    index: &dyn ProductIndex,
    message: &str,
    params: &RetrievalParams,
) -> Result<RetrievalResult> {
    let (docs, categories, intent) = select_products(index, message, params).await?;
    let products: Vec<ProductSummary> = docs.iter().map(ProductDocument::summary).collect();
    tracing::debug!(?intent, count = products.len(), "retrieval complete");

    Ok(RetrievalResult {
        found: !products.is_empty(),
        context: format_context(&products, params),
        count: products.len(),
        products,
        categories,
    })
}

async fn select_products(
    index: &dyn ProductIndex,
    message: &str,
    params: &RetrievalParams,
) -> Result<(Vec<ProductDocument>, Option<Vec<String>>, Intent)> {
    let mut results = index.search(message, params.general_top_k, None).await?;
    let mut intent = Intent::General;

    let categories = match list_categories(index, params.category_sample_size).await {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(error = %e, "category listing failed");
            None
        }
    };

    if let Some(category) = categories
        .as_deref()
        .and_then(|cats| detect_category(message, cats))
    {
        let filter = MetadataFilter::category(category);
        let query = format!("{} products", category);
        match index
            .search(&query, params.category_top_k, Some(&filter))
            .await
        {
            Ok(hits) if !hits.is_empty() => {
                results = hits;
                intent = Intent::Category;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, category, "category search failed"),
        }
    }

    if let Some(range) = extract_price_range(message, params.default_price_band) {
        match index.get_by_filter(None, params.price_sample_size).await {
            Ok(sample) => {
                let hits: Vec<ProductDocument> = sample
                    .into_iter()
                    .filter(|d| range.contains(d.product.price))
                    .take(params.price_top_k)
                    .collect();
                if !hits.is_empty() {
                    results = hits;
                    intent = Intent::Price;
                }
            }
            Err(e) => tracing::warn!(error = %e, "price sample failed"),
        }
    }

    Ok((results, categories, intent))
}
