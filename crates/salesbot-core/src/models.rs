//! Data models shared by the core pipeline and the app crate.
//!
//! - [`Product`]: a catalog entry as loaded from the catalog file.
//! - [`ProductDocument`]: the indexed, denormalized text rendering of a product.
//! - [`ProductSummary`]: the per-match view returned by retrieval.
//! - [`ConversationTurn`]: one append-only history record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields rendered in the fixed header of a product document. Everything
/// else in [`Product::attributes`] becomes a free-form attribute line.
const RESERVED_FIELDS: &[&str] = &["name", "category", "model", "price", "stripe_price_id"];

/// An immutable catalog entry.
///
/// Unknown keys in the source record are kept in `attributes` and rendered
/// into the indexed document, so catalogs can carry any attribute fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub name: String,
    pub category: String,
    pub model: String,
    pub price: f64,
    /// External billing reference (the catalog key is `stripe_price_id`).
    #[serde(
        default,
        rename = "stripe_price_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub billing_ref: Option<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Product {
    /// Stable index id derived from the model identifier.
    ///
    /// Reloading the same catalog yields the same ids.
    pub fn document_id(&self) -> String {
        format!("product_{}", slug(&self.model))
    }

    /// Render the searchable text for this product.
    ///
    /// ```text
    /// Name: Aero 14
    /// Category: Laptops
    /// Model: AERO-14
    /// Price: $950
    /// Memory: 16GB
    /// ```
    pub fn render_document(&self) -> String {
        let mut text = format!(
            "Name: {}\nCategory: {}\nModel: {}\nPrice: ${}\n",
            self.name,
            self.category,
            self.model,
            format_price(self.price)
        );
        for (key, value) in &self.attributes {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text.push_str(&format!("{}: {}\n", title_case(key), rendered));
        }
        text.trim().to_string()
    }

    /// Build the indexed document for this product.
    pub fn to_document(&self) -> ProductDocument {
        ProductDocument {
            id: self.document_id(),
            text: self.render_document(),
            product: self.clone(),
        }
    }

    /// Project into the summary returned by retrieval, using `text` as the
    /// description.
    pub fn summary(&self, text: &str) -> ProductSummary {
        ProductSummary {
            name: self.name.clone(),
            category: self.category.clone(),
            model: self.model.clone(),
            price: self.price,
            description: text.to_string(),
            billing_ref: self.billing_ref.clone(),
        }
    }
}

/// A product as stored in the index: id, rendered text, and full metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDocument {
    pub id: String,
    pub text: String,
    pub product: Product,
}

impl ProductDocument {
    pub fn summary(&self) -> ProductSummary {
        self.product.summary(&self.text)
    }
}

/// The per-match projection carried by a retrieval result.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductSummary {
    pub name: String,
    pub category: String,
    pub model: String,
    pub price: f64,
    pub description: String,
    #[serde(rename = "stripe_price_id")]
    pub billing_ref: Option<String>,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Agent => "agent",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "agent" => Ok(Sender::Agent),
            other => anyhow::bail!("unknown sender '{}'", other),
        }
    }
}

/// One append-only history record. The timestamp is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub session_id: String,
    pub sender: Sender,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Render a price the way the catalog shows it: whole numbers without a
/// fractional part, everything else with two decimals.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 && price.abs() < 1e15 {
        format!("{}", price as i64)
    } else {
        format!("{:.2}", price)
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_sep = true;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        } else if c == '+' {
            out.push_str("plus");
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
