//! Lead scoring and the deterministic fallback reply.

use serde::Serialize;

use crate::models::{format_price, ProductSummary};
use crate::prompt::category_list;

/// Coarse purchase-readiness label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStage {
    Hot,
    Warm,
    Interested,
    Curious,
    /// Part of the response vocabulary; [`classify`] and [`fallback_reply`]
    /// never produce it.
    Cold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Helpful,
    Friendly,
    Neutral,
}

/// Stage and emotion for a model-generated reply, from the match count.
pub fn classify(product_count: usize) -> (LeadStage, Emotion) {
    match product_count {
        0 => (LeadStage::Curious, Emotion::Friendly),
        1 => (LeadStage::Hot, Emotion::Helpful),
        2..=3 => (LeadStage::Warm, Emotion::Helpful),
        _ => (LeadStage::Interested, Emotion::Helpful),
    }
}

const FALLBACK_ITEMS: usize = 3;

const GENERIC_GREETING: &str =
    "I'm here to help you find the perfect tech products! What are you looking for today?";

/// Reply used when the gateway fails.
///
/// With matches: a bullet list of up to three products (stage `warm`,
/// emotion `helpful`). Without: a category listing (stage `curious`,
/// emotion `neutral`).
pub fn fallback_reply(
    products: &[ProductSummary],
    categories: Option<&[String]>,
) -> (String, LeadStage, Emotion) {
    if !products.is_empty() {
        let lines: Vec<String> = products
            .iter()
            .take(FALLBACK_ITEMS)
            .map(|p| format!("• {} - ${} ({})", p.name, format_price(p.price), p.category))
            .collect();
        let reply = format!(
            "I found some great options for you:\n\n{}\n\nWould you like more details about any of these products?",
            lines.join("\n")
        );
        return (reply, LeadStage::Warm, Emotion::Helpful);
    }

    let reply = match categories {
        Some(c) if !c.is_empty() => format!(
            "I can help you find tech products! We have items in these categories: {}. What specifically are you looking for?",
            category_list(Some(c))
        ),
        _ => GENERIC_GREETING.to_string(),
    };
    (reply, LeadStage::Curious, Emotion::Neutral)
}
