//! The inbound "purchase completed" event.
//!
//! The order pipeline is external; this is only the shape it hands us.

use serde::{Deserialize, Serialize};

/// Catalog identifier of a purchased product.
pub type ProductId = u64;

/// A single line of a completed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: ProductId,
}

/// A completed purchase as reported by the order pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCompleted {
    /// Order reference in the commerce system.
    pub order_id: String,
    pub buyer_email: String,
    #[serde(default)]
    pub buyer_first_name: String,
    #[serde(default)]
    pub buyer_last_name: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl PurchaseCompleted {
    /// Returns true if any line item is in `allowed`.
    ///
    /// An empty allow-list qualifies nothing.
    #[must_use]
    pub fn contains_any(&self, allowed: &[ProductId]) -> bool {
        self.line_items
            .iter()
            .any(|item| allowed.contains(&item.product_id))
    }
}
