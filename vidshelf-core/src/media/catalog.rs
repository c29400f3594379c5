use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Product details returned by an external catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductData {
    pub title: String,
    pub tags: Vec<String>,
    pub maker: Option<String>,
    pub actress: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// External product catalog keyed by product code. Lookups that fail or
/// find nothing yield `None`.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn fetch_product_data(&self, code: &str) -> Option<ProductData>;
}

/// Normalize a product code as typed by the user: trimmed, uppercase.
pub fn normalize_product_code(code: &str) -> Option<String> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}
