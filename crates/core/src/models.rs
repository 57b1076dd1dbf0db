use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format version written into every persisted index document.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// A bounded slice of a page's normalized text, sized for retrieval context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogChunk {
    pub id: u64,
    pub page: u32,
    pub title: String,
    pub text: String,
    pub article_codes: Vec<String>,
}

/// Persisted, reloadable description of one ingested catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogIndexDocument {
    pub format: u32,
    pub catalog_id: String,
    pub source_path: String,
    pub original_name: String,
    pub generated_at: DateTime<Utc>,
    pub content_hash: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub chunks: Vec<CatalogChunk>,
}

/// One candidate product row before finalization, produced by either the
/// block parser or delimited-file ingestion. Keys are arbitrary strings.
#[derive(Debug, Clone, Default)]
pub struct RawAttributeRow {
    pub title: Option<String>,
    pub price: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

/// A finalized catalog row. `id`, `title` and `price` are always present.
pub type CatalogItem = BTreeMap<String, String>;

/// Structured buyer requirements merged into the retrieval query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerNeeds {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl CustomerNeeds {
    /// Fields in the order they join the query string.
    pub fn query_fields(&self) -> Vec<&str> {
        [
            &self.product_type,
            &self.category,
            &self.brand,
            &self.color,
            &self.budget,
            &self.budget_max,
            &self.audience,
            &self.problem,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_query_fields_skip_empty_values() {
        let needs = CustomerNeeds {
            product_type: Some("дверь".to_string()),
            color: Some("  ".to_string()),
            budget: Some("30000".to_string()),
            ..Default::default()
        };
        assert_eq!(needs.query_fields(), vec!["дверь", "30000"]);
    }

    #[test]
    fn needs_deserialize_with_type_alias() {
        let needs: CustomerNeeds =
            serde_json::from_str(r#"{"type":"дверь","brand":"Торэкс"}"#).unwrap();
        assert_eq!(needs.product_type.as_deref(), Some("дверь"));
        assert_eq!(needs.brand.as_deref(), Some("Торэкс"));
    }
}
