//! Per-tenant in-memory search over finalized catalog items.
//!
//! Indexes are built lazily, keyed by a content signature of the item list,
//! and cached for the life of the process. Scoring runs either over a
//! TF-weighted vector space or over plain token sets when the vector path is
//! disabled; the choice is made once at build time and carried inside the
//! index value.

use crate::models::{CatalogItem, CustomerNeeds};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const RELEVANCE_FLOOR: f64 = 0.08;
const SMALL_CATALOG_FLOOR: f64 = 0.05;
const SMALL_CATALOG_LIMIT: usize = 10;

const EXCERPT_BEFORE: usize = 40;
const EXCERPT_AFTER: usize = 60;

/// Item fields joined into the searchable text, in display order. Russian
/// and English header variants are both recognized.
const SEARCH_FIELDS: [&str; 20] = [
    "title",
    "name",
    "наименование",
    "description",
    "описание",
    "features",
    "характеристики",
    "tags",
    "теги",
    "brand",
    "бренд",
    "material",
    "материал",
    "category",
    "категория",
    "color",
    "цвет",
    "notes",
    "примечания",
    "модель",
];

/// Lowercased Unicode word tokens of length >= 3.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

pub fn compose_search_text(item: &CatalogItem) -> String {
    let mut parts = Vec::new();
    for field in SEARCH_FIELDS {
        if let Some(value) = item.get(field) {
            if !value.trim().is_empty() {
                parts.push(value.as_str());
            }
        }
    }
    parts.join(" ")
}

/// Stable hash over the item count and each item's canonical JSON form.
/// Items are ordered maps, so serialization order is deterministic.
pub fn content_signature(items: &[CatalogItem]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((items.len() as u64).to_le_bytes());
    for item in items {
        hasher.update(serde_json::to_vec(item).unwrap_or_default());
    }
    format!("{:x}", hasher.finalize())
}

/// TF term-weighting over a fixed vocabulary; all vectors are L2-normalized
/// so cosine similarity reduces to a dot product.
pub struct TfVectorizer {
    vocabulary: HashMap<String, usize>,
}

impl TfVectorizer {
    pub fn fit_transform(texts: &[String]) -> (Self, Vec<Vec<f64>>) {
        let mut vocabulary = HashMap::new();
        for text in texts {
            for token in tokenize(text) {
                let next = vocabulary.len();
                vocabulary.entry(token).or_insert(next);
            }
        }

        let vectorizer = Self { vocabulary };
        let matrix = texts.iter().map(|text| vectorizer.transform(text)).collect();
        (vectorizer, matrix)
    }

    pub fn transform(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in tokenize(text) {
            if let Some(&index) = self.vocabulary.get(&token) {
                vector[index] += 1.0;
            }
        }

        let norm = vector.iter().map(|value| value * value).sum::<f64>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

fn dot(left: &[f64], right: &[f64]) -> f64 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

enum IndexModel {
    Vector {
        vectorizer: TfVectorizer,
        matrix: Vec<Vec<f64>>,
    },
    TokenSets(Vec<HashSet<String>>),
}

impl IndexModel {
    fn score_query(&self, query: &str) -> Vec<f64> {
        match self {
            IndexModel::Vector { vectorizer, matrix } => {
                let query_vector = vectorizer.transform(query);
                matrix.iter().map(|row| dot(row, &query_vector)).collect()
            }
            IndexModel::TokenSets(sets) => {
                let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
                sets.iter()
                    .map(|item_tokens| token_overlap_score(&query_tokens, item_tokens))
                    .collect()
            }
        }
    }
}

/// Precision-weighted overlap: matching most of the query matters more than
/// covering most of the item.
fn token_overlap_score(query: &HashSet<String>, item: &HashSet<String>) -> f64 {
    if query.is_empty() || item.is_empty() {
        return 0.0;
    }
    let overlap = query.intersection(item).count() as f64;
    let precision = overlap / query.len() as f64;
    let recall = overlap / item.len() as f64;
    0.7 * precision + 0.3 * recall
}

pub struct SearchIndex {
    pub tenant: String,
    pub signature: String,
    pub items: Vec<CatalogItem>,
    texts: Vec<String>,
    model: IndexModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedItem {
    pub item: CatalogItem,
    pub score: f64,
    pub excerpt: String,
}

#[derive(Default)]
struct CacheState {
    by_signature: HashMap<(String, String), Arc<SearchIndex>>,
    latest: HashMap<String, Arc<SearchIndex>>,
}

/// Process-wide index cache. One lock guards both maps; the expensive model
/// fit runs outside it, and a race that builds the same index twice resolves
/// to whichever insert landed first.
pub struct CatalogSearchCache {
    use_vectorizer: bool,
    state: Mutex<CacheState>,
}

impl Default for CatalogSearchCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CatalogSearchCache {
    pub fn new(use_vectorizer: bool) -> Self {
        Self {
            use_vectorizer,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // A poisoned lock means some caller panicked between map updates;
        // both maps are still structurally valid, so keep serving.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached or freshly built index for this exact item set,
    /// or `None` for an empty catalog.
    pub fn ensure_catalog_index(
        &self,
        tenant: &str,
        items: &[CatalogItem],
    ) -> Option<Arc<SearchIndex>> {
        if items.is_empty() {
            return None;
        }

        let signature = content_signature(items);
        let key = (tenant.to_string(), signature.clone());

        {
            let mut state = self.lock_state();
            if let Some(existing) = state.by_signature.get(&key).cloned() {
                state.latest.insert(tenant.to_string(), existing.clone());
                return Some(existing);
            }
        }

        let texts: Vec<String> = items.iter().map(compose_search_text).collect();
        let model = if self.use_vectorizer {
            let (vectorizer, matrix) = TfVectorizer::fit_transform(&texts);
            IndexModel::Vector { vectorizer, matrix }
        } else {
            IndexModel::TokenSets(
                texts
                    .iter()
                    .map(|text| tokenize(text).into_iter().collect())
                    .collect(),
            )
        };

        let built = Arc::new(SearchIndex {
            tenant: tenant.to_string(),
            signature,
            items: items.to_vec(),
            texts,
            model,
        });

        let mut state = self.lock_state();
        let index = state
            .by_signature
            .entry(key)
            .or_insert_with(|| built)
            .clone();
        state.latest.insert(tenant.to_string(), index.clone());
        Some(index)
    }

    /// Most recently used index for the tenant, if any.
    pub fn latest_index(&self, tenant: &str) -> Option<Arc<SearchIndex>> {
        self.lock_state().latest.get(tenant).cloned()
    }

    pub fn invalidate_catalog_index(&self, tenant: &str) {
        let mut state = self.lock_state();
        state
            .by_signature
            .retain(|(cached_tenant, _), _| cached_tenant != tenant);
        state.latest.remove(tenant);
    }

    pub fn clear_catalog_cache(&self) {
        let mut state = self.lock_state();
        state.by_signature.clear();
        state.latest.clear();
    }

    /// Ranks catalog items against the free-text query plus structured
    /// buyer needs. Returns a contiguous top-scored prefix; when nothing
    /// clears the relevance floor the single best item is returned so the
    /// caller always has context to work with.
    pub fn retrieve_context(
        &self,
        items: &[CatalogItem],
        needs: &CustomerNeeds,
        query: &str,
        tenant: &str,
        limit: usize,
    ) -> Vec<RankedItem> {
        let Some(index) = self.ensure_catalog_index(tenant, items) else {
            return Vec::new();
        };

        let mut query_text = query.trim().to_string();
        for field in needs.query_fields() {
            if !query_text.is_empty() {
                query_text.push(' ');
            }
            query_text.push_str(field);
        }

        let query_tokens = tokenize(&query_text);
        let scores = index.model.score_query(&query_text);

        let mut order: Vec<usize> = (0..index.items.len()).collect();
        order.sort_by(|&left, &right| {
            scores[right]
                .partial_cmp(&scores[left])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(left.cmp(&right))
        });

        let floor = if index.items.len() < SMALL_CATALOG_LIMIT {
            SMALL_CATALOG_FLOOR
        } else {
            RELEVANCE_FLOOR
        };

        let mut ranked: Vec<RankedItem> = order
            .iter()
            .take_while(|&&position| scores[position] >= floor)
            .take(limit)
            .map(|&position| RankedItem {
                item: index.items[position].clone(),
                score: scores[position],
                excerpt: make_excerpt(&index.texts[position], &query_tokens),
            })
            .collect();

        if ranked.is_empty() {
            if let Some(&best) = order.first() {
                ranked.push(RankedItem {
                    item: index.items[best].clone(),
                    score: scores[best],
                    excerpt: make_excerpt(&index.texts[best], &query_tokens),
                });
            }
        }

        ranked
    }
}

/// Window around the first query-token hit in the search text, ellipsized
/// where it cuts into the text. Empty when no token matches.
fn make_excerpt(text: &str, query_tokens: &[String]) -> String {
    let lowered = text.to_lowercase();
    let hit = query_tokens
        .iter()
        .filter_map(|token| lowered.find(token.as_str()))
        .min();
    let Some(hit) = hit else {
        return String::new();
    };

    let hit_chars = lowered[..hit].chars().count();
    let chars: Vec<char> = text.chars().collect();
    let start = hit_chars.saturating_sub(EXCERPT_BEFORE);
    let end = (hit_chars + EXCERPT_AFTER).min(chars.len());

    let mut excerpt = String::new();
    if start > 0 {
        excerpt.push('…');
    }
    excerpt.extend(&chars[start..end]);
    if end < chars.len() {
        excerpt.push('…');
    }
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(fields: &[(&str, &str)]) -> CatalogItem {
        fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn camera_catalog() -> Vec<CatalogItem> {
        vec![
            item(&[
                ("id", "1"),
                ("title", "Дверь Гранит"),
                ("описание", "стальная дверь с терморазрывом"),
            ]),
            item(&[
                ("id", "2"),
                ("title", "Видеоглазок"),
                ("описание", "встроенная камера с записью на карту"),
            ]),
            item(&[
                ("id", "3"),
                ("title", "Ручка фалевая"),
                ("описание", "нержавеющая сталь"),
            ]),
        ]
    }

    #[test]
    fn tokenize_drops_short_tokens_and_lowercases() {
        assert_eq!(tokenize("Дверь ДГ-21 и её вес"), vec!["дверь", "вес"]);
    }

    #[test]
    fn camera_query_ranks_camera_item_first() {
        for use_vectorizer in [true, false] {
            let cache = CatalogSearchCache::new(use_vectorizer);
            let items = camera_catalog();
            let ranked =
                cache.retrieve_context(&items, &CustomerNeeds::default(), "камера", "acme", 5);

            assert!(!ranked.is_empty());
            assert_eq!(ranked[0].item["id"], "2");
            assert!(ranked[0].score > 0.0);
            assert!(ranked[0].excerpt.to_lowercase().contains("камера"));
        }
    }

    #[test]
    fn needs_fields_join_the_query() {
        let cache = CatalogSearchCache::new(false);
        let items = camera_catalog();
        let needs = CustomerNeeds {
            product_type: Some("камера".to_string()),
            ..Default::default()
        };
        let ranked = cache.retrieve_context(&items, &needs, "", "acme", 5);
        assert_eq!(ranked[0].item["id"], "2");
    }

    #[test]
    fn empty_catalog_yields_no_index() {
        let cache = CatalogSearchCache::default();
        assert!(cache.ensure_catalog_index("acme", &[]).is_none());
        let ranked = cache.retrieve_context(
            &[],
            &CustomerNeeds::default(),
            "камера",
            "acme",
            5,
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn unmatched_query_still_returns_single_best() {
        let cache = CatalogSearchCache::default();
        let items = camera_catalog();
        let ranked = cache.retrieve_context(
            &items,
            &CustomerNeeds::default(),
            "холодильник",
            "acme",
            5,
        );
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn signature_is_stable_and_content_sensitive() {
        let items = camera_catalog();
        let same = content_signature(&items);
        assert_eq!(same, content_signature(&items));

        let mut changed = items.clone();
        changed[0].insert("цвет".to_string(), "белый".to_string());
        assert_ne!(same, content_signature(&changed));
    }

    #[test]
    fn repeated_ensure_returns_cached_index() {
        let cache = CatalogSearchCache::default();
        let items = camera_catalog();

        let first = cache.ensure_catalog_index("acme", &items).unwrap();
        let second = cache.ensure_catalog_index("acme", &items).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.signature, second.signature);

        let latest = cache.latest_index("acme").unwrap();
        assert!(Arc::ptr_eq(&first, &latest));
    }

    #[test]
    fn invalidation_forces_rebuild_with_same_signature() {
        let cache = CatalogSearchCache::default();
        let items = camera_catalog();

        let first = cache.ensure_catalog_index("acme", &items).unwrap();
        cache.invalidate_catalog_index("acme");
        assert!(cache.latest_index("acme").is_none());

        let rebuilt = cache.ensure_catalog_index("acme", &items).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(first.signature, rebuilt.signature);
    }

    #[test]
    fn tenants_do_not_share_cache_entries() {
        let cache = CatalogSearchCache::default();
        let items = camera_catalog();

        let acme = cache.ensure_catalog_index("acme", &items).unwrap();
        let other = cache.ensure_catalog_index("globex", &items).unwrap();
        assert!(!Arc::ptr_eq(&acme, &other));

        cache.invalidate_catalog_index("acme");
        assert!(cache.latest_index("globex").is_some());
    }

    #[test]
    fn excerpt_is_windowed_around_first_hit() {
        let padding = "а".repeat(100);
        let text = format!("{padding} камера {padding}");
        let excerpt = make_excerpt(&text, &["камера".to_string()]);
        assert!(excerpt.starts_with('…'));
        assert!(excerpt.ends_with('…'));
        assert!(excerpt.contains("камера"));
        assert!(excerpt.chars().count() <= EXCERPT_BEFORE + EXCERPT_AFTER + 2);
    }
}
