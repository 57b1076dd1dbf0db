//! Catalog-wide row finalization: title/price choice, fuzzy column
//! unification, pruning, unique titles, stable ids and header validation.

use crate::error::ValidationError;
use crate::models::{CatalogItem, RawAttributeRow};
use crate::text::{
    clean_title, contains_currency_token, contains_forbidden_title_token, contains_unit_token,
    normalize_key, normalize_price, sanitize_value, similarity_ratio,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Minimum normalized-name similarity for two columns to merge.
const CLUSTER_SIMILARITY: f64 = 0.86;

/// Plausible retail price window used when a price has to be guessed from
/// unlabeled numeric attribute values.
const PRICE_WINDOW: (f64, f64) = (999.0, 5_000_000.0);

const MAX_TITLE_DETAIL_CHARS: usize = 24;

/// Technical names that never belong in a finalized header.
const BANNED_COLUMNS: [&str; 14] = [
    "id",
    "title",
    "price",
    "score",
    "page",
    "страница",
    "блок",
    "source",
    "источник",
    "raw",
    "chunk",
    "цена",
    "стоимость",
    "название",
];

const BANNED_SUFFIXES: [&str; 3] = ["_raw", "_trace", "_score"];

const TITLE_HINTS: [&str; 7] = [
    "наимен", "назван", "товар", "продукт", "модел", "name", "title",
];

const PRICE_HINTS: [&str; 4] = ["цен", "стоимост", "price", "cost"];

/// Columns whose names already describe a dimension are never renamed.
const PROTECTED_PREFIXES: [&str; 9] = [
    "толщин",
    "высот",
    "ширин",
    "глубин",
    "длин",
    "вес",
    "количеств",
    "диаметр",
    "размер",
];

static PLAIN_DECIMAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateTitleFix {
    pub original: String,
    pub renamed: String,
}

/// Summary of one finalization run, consumed by manifests and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub item_count: usize,
    pub columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub duplicate_title_fixes: Vec<DuplicateTitleFix>,
    pub column_coverage: BTreeMap<String, usize>,
    pub priced_rows: usize,
    /// Alias column name -> canonical column name.
    pub merge_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Numeric,
    Text,
    Mixed,
}

fn types_compatible(left: ColumnType, right: ColumnType) -> bool {
    !matches!(
        (left, right),
        (ColumnType::Numeric, ColumnType::Text) | (ColumnType::Text, ColumnType::Numeric)
    )
}

fn value_is_numeric(value: &str) -> bool {
    let stripped: String = value.chars().filter(|ch| !ch.is_whitespace()).collect();
    !stripped.is_empty()
        && stripped
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',')
        && stripped.chars().any(|ch| ch.is_ascii_digit())
}

struct WorkRow {
    existing_id: Option<String>,
    title: String,
    price: String,
    attributes: BTreeMap<String, String>,
}

fn mostly_digits(value: &str) -> bool {
    let total = value.chars().count();
    if total == 0 {
        return false;
    }
    let digits = value.chars().filter(|ch| ch.is_ascii_digit()).count();
    digits as f64 / total as f64 > 0.5
}

fn choose_title(row: &RawAttributeRow, attributes: &BTreeMap<String, String>) -> String {
    if let Some(own) = &row.title {
        let cleaned = clean_title(own);
        if cleaned.chars().count() >= 3 && !contains_forbidden_title_token(&cleaned) {
            return cleaned;
        }
    }

    let mut best: Option<(f64, &str)> = None;
    for (key, value) in attributes {
        if value.chars().count() < 3 || mostly_digits(value) {
            continue;
        }
        if contains_forbidden_title_token(value) {
            continue;
        }
        let normalized = normalize_key(key);
        let mut score = 0.0;
        if TITLE_HINTS.iter().any(|hint| normalized.starts_with(hint)) {
            score += 3.0;
        }
        score += 1.0;
        if value.split_whitespace().count() >= 2 {
            score += 1.0;
        }
        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, value));
        }
    }

    match best {
        Some((_, value)) => clean_title(value),
        None => "Товар".to_string(),
    }
}

fn choose_price(row: &RawAttributeRow, attributes: &BTreeMap<String, String>) -> String {
    if let Some(own) = &row.price {
        let normalized = normalize_price(own);
        if !normalized.is_empty() {
            return normalized;
        }
    }

    for (key, value) in attributes {
        let normalized_key = normalize_key(key);
        if PRICE_HINTS
            .iter()
            .any(|hint| normalized_key.starts_with(hint))
        {
            let normalized = normalize_price(value);
            if !normalized.is_empty() {
                return normalized;
            }
        }
    }

    for value in attributes.values() {
        if contains_currency_token(value) {
            let normalized = normalize_price(value);
            if !normalized.is_empty() {
                return normalized;
            }
        }
    }

    let mut best: Option<(f64, String)> = None;
    for (key, value) in attributes {
        if contains_unit_token(value) {
            continue;
        }
        let normalized_key = normalize_key(key);
        if PROTECTED_PREFIXES
            .iter()
            .any(|prefix| normalized_key.starts_with(prefix))
        {
            continue;
        }
        let normalized = normalize_price(value);
        let Ok(amount) = normalized.parse::<f64>() else {
            continue;
        };
        if amount < PRICE_WINDOW.0 || amount > PRICE_WINDOW.1 {
            continue;
        }
        if best.as_ref().map_or(true, |(top, _)| amount > *top) {
            best = Some((amount, normalized));
        }
    }

    best.map(|(_, normalized)| normalized).unwrap_or_default()
}

fn column_type(rows: &[WorkRow], column: &str) -> ColumnType {
    let mut saw_numeric = false;
    let mut saw_text = false;
    for row in rows {
        if let Some(value) = row.attributes.get(column) {
            if value.is_empty() {
                continue;
            }
            if value_is_numeric(value) {
                saw_numeric = true;
            } else {
                saw_text = true;
            }
        }
    }
    match (saw_numeric, saw_text) {
        (true, false) => ColumnType::Numeric,
        (false, true) => ColumnType::Text,
        _ => ColumnType::Mixed,
    }
}

fn coverage(rows: &[WorkRow], column: &str) -> usize {
    rows.iter()
        .filter(|row| {
            row.attributes
                .get(column)
                .is_some_and(|value| !value.is_empty())
        })
        .count()
}

fn cluster_columns(rows: &[WorkRow]) -> BTreeMap<String, String> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        for key in row.attributes.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    // Most frequent, then longest, becomes the cluster canonical.
    names.sort_by(|left, right| {
        coverage(rows, right)
            .cmp(&coverage(rows, left))
            .then(right.chars().count().cmp(&left.chars().count()))
            .then(left.cmp(right))
    });

    struct Cluster {
        canonical: String,
        normalized: String,
        kind: ColumnType,
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut merge_map = BTreeMap::new();

    for name in names {
        let normalized = normalize_key(&name);
        let kind = column_type(rows, &name);
        let joined = clusters.iter().find(|cluster| {
            similarity_ratio(&cluster.normalized, &normalized) >= CLUSTER_SIMILARITY
                && types_compatible(cluster.kind, kind)
        });
        match joined {
            Some(cluster) if cluster.canonical != name => {
                merge_map.insert(name, cluster.canonical.clone());
            }
            Some(_) => {}
            None => clusters.push(Cluster {
                canonical: name,
                normalized,
                kind,
            }),
        }
    }

    merge_map
}

fn apply_merges(rows: &mut [WorkRow], merge_map: &BTreeMap<String, String>) {
    for row in rows.iter_mut() {
        for (alias, canonical) in merge_map {
            let Some(value) = row.attributes.remove(alias) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let slot = row.attributes.entry(canonical.clone()).or_default();
            // Never overwrite an already-populated canonical value.
            if slot.is_empty() {
                *slot = value;
            }
        }
    }
}

fn is_banned_column(name: &str) -> bool {
    let lowered = name.to_lowercase();
    BANNED_COLUMNS.contains(&lowered.as_str())
        || BANNED_SUFFIXES
            .iter()
            .any(|suffix| lowered.ends_with(suffix))
}

fn is_protected_name(name: &str) -> bool {
    let normalized = normalize_key(name);
    PROTECTED_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

fn drop_columns(rows: &mut [WorkRow], dropped: &mut Vec<String>) {
    let threshold = ((rows.len() as f64 * 0.05).ceil() as usize).max(2);

    let mut names: Vec<String> = Vec::new();
    for row in rows.iter() {
        for key in row.attributes.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    for name in names {
        let remove = is_banned_column(&name) || coverage(rows, &name) < threshold;
        if remove {
            for row in rows.iter_mut() {
                row.attributes.remove(&name);
            }
            dropped.push(name);
        }
    }
}

/// Renames terse single-word columns whose meaning is recoverable from their
/// values. Runs strictly after column dropping so a banned key cannot
/// reappear via renaming.
fn rename_terse_columns(rows: &mut [WorkRow]) {
    let mut names: Vec<String> = Vec::new();
    for row in rows.iter() {
        for key in row.attributes.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    for name in &names {
        if name.contains(' ') || is_protected_name(name) {
            continue;
        }

        let values: Vec<String> = rows
            .iter()
            .filter_map(|row| row.attributes.get(name))
            .filter(|value| !value.is_empty())
            .map(|value| value.to_lowercase())
            .collect();
        if values.is_empty() {
            continue;
        }

        let has_mm = values.iter().any(|value| value.contains("мм"));
        let has_kg = values.iter().any(|value| value.contains("кг"));
        let all_numeric = values.iter().all(|value| value_is_numeric(value));

        let target = if has_mm {
            format!("толщина {name}")
        } else if has_kg {
            "вес".to_string()
        } else if all_numeric {
            format!("количество {name}")
        } else {
            continue;
        };

        if names.contains(&target) {
            continue;
        }
        for row in rows.iter_mut() {
            if let Some(value) = row.attributes.remove(name) {
                row.attributes.entry(target.clone()).or_insert(value);
            }
        }
    }
}

fn truncate_detail(detail: &str) -> String {
    let chars: Vec<char> = detail.chars().collect();
    if chars.len() <= MAX_TITLE_DETAIL_CHARS {
        return detail.to_string();
    }
    let mut short: String = chars[..MAX_TITLE_DETAIL_CHARS - 1].iter().collect();
    short.push('…');
    short
}

fn enforce_unique_titles(rows: &mut [WorkRow]) -> Vec<DuplicateTitleFix> {
    let mut fixes = Vec::new();
    let mut used: Vec<String> = Vec::new();

    for index in 0..rows.len() {
        let title = rows[index].title.clone();
        if !used.contains(&title) {
            used.push(title);
            continue;
        }

        // The detail lands in the title, so it must honor the title
        // invariant itself.
        let detail = rows[index]
            .attributes
            .values()
            .find(|value| !value.is_empty() && !contains_forbidden_title_token(value))
            .map(|value| truncate_detail(value));

        let mut renamed = detail
            .map(|detail| format!("{title} ({detail})"))
            .filter(|candidate| !used.contains(candidate));

        if renamed.is_none() {
            let mut variant = 2usize;
            loop {
                let candidate = format!("{title} (вариант {variant})");
                if !used.contains(&candidate) {
                    renamed = Some(candidate);
                    break;
                }
                variant += 1;
            }
        }

        let renamed = renamed.unwrap_or_else(|| title.clone());
        fixes.push(DuplicateTitleFix {
            original: title,
            renamed: renamed.clone(),
        });
        used.push(renamed.clone());
        rows[index].title = renamed;
    }

    fixes
}

fn build_header(rows: &[WorkRow]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        for key in row.attributes.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    names.sort_by(|left, right| {
        coverage(rows, right)
            .cmp(&coverage(rows, left))
            .then(left.cmp(right))
    });

    let mut header = vec!["id".to_string(), "title".to_string(), "price".to_string()];
    header.extend(names);
    header
}

fn validate(rows: &[WorkRow], header: &[String]) -> Result<(), ValidationError> {
    for row in rows {
        if !row.price.is_empty() && !PLAIN_DECIMAL.is_match(&row.price) {
            return Err(ValidationError::InvalidPrice(row.price.clone()));
        }
        if contains_forbidden_title_token(&row.title) {
            return Err(ValidationError::ForbiddenTitleToken(row.title.clone()));
        }
    }

    let mut seen: Vec<&str> = Vec::new();
    for column in header {
        if seen.contains(&column.as_str()) {
            return Err(ValidationError::DuplicateColumn(column.clone()));
        }
        seen.push(column);
    }

    for column in &header[3..] {
        if is_banned_column(column) {
            return Err(ValidationError::BannedColumn(column.clone()));
        }
    }

    Ok(())
}

/// Produces the canonical item list from raw candidate rows.
///
/// Returns the finalized rows, the header (always starting with
/// `id`, `title`, `price`) and the run report.
pub fn finalize_catalog_rows(
    raw_rows: Vec<RawAttributeRow>,
    keep_existing_ids: bool,
) -> Result<(Vec<CatalogItem>, Vec<String>, PipelineReport), ValidationError> {
    let mut rows: Vec<WorkRow> = Vec::new();
    for raw in &raw_rows {
        let mut attributes = BTreeMap::new();
        for (key, value) in &raw.attributes {
            let key = sanitize_value(key);
            let value = sanitize_value(value);
            if key.is_empty() || value.is_empty() {
                continue;
            }
            attributes.entry(key).or_insert(value);
        }
        rows.push(WorkRow {
            existing_id: attributes.get("id").cloned(),
            title: choose_title(raw, &attributes),
            price: choose_price(raw, &attributes),
            attributes,
        });
    }

    let merge_map = cluster_columns(&rows);
    apply_merges(&mut rows, &merge_map);

    let mut dropped_columns = Vec::new();
    drop_columns(&mut rows, &mut dropped_columns);
    rename_terse_columns(&mut rows);

    let duplicate_title_fixes = enforce_unique_titles(&mut rows);
    let header = build_header(&rows);
    validate(&rows, &header)?;

    let mut items: Vec<CatalogItem> = Vec::new();
    let mut priced_rows = 0usize;
    for (index, row) in rows.iter().enumerate() {
        let id = match (&row.existing_id, keep_existing_ids) {
            (Some(existing), true) if !existing.is_empty() => existing.clone(),
            _ => (index + 1).to_string(),
        };
        if !row.price.is_empty() {
            priced_rows += 1;
        }

        let mut item: CatalogItem = BTreeMap::new();
        item.insert("id".to_string(), id);
        item.insert("title".to_string(), row.title.clone());
        item.insert("price".to_string(), row.price.clone());
        for (key, value) in &row.attributes {
            if !value.is_empty() {
                item.insert(key.clone(), value.clone());
            }
        }
        items.push(item);
    }

    let column_coverage: BTreeMap<String, usize> = header[3..]
        .iter()
        .map(|column| (column.clone(), coverage(&rows, column)))
        .collect();

    let report = PipelineReport {
        item_count: items.len(),
        columns: header.clone(),
        dropped_columns,
        duplicate_title_fixes,
        column_coverage,
        priced_rows,
        merge_map,
    };

    Ok((items, header, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: Option<&str>, price: Option<&str>, attrs: &[(&str, &str)]) -> RawAttributeRow {
        RawAttributeRow {
            title: title.map(str::to_string),
            price: price.map(str::to_string),
            attributes: attrs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    #[test]
    fn header_starts_with_reserved_columns() {
        let rows = vec![
            row(Some("Дверь Гранит"), Some("12 500 руб."), &[("цвет", "белый")]),
            row(Some("Дверь Ультра"), Some("13 200 руб."), &[("цвет", "серый")]),
        ];
        let (_, header, _) = finalize_catalog_rows(rows, false).unwrap();
        assert_eq!(&header[..3], ["id", "title", "price"]);
        let mut unique = header.clone();
        unique.dedup();
        assert_eq!(unique.len(), header.len());
    }

    #[test]
    fn duplicate_titles_get_distinguishing_suffix() {
        let rows = vec![
            row(Some("Дверь Гранит"), Some("Цена: 12 500 руб."), &[]),
            row(Some("Дверь Гранит"), Some("Цена — 13 200 руб."), &[]),
        ];
        let (items, _, report) = finalize_catalog_rows(rows, false).unwrap();
        assert_eq!(items[0]["price"], "12500");
        assert_eq!(items[1]["price"], "13200");
        assert_ne!(items[0]["title"], items[1]["title"]);
        assert_eq!(report.duplicate_title_fixes.len(), 1);
        assert_eq!(report.duplicate_title_fixes[0].original, "Дверь Гранит");
    }

    #[test]
    fn near_duplicate_columns_merge_into_canonical() {
        let rows = vec![
            row(Some("А один"), None, &[("цвет", "белый")]),
            row(Some("Б два"), None, &[("цвета", "серый")]),
            row(Some("В три"), None, &[("цвет", "венге")]),
        ];
        let (items, header, report) = finalize_catalog_rows(rows, false).unwrap();
        assert!(header.contains(&"цвет".to_string()));
        assert!(!header.contains(&"цвета".to_string()));
        assert_eq!(report.merge_map.get("цвета").map(String::as_str), Some("цвет"));
        assert_eq!(items[1]["цвет"], "серый");
    }

    #[test]
    fn numeric_and_text_columns_never_merge() {
        // Same normalized stem, but one column is purely numeric and the
        // other purely textual.
        let rows = vec![
            row(Some("А один"), None, &[("вес", "90"), ("веса", "тяжёлый")]),
            row(Some("Б два"), None, &[("вес", "80"), ("веса", "лёгкий")]),
        ];
        let (_, header, report) = finalize_catalog_rows(rows, false).unwrap();
        assert!(report.merge_map.is_empty(), "merge_map: {:?}", report.merge_map);
        assert!(header.contains(&"вес".to_string()));
        assert!(header.contains(&"веса".to_string()));
    }

    #[test]
    fn banned_and_sparse_columns_are_dropped() {
        let mut rows = Vec::new();
        for index in 0..10 {
            rows.push(row(
                Some(&format!("Товар {index}")),
                Some("1500"),
                &[("page", "1"), ("debug_score", "3")],
            ));
        }
        rows[0]
            .attributes
            .insert("редкая".to_string(), "значение".to_string());

        let (_, header, report) = finalize_catalog_rows(rows, false).unwrap();
        assert!(!header.contains(&"page".to_string()));
        assert!(!header.contains(&"debug_score".to_string()));
        assert!(!header.contains(&"редкая".to_string()));
        assert!(report.dropped_columns.contains(&"page".to_string()));
        assert!(report.dropped_columns.contains(&"редкая".to_string()));
    }

    #[test]
    fn terse_numeric_column_is_renamed() {
        let rows = vec![
            row(Some("А один"), None, &[("петли", "2")]),
            row(Some("Б два"), None, &[("петли", "3")]),
        ];
        let (_, header, _) = finalize_catalog_rows(rows, false).unwrap();
        assert!(header.contains(&"количество петли".to_string()), "header: {header:?}");
    }

    #[test]
    fn protected_dimension_columns_keep_their_name() {
        let rows = vec![
            row(Some("А один"), None, &[("толщина", "80")]),
            row(Some("Б два"), None, &[("толщина", "90")]),
        ];
        let (_, header, _) = finalize_catalog_rows(rows, false).unwrap();
        assert!(header.contains(&"толщина".to_string()));
    }

    #[test]
    fn price_falls_back_to_plausible_numeric_attribute() {
        let rows = vec![
            row(None, None, &[("наименование", "Дверь Классика"), ("опт", "15 400")]),
            row(None, None, &[("наименование", "Дверь Модерн"), ("опт", "18 900")]),
        ];
        let (items, _, report) = finalize_catalog_rows(rows, false).unwrap();
        assert_eq!(items[0]["title"], "Дверь Классика");
        assert_eq!(items[0]["price"], "15400");
        assert_eq!(report.priced_rows, 2);
    }

    #[test]
    fn ids_are_sequential_strings() {
        let rows = vec![
            row(Some("Первый товар"), None, &[]),
            row(Some("Второй товар"), None, &[]),
        ];
        let (items, _, _) = finalize_catalog_rows(rows, false).unwrap();
        assert_eq!(items[0]["id"], "1");
        assert_eq!(items[1]["id"], "2");
    }

    #[test]
    fn existing_ids_are_kept_on_request() {
        let rows = vec![
            row(Some("Первый товар"), None, &[("id", "105")]),
            row(Some("Второй товар"), None, &[("id", "106")]),
        ];
        let (items, header, _) = finalize_catalog_rows(rows, true).unwrap();
        assert_eq!(items[0]["id"], "105");
        assert_eq!(items[1]["id"], "106");
        // The raw id column itself never survives as an extra column.
        assert_eq!(header.iter().filter(|name| name.as_str() == "id").count(), 1);
    }

    #[test]
    fn empty_input_finalizes_to_empty_catalog() {
        let (items, header, report) = finalize_catalog_rows(Vec::new(), false).unwrap();
        assert!(items.is_empty());
        assert_eq!(header, vec!["id", "title", "price"]);
        assert_eq!(report.item_count, 0);
    }
}
