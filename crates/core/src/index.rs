//! Index persistence and catalog materialization.
//!
//! An ingested PDF becomes a JSON [`CatalogIndexDocument`] on disk; that
//! document is later replayed into a finalized CSV catalog plus a manifest
//! describing what the pipeline did to the data.

use crate::blocks::{collect_catalog_rows, DroppedBlock, StopPhrases};
use crate::chunking::{chunk_content_hash, split_page_chunks, ChunkingConfig};
use crate::error::{IndexError, Result};
use crate::extractor::extract_page_texts;
use crate::finalize::{finalize_catalog_rows, PipelineReport};
use crate::models::{CatalogIndexDocument, CatalogItem, INDEX_FORMAT_VERSION};
use chrono::Utc;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Share of kept blocks allowed to miss a price before the manifest starts
/// carrying concrete examples.
const PRICE_GAP_ALERT_RATIO: f64 = 0.2;
const PRICE_GAP_EXAMPLES: usize = 5;

pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// One fully ingested catalog: the persisted index document plus the
/// finalized catalog artifacts written next to it.
pub struct IndexedCatalog {
    pub document: CatalogIndexDocument,
    pub index_path: PathBuf,
    pub build: CatalogBuild,
}

/// Extracts, chunks and persists one PDF catalog, then materializes the
/// sibling CSV and manifest next to the index file.
pub fn build_pdf_index(
    source_path: &Path,
    output_dir: &Path,
    original_name: &str,
    config: ChunkingConfig,
    stop: &StopPhrases,
) -> Result<IndexedCatalog> {
    let pages = extract_page_texts(source_path)?;
    let page_count = pages.len();

    let mut chunks = Vec::new();
    let mut next_id = 0u64;
    for page in pages {
        chunks.extend(split_page_chunks(page.number, &page.text, config, &mut next_id));
    }

    if chunks.is_empty() {
        return Err(IndexError::EmptyIndex(source_path.display().to_string()));
    }

    let document = CatalogIndexDocument {
        format: INDEX_FORMAT_VERSION,
        catalog_id: Uuid::new_v4().to_string(),
        source_path: source_path.to_string_lossy().to_string(),
        original_name: original_name.to_string(),
        generated_at: Utc::now(),
        content_hash: chunk_content_hash(&chunks),
        page_count,
        chunk_count: chunks.len(),
        chunks,
    };

    let stem = source_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IndexError::MissingFileName(source_path.display().to_string()))?;

    fs::create_dir_all(output_dir)?;
    let index_path = output_dir.join(format!("{stem}.index.json"));
    let serialized = serde_json::to_string_pretty(&document)?;
    fs::write(&index_path, serialized)?;

    let build = index_to_catalog_items(&document, &index_path, stop)?;

    Ok(IndexedCatalog {
        document,
        index_path,
        build,
    })
}

pub fn load_index(path: &Path) -> Result<CatalogIndexDocument> {
    let raw = fs::read_to_string(path)?;
    let document: CatalogIndexDocument = serde_json::from_str(&raw)?;
    if document.chunks.is_empty() {
        return Err(IndexError::EmptyIndex(path.display().to_string()));
    }
    Ok(document)
}

/// Everything one catalog conversion produced, including what was thrown
/// away on the way.
pub struct CatalogBuild {
    pub items: Vec<CatalogItem>,
    pub header: Vec<String>,
    pub report: PipelineReport,
    pub dropped_blocks: Vec<DroppedBlock>,
    pub csv_path: PathBuf,
    pub manifest_path: PathBuf,
}

fn display_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn csv_field(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|ch| if ch == '\n' || ch == '\t' { ' ' } else { ch })
        .collect();
    if flat.contains(',') || flat.contains(';') || flat.contains('"') {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

fn render_csv(items: &[CatalogItem], header: &[String], delimiter: char) -> String {
    let mut out = String::new();
    out.push_str(
        &header
            .iter()
            .map(|column| csv_field(column))
            .collect::<Vec<_>>()
            .join(&delimiter.to_string()),
    );
    out.push('\n');
    for item in items {
        let row: Vec<String> = header
            .iter()
            .map(|column| csv_field(item.get(column).map(String::as_str).unwrap_or("")))
            .collect();
        out.push_str(&row.join(&delimiter.to_string()));
        out.push('\n');
    }
    out
}

fn build_manifest(
    index: &CatalogIndexDocument,
    report: &PipelineReport,
    dropped_blocks: &[DroppedBlock],
    priceless_examples: &[String],
) -> Value {
    let merge_map: Map<String, Value> = report
        .merge_map
        .iter()
        .map(|(alias, canonical)| {
            (display_case(alias), Value::String(display_case(canonical)))
        })
        .collect();

    json!({
        "catalog_id": index.catalog_id,
        "original_name": index.original_name,
        "generated_at": Utc::now(),
        "page_count": index.page_count,
        "chunk_count": index.chunk_count,
        "item_count": report.item_count,
        "priced_rows": report.priced_rows,
        "columns": report.columns,
        "merged_columns": merge_map,
        "pipeline": report,
        "dropped_blocks": dropped_blocks
            .iter()
            .map(|dropped| json!({ "reason": dropped.reason, "text": dropped.text }))
            .collect::<Vec<_>>(),
        "price_missing_examples": priceless_examples,
    })
}

/// Replays a persisted index into finalized catalog items and writes the
/// sibling `<stem>.csv` and `<stem>.manifest.json` next to the index file.
pub fn index_to_catalog_items(
    index: &CatalogIndexDocument,
    index_path: &Path,
    stop: &StopPhrases,
) -> Result<CatalogBuild> {
    let (rows, dropped_blocks) = collect_catalog_rows(&index.chunks, stop);
    let (items, header, report) = finalize_catalog_rows(rows, false)?;

    // Price gaps across a large share of items usually mean the source used
    // a tabular layout the extractor flattened; surface a few rows so the
    // operator can check without re-running anything.
    let priceless: Vec<String> = items
        .iter()
        .filter(|item| item.get("price").map_or(true, |price| price.is_empty()))
        .filter_map(|item| item.get("title").cloned())
        .collect();
    let priceless_examples: Vec<String> = if !items.is_empty()
        && priceless.len() as f64 / items.len() as f64 > PRICE_GAP_ALERT_RATIO
    {
        priceless.into_iter().take(PRICE_GAP_EXAMPLES).collect()
    } else {
        Vec::new()
    };

    let stem = index_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.trim_end_matches(".index").to_string())
        .ok_or_else(|| IndexError::MissingFileName(index_path.display().to_string()))?;
    let parent = index_path.parent().unwrap_or_else(|| Path::new("."));

    let csv_path = parent.join(format!("{stem}.csv"));
    fs::write(&csv_path, render_csv(&items, &header, ','))?;

    let manifest = build_manifest(index, &report, &dropped_blocks, &priceless_examples);
    let manifest_path = parent.join(format!("{stem}.manifest.json"));
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    Ok(CatalogBuild {
        items,
        header,
        report,
        dropped_blocks,
        csv_path,
        manifest_path,
    })
}

fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "catalog".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Writes the tenant-facing catalog CSV under `<root>/<tenant>/catalogs/`.
///
/// Spreadsheet applications on Windows expect `;` delimiters and a BOM for
/// Cyrillic content, so the tenant copy differs from the sibling CSV next to
/// the index. When `meta` is given, pipeline summary fields are merged into
/// it for the caller's own manifest.
pub fn write_catalog_csv(
    root: &Path,
    tenant: &str,
    items: &[CatalogItem],
    header: &[String],
    base_name: &str,
    report: &PipelineReport,
    meta: Option<&mut Map<String, Value>>,
) -> Result<PathBuf> {
    let dir = root.join(tenant).join("catalogs");
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{}.csv", sanitize_file_stem(base_name)));
    let mut contents = String::from("\u{FEFF}");
    contents.push_str(&render_csv(items, header, ';'));
    fs::write(&path, contents)?;

    if let Some(meta) = meta {
        meta.insert("items".to_string(), json!(items.len()));
        meta.insert("columns".to_string(), json!(header));
        meta.insert("pipeline".to_string(), serde_json::to_value(report)?);
    }

    Ok(path)
}
