use catalog_search_core::{
    index_to_catalog_items, ingest_folder, load_index, write_catalog_csv, CatalogSearchCache,
    ChunkingConfig, CustomerNeeds, StopPhrases,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "catalog-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a folder of PDF catalogs into index, CSV and manifest files.
    Ingest {
        /// Folder that contains PDF catalogs recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Directory for index and catalog artifacts.
        #[arg(long, default_value = "indexes")]
        out: PathBuf,
        /// Tenant to also write a spreadsheet-facing CSV for.
        #[arg(long)]
        tenant: Option<String>,
        /// Root directory for tenant catalog output.
        #[arg(long, default_value = ".")]
        tenant_root: PathBuf,
        /// JSON file with extra stop phrases: { "phrases": [...] }.
        #[arg(long)]
        stop_phrases: Option<PathBuf>,
        /// Target chunk size in characters.
        #[arg(long, default_value = "700")]
        chunk_chars: usize,
        /// Overlap carried between adjacent chunks, in characters.
        #[arg(long, default_value = "120")]
        overlap: usize,
    },
    /// Query a previously built index for matching catalog items.
    Query {
        /// Path to a *.index.json file.
        #[arg(long)]
        index: PathBuf,
        /// Free-text query.
        #[arg(long)]
        query: String,
        /// Structured buyer needs as JSON, e.g. {"type":"дверь","budget":"30000"}.
        #[arg(long)]
        needs: Option<String>,
        /// Number of items to return.
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Tenant name used for index caching.
        #[arg(long, default_value = "default")]
        tenant: String,
        /// Score via token overlap instead of the vector model.
        #[arg(long, default_value_t = false)]
        token_fallback: bool,
    },
}

fn load_stop_phrases(path: Option<&Path>) -> anyhow::Result<StopPhrases> {
    match path {
        Some(path) => Ok(StopPhrases::from_json_file(path)?),
        None => Ok(StopPhrases::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "catalog-search boot"
    );

    match cli.command {
        Command::Ingest {
            folder,
            out,
            tenant,
            tenant_root,
            stop_phrases,
            chunk_chars,
            overlap,
        } => {
            let stop = load_stop_phrases(stop_phrases.as_deref())?;
            let config = ChunkingConfig {
                chunk_chars,
                overlap_chars: overlap,
            };

            let report = ingest_folder(&folder, &out, config, &stop)?;

            if !report.skipped.is_empty() {
                warn!(
                    skipped = report.skipped.len(),
                    folder = %folder.display(),
                    "some catalogs could not be ingested"
                );
                for skipped in &report.skipped {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped catalog");
                }
            }

            if report.indexed.is_empty() {
                println!("0 catalogs ingested (all files were skipped)");
                return Ok(());
            }

            for catalog in &report.indexed {
                info!(
                    source = %catalog.document.original_name,
                    pages = catalog.document.page_count,
                    chunks = catalog.document.chunk_count,
                    items = catalog.build.items.len(),
                    priced = catalog.build.report.priced_rows,
                    "catalog ingested"
                );

                if let Some(tenant) = &tenant {
                    let base_name = catalog
                        .document
                        .original_name
                        .trim_end_matches(".pdf")
                        .trim_end_matches(".PDF");
                    let path = write_catalog_csv(
                        &tenant_root,
                        tenant,
                        &catalog.build.items,
                        &catalog.build.header,
                        base_name,
                        &catalog.build.report,
                        None,
                    )?;
                    info!(path = %path.display(), tenant = %tenant, "tenant csv written");
                }
            }

            println!(
                "{} catalogs ingested at {}",
                report.indexed.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Query {
            index,
            query,
            needs,
            limit,
            tenant,
            token_fallback,
        } => {
            let needs: CustomerNeeds = match needs {
                Some(raw) => serde_json::from_str(&raw)?,
                None => CustomerNeeds::default(),
            };

            let document = load_index(&index)?;
            let build = index_to_catalog_items(&document, &index, &StopPhrases::default())?;

            let cache = CatalogSearchCache::new(!token_fallback);
            let ranked = cache.retrieve_context(&build.items, &needs, &query, &tenant, limit);

            println!("query: {query}");
            if ranked.is_empty() {
                println!("no items in catalog");
                return Ok(());
            }

            for hit in ranked {
                let empty = String::new();
                let id = hit.item.get("id").unwrap_or(&empty);
                let title = hit.item.get("title").unwrap_or(&empty);
                let price = hit.item.get("price").unwrap_or(&empty);
                println!("[{id}] score={:.4} title={title} price={price}", hit.score);
                if !hit.excerpt.is_empty() {
                    println!("  excerpt: {}", hit.excerpt);
                }
            }
        }
    }

    Ok(())
}
