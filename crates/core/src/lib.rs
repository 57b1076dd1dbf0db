pub mod blocks;
pub mod chunking;
pub mod error;
pub mod extractor;
pub mod finalize;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod text;

pub use blocks::{
    block_to_row, collect_catalog_rows, parse_chunk_blocks, AttributePair, DroppedBlock, Line,
    PriceCandidate, ProductBlock, StopPhrases, TitleCandidate,
};
pub use chunking::{chunk_content_hash, split_page_chunks, ChunkingConfig};
pub use error::{ExtractionError, IndexError, Result, ValidationError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor, RawStreamExtractor};
pub use finalize::{finalize_catalog_rows, DuplicateTitleFix, PipelineReport};
pub use index::{
    build_pdf_index, digest_file, index_to_catalog_items, load_index, write_catalog_csv,
    CatalogBuild, IndexedCatalog,
};
pub use ingest::{discover_pdf_files, ingest_folder, IngestionReport, SkippedCatalog};
pub use models::{
    CatalogChunk, CatalogIndexDocument, CatalogItem, CustomerNeeds, RawAttributeRow,
    INDEX_FORMAT_VERSION,
};
pub use retrieval::{
    compose_search_text, content_signature, tokenize, CatalogSearchCache, RankedItem, SearchIndex,
    TfVectorizer,
};
