use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf had no readable page text: {0}")]
    NoReadableText(String),
}

/// Finalization invariant violations. These indicate a bug in the pipeline
/// rather than bad user input and abort the finalization call.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("price is not a plain non-negative decimal: {0:?}")]
    InvalidPrice(String),

    #[error("title contains a forbidden token: {0:?}")]
    ForbiddenTitleToken(String),

    #[error("duplicate column in header: {0:?}")]
    DuplicateColumn(String),

    #[error("banned column leaked into header: {0:?}")]
    BannedColumn(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index has no chunks: {0}")]
    EmptyIndex(String),

    #[error("no pdf files found in {0}")]
    NoPdfFiles(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
