//! Folder-level ingestion: PDF discovery plus best-effort batch indexing.

use crate::blocks::StopPhrases;
use crate::chunking::ChunkingConfig;
use crate::error::{IndexError, Result};
use crate::index::{build_pdf_index, IndexedCatalog};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedCatalog {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub indexed: Vec<IndexedCatalog>,
    pub skipped: Vec<SkippedCatalog>,
}

/// Indexes every PDF under `folder`, continuing past files that fail to
/// extract or finalize; each failure is recorded with its reason.
pub fn ingest_folder(
    folder: &Path,
    output_dir: &Path,
    config: ChunkingConfig,
    stop: &StopPhrases,
) -> Result<IngestionReport> {
    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(IndexError::NoPdfFiles(folder.display().to_string()));
    }

    let mut indexed = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        let original_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());

        match build_pdf_index(&path, output_dir, &original_name, config, stop) {
            Ok(catalog) => indexed.push(catalog),
            Err(error) => skipped.push(SkippedCatalog {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(IngestionReport { indexed, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.pdf"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt")).and_then(|mut file| file.write_all(b"text"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn ingestion_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = ingest_folder(
            dir.path(),
            dir.path(),
            ChunkingConfig::default(),
            &StopPhrases::default(),
        );
        assert!(matches!(result, Err(IndexError::NoPdfFiles(_))));
        Ok(())
    }

    #[test]
    fn best_effort_skips_unreadable_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let out = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(
            dir.path().join("readable.pdf"),
            b"%PDF-1.4\nstream (Dver Granit Cena: 12500 rub) endstream\n",
        )?;

        let report = ingest_folder(
            dir.path(),
            out.path(),
            ChunkingConfig::default(),
            &StopPhrases::default(),
        )?;

        assert_eq!(report.indexed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0].path.file_name().and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }
}
