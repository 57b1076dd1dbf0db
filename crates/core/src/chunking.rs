//! Splits sanitized page text into retrieval-sized [`CatalogChunk`]s.

use crate::models::CatalogChunk;
use crate::text::{sanitize_text, sku_tokens};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 700,
            overlap_chars: 120,
        }
    }
}

/// Explicit accumulator folded over paragraphs; owns all flushing state so
/// nothing is captured in closures.
struct ChunkAccumulator {
    config: ChunkingConfig,
    current: String,
    flushed: Vec<String>,
}

impl ChunkAccumulator {
    fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            current: String::new(),
            flushed: Vec::new(),
        }
    }

    fn push_paragraph(&mut self, paragraph: &str) {
        if self.current.is_empty() {
            self.current.push_str(paragraph);
            return;
        }

        let combined = self.current.chars().count() + paragraph.chars().count() + 2;
        if combined <= self.config.chunk_chars {
            self.current.push_str("\n\n");
            self.current.push_str(paragraph);
            return;
        }

        self.flush();
        self.current.push_str(paragraph);
    }

    fn flush(&mut self) {
        if self.current.trim().is_empty() {
            self.current.clear();
            return;
        }

        let finished = std::mem::take(&mut self.current);

        // Seed the next chunk with a trailing overlap so a record split at
        // the boundary stays queryable from both sides.
        if self.config.overlap_chars > 0 {
            let chars: Vec<char> = finished.chars().collect();
            let tail_start = chars.len().saturating_sub(self.config.overlap_chars);
            let tail: String = chars[tail_start..].iter().collect();
            if let Some(cut) = tail.find(char::is_whitespace) {
                let trimmed = tail[cut..].trim();
                if !trimmed.is_empty() {
                    self.current.push_str(trimmed);
                    self.current.push_str("\n\n");
                }
            }
        }

        self.flushed.push(finished);
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.trim().is_empty() {
            let last = std::mem::take(&mut self.current);
            self.flushed.push(last);
        }
        self.flushed
    }
}

fn heuristic_title(text: &str) -> String {
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.contains(':') {
            continue;
        }
        if !trimmed.chars().any(char::is_alphabetic) {
            continue;
        }
        let mut title: String = trimmed.chars().take(80).collect();
        if trimmed.chars().count() > 80 {
            title.push('…');
        }
        return title;
    }
    String::new()
}

fn extract_article_codes(text: &str) -> Vec<String> {
    let mut codes = Vec::new();
    for found in sku_tokens(text) {
        let code = found.to_string();
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

/// Splits one page of raw text into chunks; `next_id` carries the chunk id
/// sequence across pages.
pub fn split_page_chunks(
    page: u32,
    raw_text: &str,
    config: ChunkingConfig,
    next_id: &mut u64,
) -> Vec<CatalogChunk> {
    let sanitized = sanitize_text(raw_text);
    if sanitized.trim().is_empty() {
        return Vec::new();
    }

    let mut accumulator = ChunkAccumulator::new(config);
    for paragraph in sanitized.split("\n\n") {
        let paragraph = paragraph.trim();
        if !paragraph.is_empty() {
            accumulator.push_paragraph(paragraph);
        }
    }

    let mut chunks = Vec::new();
    for text in accumulator.finish() {
        let id = *next_id;
        *next_id += 1;
        chunks.push(CatalogChunk {
            id,
            page,
            title: heuristic_title(&text),
            article_codes: extract_article_codes(&text),
            text,
        });
    }
    chunks
}

/// Stable chunk-content hash used in persisted documents.
pub fn chunk_content_hash(chunks: &[CatalogChunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.page.to_le_bytes());
        hasher.update(chunk.text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_size_budget() {
        let paragraph = "Дверь входная стальная с терморазрывом и зеркалом. ".repeat(4);
        let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
        let mut next_id = 0;
        let config = ChunkingConfig {
            chunk_chars: 250,
            overlap_chars: 40,
        };

        let chunks = split_page_chunks(1, &text, config, &mut next_id);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // One oversized paragraph may exceed the budget, grouped
            // paragraphs must not.
            assert!(chunk.text.chars().count() <= 250 + paragraph.chars().count());
        }
    }

    #[test]
    fn chunk_ids_are_sequential_across_pages() {
        let mut next_id = 0;
        let first = split_page_chunks(1, "первая страница", ChunkingConfig::default(), &mut next_id);
        let second = split_page_chunks(2, "вторая страница", ChunkingConfig::default(), &mut next_id);
        assert_eq!(first[0].id, 0);
        assert_eq!(second[0].id, 1);
        assert_eq!(second[0].page, 2);
    }

    #[test]
    fn heuristic_title_skips_key_value_lines() {
        let text = "Цвет: белый\nДверь Гранит Ультра\nЦена: 45000";
        assert_eq!(heuristic_title(text), "Дверь Гранит Ультра");
    }

    #[test]
    fn article_codes_are_collected_once() {
        let codes = extract_article_codes("Модель ДГ-21 и снова ДГ-21, а ещё ТР-110_СБ");
        assert_eq!(codes, vec!["ДГ-21".to_string(), "ТР-110_СБ".to_string()]);
    }

    #[test]
    fn empty_page_produces_no_chunks() {
        let mut next_id = 0;
        let chunks = split_page_chunks(1, "  \n\n ", ChunkingConfig::default(), &mut next_id);
        assert!(chunks.is_empty());
    }

    #[test]
    fn content_hash_is_stable() {
        let mut next_id = 0;
        let chunks = split_page_chunks(1, "один и тот же текст", ChunkingConfig::default(), &mut next_id);
        assert_eq!(chunk_content_hash(&chunks), chunk_content_hash(&chunks));
    }
}
