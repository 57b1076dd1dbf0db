use crate::error::ExtractionError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, ExtractionError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, ExtractionError> {
        let document =
            Document::load(path).map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(ExtractionError::NoReadableText(
                path.display().to_string(),
            ));
        }

        Ok(pages)
    }
}

/// Best-effort structural scanner used when the full parser cannot read the
/// file: walks raw bytes for `stream ... endstream` regions, pulls
/// parenthesized text-show strings out of each region, and treats every
/// stream as one logical page.
///
/// This is a compatibility shim, not a conformant decoder: only the escape
/// set `\n \r \t \b \f \( \) \\` is understood and remaining bytes map as
/// Latin-1.
#[derive(Default)]
pub struct RawStreamExtractor;

impl PdfExtractor for RawStreamExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let pages = scan_raw_streams(&bytes);

        if pages.is_empty() {
            return Err(ExtractionError::NoReadableText(
                path.display().to_string(),
            ));
        }

        Ok(pages)
    }
}

fn scan_raw_streams(bytes: &[u8]) -> Vec<PageText> {
    let mut pages = Vec::new();
    let mut cursor = 0;
    let mut page_number = 0u32;

    while let Some(start) = find_subsequence(&bytes[cursor..], b"stream") {
        let body_start = cursor + start + b"stream".len();
        let Some(end) = find_subsequence(&bytes[body_start..], b"endstream") else {
            break;
        };
        let body = &bytes[body_start..body_start + end];

        let text = decode_text_strings(body);
        if !text.trim().is_empty() {
            page_number += 1;
            pages.push(PageText {
                number: page_number,
                text,
            });
        }

        cursor = body_start + end + b"endstream".len();
    }

    pages
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_text_strings(body: &[u8]) -> String {
    let mut text = String::new();
    let mut index = 0;

    while index < body.len() {
        if body[index] != b'(' {
            index += 1;
            continue;
        }

        let mut piece = String::new();
        let mut depth = 1usize;
        index += 1;
        while index < body.len() && depth > 0 {
            match body[index] {
                b'\\' if index + 1 < body.len() => {
                    piece.push(decode_escape(body[index + 1]));
                    index += 2;
                    continue;
                }
                b'(' => {
                    depth += 1;
                    piece.push('(');
                }
                b')' => {
                    depth -= 1;
                    if depth > 0 {
                        piece.push(')');
                    }
                }
                byte => piece.push(byte as char),
            }
            index += 1;
        }

        if !piece.trim().is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&piece);
        }
    }

    text
}

fn decode_escape(byte: u8) -> char {
    match byte {
        b'n' => '\n',
        b'r' => '\r',
        b't' => '\t',
        b'b' => '\u{0008}',
        b'f' => '\u{000C}',
        other => other as char,
    }
}

/// Extracts page texts with the full parser, falling back to the raw stream
/// scanner when the file is structurally unreadable. A page that fails to
/// decode is fatal for the whole call.
pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, ExtractionError> {
    match LopdfExtractor.extract_pages(path) {
        Ok(pages) => Ok(pages),
        Err(ExtractionError::PdfParse(parse_error)) => RawStreamExtractor
            .extract_pages(path)
            .map_err(|fallback_error| {
                ExtractionError::PdfParse(format!(
                    "{parse_error}; raw stream fallback failed: {fallback_error}"
                ))
            }),
        Err(error) => Err(error),
    }
}
