//! Block segmentation and attribute/price/title extraction from
//! unstructured page text.
//!
//! A chunk's text is re-flowed, split into blank-line-delimited blocks, and
//! each block is mined for key/value pairs, a best price candidate and title
//! candidates. Heuristics here never fail on malformed input; a line that
//! matches nothing simply falls through.

use crate::error::IndexError;
use crate::models::{CatalogChunk, RawAttributeRow};
use crate::text::{
    clean_title, contains_currency_token, contains_price_word, contains_unit_token, normalize_key,
    normalize_price, sanitize_value,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

/// Attribute words recognized when a key has to be guessed from plain text
/// (inline embedded pairs, "Вес 5"-style runs, re-flow break points).
const ATTRIBUTE_WORDS: [&str; 22] = [
    "цвет",
    "вес",
    "материал",
    "размер",
    "толщина",
    "высота",
    "ширина",
    "глубина",
    "производитель",
    "гарантия",
    "комплектация",
    "покрытие",
    "фурнитура",
    "утеплитель",
    "замок",
    "замки",
    "петли",
    "артикул",
    "модель",
    "серия",
    "бренд",
    "страна",
];

fn attribute_words_alternation() -> String {
    ATTRIBUTE_WORDS.join("|")
}

static COLON_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:：]{2,60}?)\s*[:：]\s*(\S.*)$").unwrap());

static DASH_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.{2,40}?)\s+[–—-]\s+(\S.*)$").unwrap());

static EQUALS_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.{2,40}?)\s*=\s*(\S.*)$").unwrap());

static DOTS_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.{2,40}?)\s*\.{3,}\s*(\S.*)$").unwrap());

static WORD_DIGIT_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^((?:{0})(?:\s+\p{{L}}+)?)\s+(\d.*)$",
        attribute_words_alternation()
    ))
    .unwrap()
});

static EMBEDDED_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)[\s,]((?:{0}))\s+(\S.{{0,40}}?)\s*$",
        attribute_words_alternation()
    ))
    .unwrap()
});

static EMBEDDED_LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^((?:{0}))\s+(\S.*)$",
        attribute_words_alternation()
    ))
    .unwrap()
});

static DANGLING_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.{2,60}?)\s*[:–—-]$").unwrap());

static REFLOW_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[А-ЯЁA-Z][а-яёa-z]{2,}\s*[:：]").unwrap());

static REFLOW_WORD_NUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{0}) \d",
        attribute_words_alternation()
    ))
    .unwrap()
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:[ \u{00A0}]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d+)*").unwrap()
});

static GENERIC_HEADERS: LazyLock<HashSet<String>> = LazyLock::new(|| {
    [
        "размер",
        "размеры",
        "материал",
        "характеристики",
        "описание",
        "цвет",
        "комплектация",
        "габариты",
        "опции",
        "параметры",
        "примечание",
    ]
    .into_iter()
    .map(normalize_key)
    .collect()
});

const GENERIC_TITLE_WORDS: [&str; 18] = [
    "белый",
    "черный",
    "чёрный",
    "серый",
    "бежевый",
    "коричневый",
    "венге",
    "дуб",
    "орех",
    "металл",
    "дерево",
    "стекло",
    "золото",
    "серебро",
    "антик",
    "графит",
    "шоколад",
    "медь",
];

const DEFAULT_STOP_PHRASES: [&str; 12] = [
    "все права защищены",
    "реклама",
    "акция недели",
    "доставка по всей россии",
    "официальный дилер",
    "прайс-лист действителен",
    "условия доставки",
    "бесплатный замер",
    "подпишитесь",
    "скачано с",
    "продолжение на следующей странице",
    "www.",
];

#[derive(Debug, Deserialize)]
struct PhraseFile {
    phrases: Vec<String>,
}

/// Denylist of substrings marking a block as non-product boilerplate.
/// Longest phrases are tried first.
#[derive(Debug, Clone)]
pub struct StopPhrases {
    phrases: Vec<String>,
}

impl Default for StopPhrases {
    fn default() -> Self {
        Self::from_phrases(Vec::new())
    }
}

impl StopPhrases {
    fn from_phrases(extra: Vec<String>) -> Self {
        let mut phrases: Vec<String> = DEFAULT_STOP_PHRASES
            .iter()
            .map(|phrase| phrase.to_lowercase())
            .collect();
        for phrase in extra {
            let lowered = phrase.trim().to_lowercase();
            if !lowered.is_empty() && !phrases.contains(&lowered) {
                phrases.push(lowered);
            }
        }
        phrases.sort_by(|left, right| right.chars().count().cmp(&left.chars().count()));
        Self { phrases }
    }

    /// Loads `{ "phrases": [...] }` and merges it into the built-in list.
    pub fn from_json_file(path: &Path) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path)?;
        let file: PhraseFile = serde_json::from_str(&raw)?;
        Ok(Self::from_phrases(file.phrases))
    }

    pub fn matches(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub raw: String,
    pub clean: String,
    pub continuation: bool,
}

#[derive(Debug, Clone)]
pub struct AttributePair {
    pub key: String,
    pub value: String,
    pub line_index: usize,
}

#[derive(Debug, Clone)]
pub struct PriceCandidate {
    pub raw: String,
    pub normalized: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct TitleCandidate {
    /// Source line index, or -1 for a chunk-level guess.
    pub line_index: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ProductBlock {
    pub lines: Vec<Line>,
    pub pairs: Vec<AttributePair>,
    pub price: Option<PriceCandidate>,
    pub title_candidates: Vec<TitleCandidate>,
    pub score: f64,
    pub stop_flagged: bool,
}

impl ProductBlock {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.clean.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Inserts line breaks before tokens that open a new "key: value" pair or an
/// attribute-word-then-number run, without splitting inside a word.
fn reflow_text(text: &str) -> String {
    let mut break_positions: Vec<usize> = Vec::new();
    for pattern in [&*REFLOW_COLON, &*REFLOW_WORD_NUM] {
        for found in pattern.find_iter(text) {
            let start = found.start();
            if start > 0 && text.as_bytes()[start - 1] == b' ' {
                break_positions.push(start - 1);
            }
        }
    }
    if break_positions.is_empty() {
        return text.to_string();
    }
    break_positions.sort_unstable();
    break_positions.dedup();

    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;
    for position in break_positions {
        result.push_str(&text[cursor..position]);
        result.push('\n');
        cursor = position + 1;
    }
    result.push_str(&text[cursor..]);
    result
}

fn build_lines(text: &str) -> Vec<Line> {
    text.lines()
        .map(|raw| Line {
            continuation: raw.starts_with(' ') || raw.starts_with('\t'),
            clean: sanitize_value(raw),
            raw: raw.to_string(),
        })
        .collect()
}

fn split_into_blocks(lines: Vec<Line>) -> Vec<Vec<Line>> {
    let mut blocks = Vec::new();
    let mut current: Vec<Line> = Vec::new();
    for line in lines {
        if line.clean.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn acceptable_key(key: &str) -> bool {
    let letters = key.chars().filter(|ch| ch.is_alphabetic()).count();
    letters >= 2 && key.chars().count() <= 60
}

fn match_pair(segment: &str) -> Option<(String, String)> {
    for pattern in [
        &*COLON_PAIR,
        &*DASH_PAIR,
        &*EQUALS_PAIR,
        &*DOTS_PAIR,
        &*WORD_DIGIT_PAIR,
    ] {
        if let Some(caps) = pattern.captures(segment) {
            let key = caps[1].trim().to_string();
            let value = caps[2].trim().to_string();
            if acceptable_key(&key) && !value.is_empty() {
                return Some((key, value));
            }
        }
    }
    None
}

/// Recursively peels trailing embedded pairs out of a value
/// ("Цвет Белый Вес 5" -> base "" plus цвет=Белый, вес=5).
fn peel_embedded(value: &str) -> (String, Vec<(String, String)>) {
    let mut base = value.trim().to_string();
    let mut peeled = Vec::new();

    loop {
        let found = EMBEDDED_TAIL
            .captures_iter(&base)
            .last()
            .map(|caps| {
                let whole = caps.get(0).map(|m| m.start()).unwrap_or(0);
                (whole, caps[1].to_string(), caps[2].trim().to_string())
            });
        match found {
            Some((cut, key, val)) if !val.is_empty() => {
                peeled.push((key, val));
                base.truncate(cut);
                let trimmed = base.trim_end().len();
                base.truncate(trimmed);
            }
            _ => break,
        }
    }

    let lead = EMBEDDED_LEAD
        .captures(&base)
        .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()));
    if let Some((key, val)) = lead {
        if !val.is_empty() {
            peeled.push((key, val));
            base.clear();
        }
    }

    peeled.reverse();
    (base, peeled)
}

fn split_segments(clean: &str) -> Vec<&str> {
    clean
        .split(['•', '·', '▪', '◦', '|', ';'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn is_pair_line(clean: &str) -> bool {
    split_segments(clean)
        .into_iter()
        .any(|segment| match_pair(segment).is_some())
}

fn starts_like_continuation(line: &Line) -> bool {
    if line.continuation {
        return true;
    }
    match line.clean.chars().next() {
        Some(first) => first.is_lowercase() || (!first.is_alphanumeric() && first != '('),
        None => false,
    }
}

struct PairExtraction {
    pairs: Vec<AttributePair>,
    consumed: HashSet<usize>,
}

fn extract_pairs(lines: &[Line], stop: &StopPhrases) -> PairExtraction {
    let mut pairs: Vec<AttributePair> = Vec::new();
    let mut consumed: HashSet<usize> = HashSet::new();
    // (key, key line index, value lines collected so far)
    let mut open_key: Option<(String, usize, Vec<String>)> = None;

    for (index, line) in lines.iter().enumerate() {
        if line.clean.is_empty() {
            continue;
        }

        if let Some((key, key_index, values)) = open_key.take() {
            let terminates = is_pair_line(&line.clean) || is_title_candidate(&line.clean, stop);
            if terminates {
                if !values.is_empty() {
                    pairs.push(AttributePair {
                        key,
                        value: values.join(" "),
                        line_index: key_index,
                    });
                }
            } else {
                let mut values = values;
                values.push(line.clean.clone());
                consumed.insert(index);
                open_key = Some((key, key_index, values));
                continue;
            }
        }

        let mut matched = false;
        for segment in split_segments(&line.clean) {
            if let Some((key, value)) = match_pair(segment) {
                let (base, embedded) = peel_embedded(&value);
                if !base.is_empty() {
                    pairs.push(AttributePair {
                        key: key.clone(),
                        value: base,
                        line_index: index,
                    });
                } else if embedded.is_empty() {
                    pairs.push(AttributePair {
                        key: key.clone(),
                        value,
                        line_index: index,
                    });
                }
                for (embedded_key, embedded_value) in embedded {
                    pairs.push(AttributePair {
                        key: embedded_key,
                        value: embedded_value,
                        line_index: index,
                    });
                }
                matched = true;
            }
        }
        if matched {
            consumed.insert(index);
            continue;
        }

        if starts_like_continuation(line) {
            if let Some(last) = pairs.last_mut() {
                if index.saturating_sub(last.line_index) <= 2 {
                    last.value.push(' ');
                    last.value.push_str(&line.clean);
                    consumed.insert(index);
                    continue;
                }
            }
        }

        if let Some(caps) = DANGLING_KEY.captures(&line.clean) {
            let key = caps[1].trim().to_string();
            if acceptable_key(&key) {
                open_key = Some((key, index, Vec::new()));
                consumed.insert(index);
                continue;
            }
        }
    }

    if let Some((key, key_index, values)) = open_key {
        if !values.is_empty() {
            pairs.push(AttributePair {
                key,
                value: values.join(" "),
                line_index: key_index,
            });
        }
    }

    PairExtraction { pairs, consumed }
}

fn char_context(text: &str, start: usize, end: usize, radius: usize) -> String {
    let before: String = text[..start]
        .chars()
        .rev()
        .take(radius)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let after: String = text[end..].chars().take(radius).collect();
    format!("{before}{}{after}", &text[start..end])
}

fn neighbor_char(text: &str, start: usize, end: usize) -> (Option<char>, Option<char>) {
    let previous = text[..start].chars().rev().find(|ch| *ch != ' ');
    let next = text[end..].chars().find(|ch| *ch != ' ');
    (previous, next)
}

fn is_dimension_separator(ch: char) -> bool {
    matches!(ch, '×' | 'x' | 'X' | 'х' | 'Х' | '/' | '*')
}

fn select_price(text: &str) -> Option<PriceCandidate> {
    let mut candidates: Vec<(PriceCandidate, f64)> = Vec::new();

    for found in NUMBER.find_iter(text) {
        let (previous, next) = neighbor_char(text, found.start(), found.end());
        if previous.is_some_and(is_dimension_separator) || next.is_some_and(is_dimension_separator)
        {
            continue;
        }

        let normalized = normalize_price(found.as_str());
        if normalized.is_empty() {
            continue;
        }
        let Ok(value) = normalized.parse::<f64>() else {
            continue;
        };

        let context = char_context(text, found.start(), found.end(), 25);
        let has_currency = contains_currency_token(&context);
        let digit_count = found.as_str().chars().filter(char::is_ascii_digit).count();

        let mut weight = 0.0;
        if has_currency {
            weight += 2.0;
        }
        if contains_price_word(&context) {
            weight += 1.5;
        }
        if digit_count >= 4 {
            weight += 1.0;
        }
        let following_token: String = text[found.end()..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        if contains_unit_token(&following_token) {
            weight -= 2.0;
        }
        if value < 300.0 && !has_currency {
            weight -= 2.0;
        }
        if (1700.0..=2400.0).contains(&value) && !has_currency {
            weight -= 3.0;
        }
        if value > 1_000_000.0 {
            weight -= 5.0;
        }

        candidates.push((
            PriceCandidate {
                raw: found.as_str().to_string(),
                normalized,
                weight,
            },
            value,
        ));
    }

    let best_index = candidates
        .iter()
        .enumerate()
        .max_by(|(_, (left, _)), (_, (right, _))| left.weight.total_cmp(&right.weight))
        .map(|(index, _)| index)?;

    if candidates[best_index].0.weight <= 0.0 {
        return None;
    }

    // A sub-1000 winner next to a plausible >= 1000 candidate is usually a
    // fragment; prefer the larger number.
    if candidates[best_index].1 < 1000.0 {
        if let Some((candidate, _)) = candidates
            .iter()
            .filter(|(candidate, value)| *value >= 1000.0 && candidate.weight > 0.0)
            .max_by(|(left, _), (right, _)| left.weight.total_cmp(&right.weight))
        {
            return Some(candidate.clone());
        }
    }

    Some(candidates[best_index].0.clone())
}

fn is_title_candidate(text: &str, stop: &StopPhrases) -> bool {
    let total_chars = text.chars().count();
    if total_chars < 3 {
        return false;
    }
    if contains_currency_token(text) || contains_unit_token(text) {
        return false;
    }
    if stop.matches(text).is_some() {
        return false;
    }
    if GENERIC_HEADERS.contains(&normalize_key(text)) {
        return false;
    }
    if !text.chars().any(char::is_alphabetic) {
        return false;
    }
    let digits = text.chars().filter(char::is_ascii_digit).count();
    if digits > 4 && digits as f64 / total_chars as f64 > 0.35 {
        return false;
    }
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() == 1 && total_chars < 12 && !text.chars().any(char::is_uppercase) {
        return false;
    }
    // Titles in these catalogs open with an uppercase letter or a digit;
    // a lowercase start marks a mid-value continuation.
    if let Some(first) = text.chars().find(|ch| ch.is_alphabetic()) {
        if text.starts_with(first) && first.is_lowercase() {
            return false;
        }
    }
    true
}

fn salvage_title_prefix(title: &str) -> Option<String> {
    let cut = title.find([':', ';', '=']).unwrap_or(title.len());
    let prefix = title[..cut].trim();
    let salvaged: String = prefix.chars().take(60).collect();
    let salvaged = salvaged.trim().to_string();
    if salvaged.chars().count() >= 4 {
        Some(salvaged)
    } else {
        None
    }
}

fn discover_titles(
    lines: &[Line],
    consumed: &HashSet<usize>,
    chunk: &CatalogChunk,
    stop: &StopPhrases,
) -> Vec<TitleCandidate> {
    let mut candidates = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if consumed.contains(&index) || line.clean.is_empty() {
            continue;
        }
        if is_pair_line(&line.clean) {
            continue;
        }
        if is_title_candidate(&line.clean, stop) {
            candidates.push(TitleCandidate {
                line_index: index as i64,
                text: line.clean.clone(),
            });
        }
    }

    if !chunk.title.trim().is_empty() {
        let contaminated = chunk.title.contains(':') || is_pair_line(&chunk.title);
        let fallback = if contaminated {
            salvage_title_prefix(&chunk.title)
        } else {
            Some(chunk.title.clone())
        };
        if let Some(text) = fallback {
            candidates.push(TitleCandidate {
                line_index: -1,
                text,
            });
        }
    }

    candidates
}

fn score_block(block: &ProductBlock) -> f64 {
    let mut score = 0.0;
    if block.price.is_some() {
        score += 2.0;
    }
    if block.pairs.len() >= 2 {
        score += 1.0;
    }
    if !block.title_candidates.is_empty() {
        score += 1.0;
    }
    if block.stop_flagged {
        score -= 2.0;
    }
    if score < 2.0 && !block.stop_flagged && !block.pairs.is_empty() && block.text().contains(':') {
        score = 2.0;
    }
    score
}

/// Parses one chunk's text into scored product blocks.
pub fn parse_chunk_blocks(chunk: &CatalogChunk, stop: &StopPhrases) -> Vec<ProductBlock> {
    let reflowed = reflow_text(&chunk.text);
    let lines = build_lines(&reflowed);

    let mut blocks = Vec::new();
    for block_lines in split_into_blocks(lines) {
        let extraction = extract_pairs(&block_lines, stop);
        let block_text = block_lines
            .iter()
            .map(|line| line.clean.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let price = select_price(&block_text);
        let title_candidates = discover_titles(&block_lines, &extraction.consumed, chunk, stop);
        let stop_flagged = stop.matches(&block_text).is_some();

        let mut block = ProductBlock {
            lines: block_lines,
            pairs: extraction.pairs,
            price,
            title_candidates,
            score: 0.0,
            stop_flagged,
        };
        block.score = score_block(&block);
        blocks.push(block);
    }
    blocks
}

const QUANTITY_PREFIXES: [&str; 4] = ["кол-во ", "количество ", "кол. ", "число "];

fn value_is_numeric(value: &str) -> bool {
    let stripped: String = value
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect();
    !stripped.is_empty() && stripped.chars().all(|ch| ch.is_ascii_digit())
}

fn normalize_attribute_key(key: &str, value: &str) -> String {
    let mut lowered = sanitize_value(key).to_lowercase();

    for prefix in QUANTITY_PREFIXES {
        if let Some(rest) = lowered.strip_prefix(prefix) {
            lowered = rest.to_string();
            break;
        }
    }

    // Lock keys split into a count or a type bucket depending on the value.
    if normalize_key(&lowered).contains("замк") || normalize_key(&lowered).contains("замок") {
        return if value_is_numeric(value) {
            "количество замков".to_string()
        } else {
            "тип замка".to_string()
        };
    }

    lowered
}

fn score_title_text(text: &str) -> f64 {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut score = 0.0;
    if tokens.len() >= 2 {
        score += 2.0;
    }
    if text.chars().any(char::is_alphabetic) && text.chars().any(|ch| ch.is_ascii_digit()) {
        score += 1.0;
    }
    if text.chars().count() >= 6 {
        score += 1.0;
    }
    if tokens.len() == 1 && GENERIC_TITLE_WORDS.contains(&tokens[0].to_lowercase().as_str()) {
        score -= 3.0;
    }
    score
}

fn is_price_hint_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    normalized.starts_with("цен")
        || normalized.starts_with("стоимост")
        || normalized.starts_with("price")
}

/// Converts a parsed block into a raw candidate row.
pub fn block_to_row(block: &ProductBlock, chunk: &CatalogChunk) -> RawAttributeRow {
    let mut row = RawAttributeRow::default();

    for pair in &block.pairs {
        if is_price_hint_key(&pair.key) {
            continue;
        }
        let key = normalize_attribute_key(&pair.key, &pair.value);
        let value = sanitize_value(&pair.value);
        if key.is_empty() || value.is_empty() {
            continue;
        }
        row.attributes.entry(key).or_insert(value);
    }
    row.attributes
        .insert("page".to_string(), chunk.page.to_string());

    let best = block
        .title_candidates
        .iter()
        .max_by(|left, right| {
            score_title_text(&left.text)
                .total_cmp(&score_title_text(&right.text))
                .then(right.line_index.cmp(&left.line_index))
        });
    row.title = match best {
        Some(candidate) if score_title_text(&candidate.text) > 0.0 => {
            Some(clean_title(&candidate.text))
        }
        _ if !chunk.title.trim().is_empty() => Some(clean_title(&chunk.title)),
        Some(candidate) => Some(clean_title(&candidate.text)),
        None => None,
    };
    row.title = row.title.filter(|title| !title.is_empty());

    row.price = block
        .price
        .as_ref()
        .map(|candidate| candidate.normalized.clone());

    row
}

/// One filtered-out block kept for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedBlock {
    pub text: String,
    pub reason: String,
}

/// Runs the block parser over every chunk and filters non-product noise.
/// Blocks scoring below 2 with no price are dropped (but logged); if that
/// removes everything, the most attribute-rich non-stop-phrase block is kept
/// so the catalog is never silently empty.
pub fn collect_catalog_rows(
    chunks: &[CatalogChunk],
    stop: &StopPhrases,
) -> (Vec<RawAttributeRow>, Vec<DroppedBlock>) {
    let mut kept: Vec<RawAttributeRow> = Vec::new();
    let mut dropped: Vec<DroppedBlock> = Vec::new();
    let mut rejected: Vec<(ProductBlock, usize)> = Vec::new();

    for (chunk_index, chunk) in chunks.iter().enumerate() {
        for block in parse_chunk_blocks(chunk, stop) {
            if block.score < 2.0 && block.price.is_none() {
                dropped.push(DroppedBlock {
                    text: block.text(),
                    reason: "non_product".to_string(),
                });
                rejected.push((block, chunk_index));
            } else {
                kept.push(block_to_row(&block, chunk));
            }
        }
    }

    if kept.is_empty() {
        let rescue = rejected
            .iter()
            .filter(|(block, _)| !block.stop_flagged)
            .max_by_key(|(block, _)| block.pairs.len());
        if let Some((block, chunk_index)) = rescue {
            let text = block.text();
            kept.push(block_to_row(block, &chunks[*chunk_index]));
            dropped.retain(|entry| entry.text != text);
        }
    }

    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(text: &str) -> CatalogChunk {
        CatalogChunk {
            id: 0,
            page: 1,
            title: String::new(),
            text: text.to_string(),
            article_codes: Vec::new(),
        }
    }

    #[test]
    fn colon_dash_equals_pairs_are_extracted() {
        assert_eq!(
            match_pair("Цвет: белый"),
            Some(("Цвет".to_string(), "белый".to_string()))
        );
        assert_eq!(
            match_pair("Цена — 13 200 руб."),
            Some(("Цена".to_string(), "13 200 руб.".to_string()))
        );
        assert_eq!(
            match_pair("Толщина = 80"),
            Some(("Толщина".to_string(), "80".to_string()))
        );
        assert_eq!(
            match_pair("Гарантия....... 5 лет"),
            Some(("Гарантия".to_string(), "5 лет".to_string()))
        );
        assert_eq!(
            match_pair("Вес 25"),
            Some(("Вес".to_string(), "25".to_string()))
        );
    }

    #[test]
    fn embedded_pairs_are_peeled_recursively() {
        let (base, peeled) = peel_embedded("Цвет Белый Вес 5");
        assert!(base.is_empty());
        assert_eq!(
            peeled,
            vec![
                ("Цвет".to_string(), "Белый".to_string()),
                ("Вес".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn dangling_key_consumes_following_lines() {
        let chunk = chunk_with("Комплектация:\nглазок\nручка и цилиндр");
        let blocks = parse_chunk_blocks(&chunk, &StopPhrases::default());
        assert_eq!(blocks.len(), 1);
        let pair = blocks[0]
            .pairs
            .iter()
            .find(|pair| pair.key == "Комплектация")
            .expect("dangling key should collect a value");
        assert_eq!(pair.value, "глазок ручка и цилиндр");
    }

    #[test]
    fn price_prefers_currency_marked_candidate() {
        let price = select_price("Дверь Гранит 2050x860\nЦена: 45 000 руб.").unwrap();
        assert_eq!(price.normalized, "45000");
    }

    #[test]
    fn dimension_numbers_are_excluded() {
        assert!(select_price("Размер 860×2050 мм").is_none());
        assert!(select_price("Проём 960/860×1900").is_none());
    }

    #[test]
    fn bare_door_height_range_is_penalized() {
        // 2050 without currency sits in the suspicious range.
        assert!(select_price("высота полотна 2050").is_none());
    }

    #[test]
    fn small_price_defers_to_plausible_large_one() {
        let text = "Цена: 900 руб. скидка, полная цена 12 500 руб.";
        let price = select_price(text).unwrap();
        assert_eq!(price.normalized, "12500");
    }

    #[test]
    fn reflow_splits_inline_pairs() {
        let reflowed = reflow_text("Дверь Гранит Цвет: белый Вес 25");
        let lines: Vec<&str> = reflowed.lines().collect();
        assert_eq!(lines[0], "Дверь Гранит");
        assert!(lines.contains(&"Цвет: белый"));
        assert!(lines.contains(&"Вес 25"));
    }

    #[test]
    fn title_candidates_skip_units_and_headers() {
        let stop = StopPhrases::default();
        assert!(is_title_candidate("Дверь Гранит Ультра", &stop));
        assert!(!is_title_candidate("Характеристики", &stop));
        assert!(!is_title_candidate("80 мм", &stop));
        assert!(!is_title_candidate("12345 67890", &stop));
        assert!(!is_title_candidate("дуб", &stop));
    }

    #[test]
    fn block_with_price_and_pairs_scores_high() {
        let chunk = chunk_with("Дверь Гранит Ультра\nЦвет: белый\nВес: 90\nЦена: 45 000 руб.");
        let blocks = parse_chunk_blocks(&chunk, &StopPhrases::default());
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].score >= 4.0, "score = {}", blocks[0].score);
    }

    #[test]
    fn stop_phrase_block_is_dropped_and_logged() {
        let chunk = chunk_with(
            "Дверь Гранит\nЦвет: белый\nЦена: 45 000 руб.\n\nРеклама: все права защищены",
        );
        let (rows, dropped) = collect_catalog_rows(&[chunk], &StopPhrases::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].reason, "non_product");
        assert!(dropped[0].text.to_lowercase().contains("реклама"));
    }

    #[test]
    fn catalog_is_never_silently_empty() {
        let chunk = chunk_with("привет\n\nЦвет белый и вес");
        let (rows, _dropped) = collect_catalog_rows(&[chunk], &StopPhrases::default());
        assert!(!rows.is_empty());
    }

    #[test]
    fn lock_keys_split_into_count_and_type() {
        assert_eq!(normalize_attribute_key("Замки", "2"), "количество замков");
        assert_eq!(normalize_attribute_key("Замок", "цилиндровый"), "тип замка");
    }

    #[test]
    fn block_to_row_picks_multiword_title() {
        let chunk = chunk_with("Дверь Гранит Ультра 21\nЦвет: белый\nЦена: 45 000 руб.");
        let blocks = parse_chunk_blocks(&chunk, &StopPhrases::default());
        let row = block_to_row(&blocks[0], &chunk);
        assert_eq!(row.title.as_deref(), Some("Дверь Гранит Ультра 21"));
        assert_eq!(row.price.as_deref(), Some("45000"));
        assert_eq!(row.attributes.get("цвет").map(String::as_str), Some("белый"));
        assert!(!row.attributes.contains_key("цена"));
    }

    #[test]
    fn custom_stop_phrases_merge_with_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("phrases.json");
        std::fs::write(&path, r#"{ "phrases": ["наш шоурум"] }"#)?;

        let stop = StopPhrases::from_json_file(&path)?;
        assert!(stop.matches("Приходите в наш шоурум").is_some());
        assert!(stop.matches("Все права защищены").is_some());
        Ok(())
    }
}
