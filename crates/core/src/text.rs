//! Shared text sanitation and value-normalization primitives.
//!
//! Every other stage (extraction, block parsing, finalization) goes through
//! these functions, so canonical forms never drift between stages. All
//! functions here are deterministic and side-effect-free.

use regex::Regex;
use std::sync::LazyLock;

static HYPHEN_WRAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<prefix>\p{L})-[ \t]*\r?\n[ \t]*(?P<suffix>\p{L})").unwrap());

/// Run of >= 3 single uppercase letters separated by spaces ("С У П Е Р").
static LETTER_SPACED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\p{Lu}(?: \p{Lu}){2,}\b").unwrap());

/// A lone uppercase letter split off the end of an uppercase word ("ДВЕР И").
static TRAILING_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\p{Lu}{2,}) (\p{Lu})\b").unwrap());

/// Article/SKU-like token: alnum runs joined by `-`/`_`, each run >= 2 chars.
static SKU_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-zА-Яа-яЁё0-9]{2,}(?:[-_][A-Za-zА-Яа-яЁё0-9]{2,})+").unwrap()
});

static LONG_DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{6,}").unwrap());

const CURRENCY_TOKENS: [&str; 7] = ["руб", "р", "rub", "rur", "тыс", "usd", "eur"];

const UNIT_TOKENS: [&str; 16] = [
    "мм", "см", "кг", "гр", "шт", "м2", "м3", "мп", "пог", "литр", "л", "mm", "cm", "kg", "г", "м",
];

const PRICE_WORDS: [&str; 7] = [
    "цена",
    "стоимость",
    "прайс",
    "опт",
    "розница",
    "price",
    "cost",
];

fn is_invisible(ch: char) -> bool {
    matches!(
        ch,
        '\u{00AD}' | '\u{200B}'..='\u{200F}' | '\u{2060}' | '\u{FEFF}' | '\u{2028}' | '\u{2029}'
    )
}

fn collapse_spaces(line: &str, out: &mut String) {
    let mut prev_was_space = false;
    for ch in line.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                out.push(' ');
                prev_was_space = true;
            }
        } else {
            out.push(ch);
            prev_was_space = false;
        }
    }
}

fn collapse_split_letters(line: &str) -> String {
    let mut current = line.to_string();
    // Both rewrites can expose a new match, so run to a fixed point; this
    // also keeps the whole sanitizer idempotent.
    loop {
        let spaced = LETTER_SPACED
            .replace_all(&current, |caps: &regex::Captures<'_>| {
                caps[0].chars().filter(|ch| !ch.is_whitespace()).collect::<String>()
            })
            .into_owned();
        let joined = TRAILING_SPLIT.replace_all(&spaced, "$1$2").into_owned();
        if joined == current {
            return joined;
        }
        current = joined;
    }
}

/// Cleans raw multi-line text while preserving paragraph breaks.
///
/// Strips control/invisible characters, rejoins hyphen-broken line wraps,
/// collapses letter-spaced words, and collapses repeated whitespace within
/// lines. Runs of blank lines become a single blank line.
pub fn sanitize_text(raw: &str) -> String {
    let mut visible = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if is_invisible(ch) || (ch.is_control() && ch != '\n') {
            if ch == '\t' || ch == '\r' {
                visible.push(' ');
            }
            continue;
        }
        if ch == '\u{00A0}' {
            visible.push(' ');
        } else {
            visible.push(ch);
        }
    }

    let rejoined = HYPHEN_WRAP.replace_all(&visible, "$prefix$suffix");

    let mut result = String::with_capacity(rejoined.len());
    let mut prev_was_blank = false;
    let mut first_content = true;
    for line in rejoined.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            prev_was_blank = true;
            continue;
        }
        if !first_content {
            result.push_str(if prev_was_blank { "\n\n" } else { "\n" });
        }
        let mut collapsed = String::with_capacity(trimmed.len());
        collapse_spaces(trimmed, &mut collapsed);
        result.push_str(&collapse_split_letters(&collapsed));
        prev_was_blank = false;
        first_content = false;
    }

    result.trim().to_string()
}

/// Single-line variant of [`sanitize_text`]: newlines collapse to spaces.
/// Idempotent.
pub fn sanitize_value(raw: &str) -> String {
    let text = sanitize_text(raw);
    let mut flat = String::with_capacity(text.len());
    collapse_spaces(&text, &mut flat);
    flat.trim().to_string()
}

fn strip_token_punct(token: &str) -> &str {
    token.trim_matches(|ch: char| !ch.is_alphanumeric() && ch != '₽')
}

fn token_is_currency(token: &str) -> bool {
    let bare = strip_token_punct(token).to_lowercase();
    bare == "₽" || CURRENCY_TOKENS.contains(&bare.as_str())
}

fn token_is_unit(token: &str) -> bool {
    let bare = strip_token_punct(token).to_lowercase();
    UNIT_TOKENS.contains(&bare.as_str())
}

/// True when the text carries a currency marker ("руб.", "₽", "45 000 р.").
pub fn contains_currency_token(text: &str) -> bool {
    text.contains('₽') || text.split_whitespace().any(token_is_currency)
}

/// True when the text carries a measurement-unit token ("мм", "кг", "шт").
pub fn contains_unit_token(text: &str) -> bool {
    text.split_whitespace().any(token_is_unit)
}

/// True when the text mentions a price word ("цена", "стоимость").
pub fn contains_price_word(text: &str) -> bool {
    let lowered = text.to_lowercase();
    PRICE_WORDS.iter().any(|word| lowered.contains(word))
}

/// True when a finalized title would violate the title invariant:
/// currency/unit tokens and 6+-digit runs never belong in a title.
pub fn contains_forbidden_title_token(title: &str) -> bool {
    contains_currency_token(title) || contains_unit_token(title) || LONG_DIGIT_RUN.is_match(title)
}

/// Cleans a title candidate: sanitizes, strips currency/unit tokens, and
/// re-attaches an article/SKU-like token if the cleanup dropped it.
pub fn clean_title(raw: &str) -> String {
    let sanitized = sanitize_value(raw);

    let kept: Vec<&str> = sanitized
        .split_whitespace()
        .filter(|token| !token_is_currency(token) && !token_is_unit(token))
        .collect();
    let mut title = kept
        .join(" ")
        .trim_matches(|ch: char| ch.is_whitespace() || matches!(ch, ',' | ';' | ':' | '–' | '—' | '-'))
        .to_string();

    if let Some(code) = SKU_TOKEN.find(&sanitized) {
        if !title.contains(code.as_str()) {
            if !title.is_empty() {
                title.push(' ');
            }
            title.push_str(code.as_str());
        }
    }

    title
}

/// Normalizes a monetary string to a plain decimal ("45 000 руб." -> "45000",
/// "12,5" -> "12.5"). Returns an empty string when nothing parseable is left.
pub fn normalize_price(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == ',')
        .collect();

    if !cleaned.chars().any(|ch| ch.is_ascii_digit()) {
        return String::new();
    }

    let groups: Vec<&str> = cleaned.split(['.', ',']).collect();
    let (integer, fraction) = if groups.len() == 1 {
        (groups[0].to_string(), "")
    } else {
        let last = groups[groups.len() - 1];
        if !last.is_empty() && last.len() <= 2 {
            // A short trailing group is a decimal fraction; 3-digit trailing
            // groups are thousands grouping.
            (groups[..groups.len() - 1].concat(), last)
        } else {
            (groups.concat(), "")
        }
    };

    let integer = integer.trim_start_matches('0');
    let integer = if integer.is_empty() { "0" } else { integer };

    let result = if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    };

    match result.parse::<f64>() {
        Ok(value) if value.is_finite() => result,
        _ => String::new(),
    }
}

/// One grammatical suffix is trimmed to cluster inflected forms of the same
/// attribute name; longest and most specific endings first.
const KEY_SUFFIXES: [&str; 30] = [
    "иями", "ями", "ами", "ости", "ость", "ения", "ение", "ания", "ание", "иях", "ях", "ах",
    "ий", "ый", "ой", "ая", "яя", "ое", "ее", "ов", "ев", "ей", "ия", "ие", "ы", "и", "а", "я",
    "о", "ь",
];

fn map_latin_lookalike(ch: char) -> char {
    match ch {
        'a' => 'а',
        'b' => 'в',
        'c' => 'с',
        'e' => 'е',
        'h' => 'н',
        'k' => 'к',
        'm' => 'м',
        'o' => 'о',
        'p' => 'р',
        't' => 'т',
        'x' => 'х',
        'y' => 'у',
        _ => ch,
    }
}

/// Canonicalizes an attribute-key spelling for clustering: lowercases, maps
/// Latin look-alike letters to Cyrillic, strips punctuation, and trims one
/// matched grammatical suffix.
pub fn normalize_key(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.to_lowercase().chars() {
        let mapped = map_latin_lookalike(ch);
        if mapped.is_alphanumeric() {
            cleaned.push(mapped);
        } else if mapped.is_whitespace() && !cleaned.ends_with(' ') {
            cleaned.push(' ');
        }
    }
    let cleaned = cleaned.trim().to_string();

    for suffix in KEY_SUFFIXES {
        if let Some(stem) = cleaned.strip_suffix(suffix) {
            if stem.chars().count() >= 3 {
                return stem.to_string();
            }
        }
    }

    cleaned
}

/// SequenceMatcher-style similarity ratio in `[0, 1]`:
/// `2 * LCS(a, b) / (|a| + |b|)` over characters.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let left: Vec<char> = a.chars().collect();
    let right: Vec<char> = b.chars().collect();

    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let mut previous = vec![0usize; right.len() + 1];
    let mut current = vec![0usize; right.len() + 1];
    for lc in &left {
        for (j, rc) in right.iter().enumerate() {
            current[j + 1] = if lc == rc {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let lcs = previous[right.len()] as f64;
    2.0 * lcs / (left.len() + right.len()) as f64
}

/// Iterates article/SKU-like tokens in the text, in order of appearance.
pub fn sku_tokens(text: &str) -> impl Iterator<Item = &str> {
    SKU_TOKEN.find_iter(text).map(|found| found.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_letter_spaced_words() {
        assert_eq!(sanitize_value("С У П Е Р цена"), "СУПЕР цена");
    }

    #[test]
    fn sanitize_rejoins_trailing_split_letter() {
        assert_eq!(sanitize_value("ДВЕР И входные"), "ДВЕРИ входные");
    }

    #[test]
    fn sanitize_rejoins_hyphen_broken_words() {
        assert_eq!(sanitize_text("метал-\nлическая дверь"), "металлическая дверь");
    }

    #[test]
    fn sanitize_strips_invisible_characters() {
        assert_eq!(sanitize_value("две\u{00AD}рь\u{200B} тест"), "дверь тест");
    }

    #[test]
    fn sanitize_value_is_idempotent() {
        let samples = [
            "С У П Е Р  АКЦИ Я",
            "  много \t пробелов  ",
            "АБ В Г",
            "обычный текст",
        ];
        for sample in samples {
            let once = sanitize_value(sample);
            assert_eq!(sanitize_value(&once), once, "input: {sample:?}");
        }
    }

    #[test]
    fn sanitize_text_keeps_paragraph_breaks() {
        let text = sanitize_text("первый блок\n\n\n\nвторой блок");
        assert_eq!(text, "первый блок\n\nвторой блок");
    }

    #[test]
    fn normalize_price_handles_grouping_and_fractions() {
        assert_eq!(normalize_price("45 000 руб."), "45000");
        assert_eq!(normalize_price("12,5"), "12.5");
        assert_eq!(normalize_price("1.234.567"), "1234567");
        assert_eq!(normalize_price("99.90"), "99.90");
        assert_eq!(normalize_price(""), "");
        assert_eq!(normalize_price("руб."), "");
    }

    #[test]
    fn clean_title_strips_currency_and_units() {
        assert_eq!(clean_title("Дверь Гранит 45 000 руб."), "Дверь Гранит 45 000");
        assert_eq!(clean_title("Полотно 80 мм"), "Полотно 80");
    }

    #[test]
    fn clean_title_reattaches_sku_token() {
        let title = clean_title("ДГ-21 шт");
        assert!(title.contains("ДГ-21"), "got: {title}");
    }

    #[test]
    fn normalize_key_clusters_inflected_forms() {
        assert_eq!(normalize_key("Цвета"), normalize_key("цвет"));
        assert_eq!(normalize_key("Толщина"), normalize_key("толщины"));
        assert_eq!(normalize_key("Материал:"), "материал");
    }

    #[test]
    fn normalize_key_maps_latin_lookalikes() {
        assert_eq!(normalize_key("Цвet"), normalize_key("цвет"));
    }

    #[test]
    fn similarity_ratio_bounds() {
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
        assert!((similarity_ratio("цвет", "цвет") - 1.0).abs() < 1e-9);
        assert!(similarity_ratio("цвет", "цвета") > 0.85);
        assert!(similarity_ratio("цвет", "вес") < 0.86);
    }

    #[test]
    fn currency_and_unit_detection() {
        assert!(contains_currency_token("12 500 руб."));
        assert!(contains_currency_token("12500 ₽"));
        assert!(!contains_currency_token("рубанок столярный"));
        assert!(contains_unit_token("толщина 80 мм"));
        assert!(!contains_unit_token("дверь входная"));
    }

    #[test]
    fn forbidden_title_tokens() {
        assert!(contains_forbidden_title_token("Дверь 1234567"));
        assert!(contains_forbidden_title_token("Дверь 45 000 руб."));
        assert!(!contains_forbidden_title_token("Дверь Гранит 2050"));
    }
}
