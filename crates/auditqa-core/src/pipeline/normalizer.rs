//! Query normalization
//!
//! Redacts identifier-like patterns, normalizes whitespace and punctuation,
//! lowercases ASCII (CJK untouched), expands abbreviations and strips
//! stopwords. Never fails: any error returns the original input.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Resident registration numbers, phone numbers, card numbers.
    static ref RRN: Regex = Regex::new(r"\d{6}-[1-4]\d{6}").expect("static regex");
    static ref PHONE: Regex = Regex::new(r"01[016789]-?\d{3,4}-?\d{4}").expect("static regex");
    static ref CARD: Regex = Regex::new(r"\d{4}[- ]\d{4}[- ]\d{4}[- ]\d{4}").expect("static regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static regex");
}

/// Abbreviations expanded before stopword removal
const ABBREVIATIONS: [(&str, &str); 5] = [
    ("vat", "부가가치세"),
    ("부가세", "부가가치세"),
    ("법인세율", "법인세 세율"),
    ("종소세", "종합소득세"),
    ("원천세", "원천징수"),
];

/// Grammatical particles and domain-generic nouns removed as whole tokens
const STOPWORDS: [&str; 24] = [
    "은", "는", "이", "가", "을", "를", "의", "에", "에서", "으로", "로", "와", "과", "도", "및",
    "관련", "대해", "대한", "알려줘", "알려주세요", "찾아줘", "검색해줘", "사례", "적출사례",
];

/// Particles stripped from the tail of longer tokens
const TRAILING_PARTICLES: [char; 8] = ['은', '는', '이', '가', '을', '를', '의', '도'];

/// Normalize a raw query.
pub fn normalize(raw: &str) -> String {
    match try_normalize(raw) {
        Ok(normalized) if !normalized.is_empty() => normalized,
        Ok(_) => {
            tracing::warn!("normalization produced empty text, keeping original");
            raw.trim().to_string()
        }
        Err(e) => {
            tracing::warn!("normalization failed, keeping original: {}", e);
            raw.trim().to_string()
        }
    }
}

fn try_normalize(raw: &str) -> Result<String, std::fmt::Error> {
    let mut text = raw.to_string();

    // Redaction first, so later passes never see the identifiers.
    text = RRN.replace_all(&text, "[주민등록번호]").into_owned();
    text = PHONE.replace_all(&text, "[전화번호]").into_owned();
    text = CARD.replace_all(&text, "[카드번호]").into_owned();

    // Fullwidth punctuation to ASCII, then collapse whitespace.
    text = text
        .chars()
        .map(|c| match c {
            '？' => '?',
            '！' => '!',
            '，' => ',',
            '．' => '.',
            '　' => ' ',
            _ => c,
        })
        .collect();
    text = WHITESPACE.replace_all(text.trim(), " ").into_owned();

    // ASCII segments lowercase; CJK is case-less and left alone.
    text = text
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect();

    // Abbreviations expand whole tokens only; substrings of longer words are
    // left alone.
    let expanded: Vec<&str> = text
        .split_whitespace()
        .map(|token| {
            ABBREVIATIONS
                .iter()
                .find(|(abbrev, _)| token == *abbrev)
                .map_or(token, |(_, full)| *full)
        })
        .collect();
    text = expanded.join(" ");

    let tokens: Vec<String> = text
        .split_whitespace()
        .filter(|token| !STOPWORDS.contains(token))
        .map(strip_trailing_particle)
        .filter(|token| !token.is_empty())
        .collect();

    Ok(tokens.join(" "))
}

/// Drop a single trailing particle from tokens long enough to survive it.
fn strip_trailing_particle(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() >= 3 {
        if let Some(&last) = chars.last() {
            if TRAILING_PARTICLES.contains(&last) {
                return chars[..chars.len() - 1].iter().collect();
            }
        }
    }
    token.to_string()
}
