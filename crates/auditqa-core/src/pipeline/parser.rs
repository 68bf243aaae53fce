//! Intent classification and slot extraction
//!
//! Intent is a small rule set; slots come from the LLM with a strict JSON
//! prompt and fall back to a rule-based extractor (code regex, gazetteer,
//! quoted spans) whenever the LLM or its output is unusable.

use crate::backend::LlmClient;
use crate::model::{Intent, QueryContext, Section, Slots};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

/// Controlled vocabulary for `industry_sub`
pub const INDUSTRIES: [&str; 12] = [
    "제조업", "도매업", "소매업", "건설업", "부동산업", "음식점업", "숙박업", "운수업",
    "정보통신업", "금융업", "보건업", "서비스업",
];

/// Controlled vocabulary for `domain_tags`
pub const DOMAIN_TAGS: [&str; 12] = [
    "매출누락", "가공경비", "가공세금계산서", "부당공제", "법인자금유용", "접대비한도초과",
    "자료상거래", "변칙회계", "역외탈세", "명의위장", "현금매출누락", "재고누락",
];

/// Markers that flip the intent to `explain`
const EXPLAIN_MARKERS: [&str; 7] = ["무엇", "뜻", "의미", "설명", "이란", "what is", "explain"];

lazy_static! {
    // Five-digit industry classification codes.
    static ref CODE: Regex = Regex::new(r"\b(\d{5})\b").expect("static regex");
    static ref QUOTED: Regex = Regex::new(r#"["']([^"']{2,})["']"#).expect("static regex");
}

const MAX_FALLBACK_CONFIDENCE: f64 = 0.5;

pub struct Parser<'a> {
    pub llm: &'a dyn LlmClient,
}

impl<'a> Parser<'a> {
    /// Fill `intent` and `slots` on the context.
    pub async fn parse(&self, ctx: &mut QueryContext) {
        ctx.intent = classify_intent(&ctx.normalized);

        let (mut slots, llm_json_ok) = match self.extract_with_llm(&ctx.normalized).await {
            Some(slots) => (slots, true),
            None => {
                tracing::warn!("slot extraction falling back to rules");
                (extract_with_rules(&ctx.normalized), false)
            }
        };
        slots.free_text = ctx.normalized.clone();
        slots.confidence = confidence(&slots, llm_json_ok);
        tracing::info!(
            "parsed intent={:?} confidence={:.2} industries={:?} tags={:?}",
            ctx.intent,
            slots.confidence,
            slots.industry_sub,
            slots.domain_tags
        );
        ctx.slots = slots;
    }

    async fn extract_with_llm(&self, normalized: &str) -> Option<Slots> {
        let prompt = build_slot_prompt(normalized);
        let response = match self.llm.generate(&prompt, true).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("slot extraction LLM call failed: {}", e);
                return None;
            }
        };
        parse_slot_response(&response)
    }
}

fn classify_intent(normalized: &str) -> Intent {
    if EXPLAIN_MARKERS.iter().any(|m| normalized.contains(m)) {
        Intent::Explain
    } else {
        Intent::CaseLookup
    }
}

fn build_slot_prompt(normalized: &str) -> String {
    format!(
        r#"다음 세무조사 사례 검색 질의에서 구조화된 슬롯을 추출하라.

질의: "{normalized}"

허용 업종(industry_sub): {industries}
허용 쟁점 태그(domain_tags): {tags}
섹션 키: investigation-findings, investigation-technique

아래 키를 모두 포함한 JSON만 출력하라:
{{"industry_sub": [], "domain_tags": [], "code": [], "entities": [], "section_hints": {{}}, "free_text": ""}}

- industry_sub, domain_tags 는 허용 목록의 값만 사용
- code 는 5자리 업종코드 문자열
- section_hints 는 섹션 키 → 관련 표현 배열
- 값이 없으면 빈 배열/객체를 그대로 둘 것"#,
        normalized = normalized,
        industries = INDUSTRIES.join(", "),
        tags = DOMAIN_TAGS.join(", "),
    )
}

/// Parse the LLM slot JSON; `None` routes to the rule-based fallback.
fn parse_slot_response(response: &str) -> Option<Slots> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    let parsed: serde_json::Value = match serde_json::from_str(&response[start..=end]) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("slot JSON malformed: {}", e);
            return None;
        }
    };

    // Required keys must all be present, else the output is untrustworthy.
    for key in ["industry_sub", "domain_tags", "code", "entities"] {
        if parsed.get(key).is_none() {
            tracing::warn!("slot JSON missing key '{}'", key);
            return None;
        }
    }

    let mut slots = Slots::default();
    slots.industry_sub = string_set(&parsed["industry_sub"], Some(&INDUSTRIES));
    slots.domain_tags = string_set(&parsed["domain_tags"], Some(&DOMAIN_TAGS));
    slots.codes = string_set(&parsed["code"], None)
        .into_iter()
        .filter(|c| CODE.is_match(c))
        .collect();
    slots.entities = string_set(&parsed["entities"], None);

    if let Some(hints) = parsed.get("section_hints").and_then(|h| h.as_object()) {
        let mut section_hints = BTreeMap::new();
        for (key, value) in hints {
            if let Some(section) = Section::parse(key) {
                let phrases: Vec<String> = value
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                if !phrases.is_empty() {
                    section_hints.insert(section, phrases);
                }
            }
        }
        slots.section_hints = section_hints;
    }

    Some(slots)
}

fn string_set(
    value: &serde_json::Value,
    allowed: Option<&[&str]>,
) -> std::collections::BTreeSet<String> {
    value
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .filter(|s| allowed.map_or(true, |list| list.contains(s)))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Rule-based extractor: code regex, gazetteer scan, quoted spans.
pub fn extract_with_rules(normalized: &str) -> Slots {
    let mut slots = Slots {
        from_fallback: true,
        ..Default::default()
    };

    for capture in CODE.captures_iter(normalized) {
        slots.codes.insert(capture[1].to_string());
    }
    for industry in INDUSTRIES {
        if normalized.contains(industry) {
            slots.industry_sub.insert(industry.to_string());
        }
    }
    for tag in DOMAIN_TAGS {
        if normalized.contains(tag) {
            slots.domain_tags.insert(tag.to_string());
        }
    }
    for capture in QUOTED.captures_iter(normalized) {
        slots.entities.insert(capture[1].to_string());
    }

    slots
}

/// Weighted signal sum, clipped to [0, 1] and capped after a fallback.
fn confidence(slots: &Slots, llm_json_ok: bool) -> f64 {
    let any_slot = !slots.industry_sub.is_empty()
        || !slots.domain_tags.is_empty()
        || !slots.codes.is_empty()
        || !slots.entities.is_empty();

    let mut score: f64 = 0.0;
    if any_slot {
        score += 0.3;
    }
    if !slots.codes.is_empty() || !slots.industry_sub.is_empty() {
        score += 0.2;
    }
    if !slots.domain_tags.is_empty() {
        score += 0.2;
    }
    if llm_json_ok {
        score += 0.3;
    }
    if slots.from_fallback {
        score -= 0.2;
    }

    let clipped = score.clamp(0.0, 1.0);
    if slots.from_fallback {
        clipped.min(MAX_FALLBACK_CONFIDENCE)
    } else {
        clipped
    }
}
