//! Keyword expansion for case lookup
//!
//! Asks the LLM for must/should/related keyword sets with boost weights and
//! post-processes them into the ordering contract: the first must-have entry
//! restricts documents, the rest filter blocks. Falls back to the domain
//! tags when the LLM is unusable.

use crate::backend::LlmClient;
use crate::model::{Expansion, QueryContext};
use std::collections::HashMap;

const BOOST_MIN: f64 = 1.0;
const BOOST_MAX: f64 = 3.0;
const BOOST_MUST_DEFAULT: f64 = 3.0;

pub struct Expander<'a> {
    pub llm: &'a dyn LlmClient,
}

impl<'a> Expander<'a> {
    /// Fill `expansion` on the context.
    pub async fn expand(&self, ctx: &mut QueryContext) {
        let expansion = match self.expand_with_llm(ctx).await {
            Some(expansion) => expansion,
            None => {
                tracing::warn!("keyword expansion falling back to domain tags");
                fallback_expansion(ctx)
            }
        };
        tracing::info!(
            "expansion must={:?} should={:?} related={}",
            expansion.must_have,
            expansion.should_have,
            expansion.related_terms.len()
        );
        ctx.expansion = Some(expansion);
    }

    async fn expand_with_llm(&self, ctx: &QueryContext) -> Option<Expansion> {
        let prompt = build_expansion_prompt(ctx);
        let response = match self.llm.generate(&prompt, true).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("expansion LLM call failed: {}", e);
                return None;
            }
        };
        parse_expansion_response(&response)
    }
}

fn build_expansion_prompt(ctx: &QueryContext) -> String {
    let slots = &ctx.slots;
    format!(
        r#"세무조사 사례 검색을 위한 키워드를 설계하라.

질의: "{query}"
추출된 업종: {industries:?}
추출된 쟁점: {tags:?}

JSON만 출력하라:
{{"must_have": [], "should_have": [], "related_terms": [], "boost_weights": {{}}}}

- must_have 첫 항목은 문서 범위를 좁히는 핵심 키워드, 나머지는 블록 필터 키워드
- boost_weights 값은 1.0~3.0
- 동의어와 유사 표현은 related_terms 에"#,
        query = ctx.normalized,
        industries = slots.industry_sub,
        tags = slots.domain_tags,
    )
}

/// Parse and post-process the expansion JSON; `None` falls back.
fn parse_expansion_response(response: &str) -> Option<Expansion> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    let parsed: serde_json::Value = match serde_json::from_str(&response[start..=end]) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("expansion JSON malformed: {}", e);
            return None;
        }
    };

    let must_have = dedup(string_list(&parsed["must_have"]));
    if must_have.is_empty() {
        tracing::warn!("expansion returned no must-have keywords");
        return None;
    }
    let should_have = dedup(string_list(&parsed["should_have"]));
    let related_terms = dedup(string_list(&parsed["related_terms"]));

    let mut boost_weights: HashMap<String, f64> = HashMap::new();
    if let Some(weights) = parsed.get("boost_weights").and_then(|w| w.as_object()) {
        for (keyword, value) in weights {
            if let Some(weight) = value.as_f64() {
                boost_weights.insert(keyword.clone(), weight.clamp(BOOST_MIN, BOOST_MAX));
            }
        }
    }
    for kw in &must_have {
        boost_weights.entry(kw.clone()).or_insert(BOOST_MUST_DEFAULT);
    }

    Some(Expansion {
        must_have,
        should_have,
        related_terms,
        boost_weights,
    })
}

/// Fallback: the first domain tag restricts documents, the rest only nudge
/// scoring.
pub fn fallback_expansion(ctx: &QueryContext) -> Expansion {
    let tags: Vec<String> = ctx.slots.domain_tags.iter().cloned().collect();
    let must_have: Vec<String> = tags.first().cloned().into_iter().collect();
    let should_have: Vec<String> = tags.into_iter().skip(1).collect();

    let mut boost_weights = HashMap::new();
    for kw in &must_have {
        boost_weights.insert(kw.clone(), BOOST_MUST_DEFAULT);
    }

    Expansion {
        must_have,
        should_have,
        related_terms: Vec::new(),
        boost_weights,
    }
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_clamps_boosts() {
        let expansion = parse_expansion_response(
            r#"{"must_have": ["제조업", "매출누락", "제조업"],
                "should_have": ["무자료매출"],
                "related_terms": ["현금매출"],
                "boost_weights": {"제조업": 9.0, "매출누락": 2.0, "무자료매출": 0.2}}"#,
        )
        .unwrap();

        // Duplicates removed, order preserved.
        assert_eq!(expansion.must_have, vec!["제조업", "매출누락"]);
        assert_eq!(expansion.boost("제조업"), 3.0);
        assert_eq!(expansion.boost("매출누락"), 2.0);
        assert_eq!(expansion.boost("무자료매출"), 1.0);
    }

    #[test]
    fn must_have_entries_always_get_a_boost() {
        let expansion = parse_expansion_response(
            r#"{"must_have": ["도매업"], "should_have": [], "related_terms": [], "boost_weights": {}}"#,
        )
        .unwrap();
        assert_eq!(expansion.boost("도매업"), 3.0);
    }

    #[test]
    fn empty_must_have_falls_back() {
        assert!(parse_expansion_response(
            r#"{"must_have": [], "should_have": ["x"], "related_terms": [], "boost_weights": {}}"#
        )
        .is_none());
    }

    #[test]
    fn fallback_uses_domain_tags_in_order() {
        let mut ctx = QueryContext::new("q");
        ctx.slots.domain_tags.insert("매출누락".to_string());
        ctx.slots.domain_tags.insert("가공경비".to_string());

        let expansion = fallback_expansion(&ctx);
        // BTreeSet order: 가공경비 < 매출누락
        assert_eq!(expansion.must_have, vec!["가공경비"]);
        assert_eq!(expansion.should_have, vec!["매출누락"]);
        assert!(expansion.related_terms.is_empty());
        assert_eq!(expansion.boost("가공경비"), 3.0);
    }
}
