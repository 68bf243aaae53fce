//! Stage-1 retrieval over finding-level records
//!
//! Builds the candidate document set from the must-have keywords, aggregates
//! keyword frequencies for the strategy preamble, and runs the hybrid search
//! with per-keyword boosts and slot meta-filters.

use crate::backend::{Embedder, LexicalBackend, VectorBackend, VectorFilter};
use crate::cache::{keyword_freq_cache_key, LruCache};
use crate::config::Config;
use crate::error::Result;
use crate::model::{Finding, FindingHit, QueryContext};
use crate::retrieval::hybrid::{hybrid_search, HybridParams};
use futures::future::join_all;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

/// Finding fields scored by the lexical queries, with boosts
const FINDING_FIELDS: [&str; 3] = ["item^2", "reason_kw_norm^1.5", "item_detail^1"];

pub struct FindingRetriever<'a> {
    pub lexical: &'a dyn LexicalBackend,
    pub vector: &'a dyn VectorBackend,
    pub embedder: &'a dyn Embedder,
    pub config: &'a Config,
    pub keyword_freq_cache: &'a LruCache<String, HashMap<String, u64>>,
}

impl<'a> FindingRetriever<'a> {
    /// Run stage 1, filling `target_doc_ids`, `keyword_freq` and
    /// `finding_hits` on the context.
    pub async fn retrieve(&self, ctx: &mut QueryContext) -> Result<()> {
        let expansion = ctx.expansion.clone().unwrap_or_default();
        let multi_keyword = expansion.must_have.len() >= 2;

        if !expansion.must_have.is_empty() {
            let (doc_ids, primary_ranked) = self.prefilter_doc_ids(&expansion.must_have).await;
            if let Some(ref ids) = doc_ids {
                if ids.is_empty() {
                    // Relaxation to union found nothing either; stage 1 will
                    // return empty and the validator reports no matches.
                    tracing::warn!(
                        "document prefilter empty after union relaxation, keywords: {:?}",
                        expansion.must_have
                    );
                } else {
                    ctx.keyword_freq = self
                        .keyword_frequencies(ids, &primary_ranked, &expansion.must_have)
                        .await;
                }
            }
            ctx.target_doc_ids = doc_ids;
        }

        let lexical_query = build_finding_query(ctx, &expansion);
        let vector_filter = build_finding_filter(ctx);

        let retrieval = &self.config.retrieval;
        let params = HybridParams {
            k_lex: retrieval.findings_top_k_lex,
            k_vec: retrieval.findings_top_k_vec,
            k_rrf: retrieval.findings_rrf_k,
            // Multi-keyword queries tighten the threshold against semantic
            // over-matching.
            score_threshold: if multi_keyword {
                retrieval.vector_score_threshold_multi
            } else {
                retrieval.vector_score_threshold
            },
            top_n: retrieval.findings_final_top_n,
            // Single-keyword stage 1 runs BM25 only.
            skip_vector: expansion.must_have.len() < 2,
        };

        let outcome = hybrid_search(
            self.lexical,
            self.vector,
            self.embedder,
            &ctx.normalized,
            lexical_query,
            &vector_filter,
            &self.config.lexical.findings_index,
            &self.config.vector.findings_collection,
            &params,
        )
        .await;

        if outcome.lexical_failed {
            ctx.warnings
                .push("어휘 검색을 사용할 수 없어 의미 검색 결과만 사용했습니다.".to_string());
        }
        if outcome.vector_failed {
            ctx.warnings
                .push("의미 검색을 사용할 수 없어 어휘 검색 결과만 사용했습니다.".to_string());
        }
        if outcome.lexical_failed && outcome.vector_failed {
            tracing::warn!("both retrieval stores unavailable");
            ctx.retrieval_unavailable = true;
        }

        let mut hits = outcome.hits;

        // With an active document set, hits far below the leader are noise.
        if ctx.target_doc_ids.is_some() {
            if let Some(top) = hits.first().map(|h| h.rrf_score) {
                hits.retain(|h| h.rrf_score >= 0.5 * top);
            }
        }

        ctx.finding_hits = hits
            .into_iter()
            .map(|hit| {
                let source = hit
                    .lexical_source
                    .or(hit.vector_payload)
                    .unwrap_or(serde_json::Value::Null);
                let mut finding: Finding =
                    serde_json::from_value(source).unwrap_or_default();
                if finding.finding_id.is_empty() {
                    finding.finding_id = hit.id.clone();
                }
                FindingHit {
                    finding,
                    score_bm25: hit.score_lex,
                    score_vector: hit.score_vec,
                    score_combined: hit.rrf_score,
                }
            })
            .collect();

        tracing::info!("stage 1 retrieved {} findings", ctx.finding_hits.len());
        Ok(())
    }

    /// Per-keyword document lookup, intersected across keywords and relaxed
    /// to the union when the intersection is empty.
    ///
    /// Returns the chosen set plus the primary keyword's documents in score
    /// order, used to pick the aggregation targets.
    async fn prefilter_doc_ids(
        &self,
        must_have: &[String],
    ) -> (Option<BTreeSet<String>>, Vec<String>) {
        let lookups = must_have.iter().map(|kw| async move {
            let query = json!({
                "multi_match": { "query": kw, "fields": FINDING_FIELDS }
            });
            match self
                .lexical
                .search(
                    &self.config.lexical.findings_index,
                    query,
                    self.config.retrieval.prefilter_doc_top_k,
                )
                .await
            {
                Ok(hits) => hits
                    .into_iter()
                    .filter_map(|h| {
                        h.source
                            .get("doc_id")
                            .and_then(|d| d.as_str())
                            .map(str::to_string)
                    })
                    .collect::<Vec<String>>(),
                Err(e) => {
                    tracing::warn!("doc prefilter failed for '{}': {}", kw, e);
                    Vec::new()
                }
            }
        });
        let per_keyword: Vec<Vec<String>> = join_all(lookups).await;

        let primary_ranked = dedup_preserving_order(per_keyword.first().cloned().unwrap_or_default());

        let sets: Vec<BTreeSet<String>> = per_keyword
            .iter()
            .map(|docs| docs.iter().cloned().collect())
            .collect();

        let chosen = if sets.len() >= 2 {
            let mut intersection = sets[0].clone();
            for set in &sets[1..] {
                intersection = intersection.intersection(set).cloned().collect();
            }
            if intersection.is_empty() {
                tracing::info!("doc-set intersection empty, relaxing to union");
                let mut union = BTreeSet::new();
                for set in &sets {
                    union.extend(set.iter().cloned());
                }
                union
            } else {
                intersection
            }
        } else {
            sets.into_iter().next().unwrap_or_default()
        };

        (Some(chosen), primary_ranked)
    }

    /// Single grouped aggregation over the best documents, cached process-wide.
    async fn keyword_frequencies(
        &self,
        doc_ids: &BTreeSet<String>,
        primary_ranked: &[String],
        keywords: &[String],
    ) -> HashMap<String, u64> {
        // The aggregation runs over the top documents by the primary
        // keyword's ranking, not the whole candidate set.
        let target_docs: Vec<String> = primary_ranked
            .iter()
            .filter(|d| doc_ids.contains(*d))
            .take(self.config.retrieval.keyword_freq_doc_top_k)
            .cloned()
            .collect();
        if target_docs.is_empty() || keywords.is_empty() {
            return HashMap::new();
        }

        let cache_key = keyword_freq_cache_key(&target_docs, keywords);
        if let Some(cached) = self.keyword_freq_cache.get(&cache_key) {
            tracing::debug!("keyword-frequency cache hit");
            return cached;
        }

        match self
            .lexical
            .keyword_counts(
                &self.config.lexical.findings_index,
                &target_docs,
                keywords,
                "item_detail",
            )
            .await
        {
            Ok(counts) => {
                self.keyword_freq_cache.put(cache_key, counts.clone());
                counts
            }
            Err(e) => {
                tracing::warn!("keyword-frequency aggregation failed: {}", e);
                HashMap::new()
            }
        }
    }
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Assemble the stage-1 bool query: boosted must-have clauses, half-boost
/// should-haves, related terms, slot meta-filters and the document set.
fn build_finding_query(ctx: &QueryContext, expansion: &crate::model::Expansion) -> serde_json::Value {
    let mut must = Vec::new();
    let mut should = Vec::new();
    let mut filter = Vec::new();

    for kw in &expansion.must_have {
        must.push(json!({
            "multi_match": {
                "query": kw,
                "fields": FINDING_FIELDS,
                "boost": expansion.boost(kw),
            }
        }));
    }
    for kw in &expansion.should_have {
        should.push(json!({
            "multi_match": {
                "query": kw,
                "fields": FINDING_FIELDS,
                "boost": expansion.boost(kw) / 2.0,
            }
        }));
    }
    for term in &expansion.related_terms {
        should.push(json!({ "match": { "item_detail": term } }));
    }

    if must.is_empty() {
        // No keyword strategy: score on the normalized query itself.
        must.push(json!({
            "multi_match": { "query": ctx.normalized, "fields": FINDING_FIELDS }
        }));
    }

    let slots = &ctx.slots;
    if !slots.codes.is_empty() {
        filter.push(json!({ "terms": { "code": slots.codes } }));
    }
    if !slots.industry_sub.is_empty() {
        filter.push(json!({ "terms": { "industry_sub": slots.industry_sub } }));
    }
    if !slots.domain_tags.is_empty() {
        filter.push(json!({ "terms": { "domain_tags": slots.domain_tags } }));
    }
    if let Some(ref doc_ids) = ctx.target_doc_ids {
        if !doc_ids.is_empty() {
            filter.push(json!({ "terms": { "doc_id": doc_ids } }));
        }
    }

    json!({ "bool": { "must": must, "should": should, "filter": filter } })
}

/// The vector-side filter mirrors the lexical meta-filters.
fn build_finding_filter(ctx: &QueryContext) -> VectorFilter {
    let mut filter = VectorFilter::new();
    let slots = &ctx.slots;
    if !slots.codes.is_empty() {
        filter = filter.any_of("code", slots.codes.iter().cloned().collect());
    }
    if !slots.industry_sub.is_empty() {
        filter = filter.any_of("industry_sub", slots.industry_sub.iter().cloned().collect());
    }
    if let Some(ref doc_ids) = ctx.target_doc_ids {
        if !doc_ids.is_empty() {
            filter = filter.any_of("doc_id", doc_ids.iter().cloned().collect());
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Expansion;

    #[test]
    fn query_carries_boosts_and_filters() {
        let mut ctx = QueryContext::new("제조업 매출누락");
        ctx.normalized = "제조업 매출누락".to_string();
        ctx.slots.industry_sub.insert("제조업".to_string());
        ctx.target_doc_ids = Some(["D1".to_string(), "D2".to_string()].into());

        let mut expansion = Expansion {
            must_have: vec!["제조업".into(), "매출누락".into()],
            should_have: vec!["무자료매출".into()],
            ..Default::default()
        };
        expansion.boost_weights.insert("제조업".into(), 3.0);

        let query = build_finding_query(&ctx, &expansion);
        let must = query.pointer("/bool/must").unwrap().as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0].pointer("/multi_match/boost").unwrap(), 3.0);
        // Unlisted keywords fall back to the neutral boost.
        assert_eq!(must[1].pointer("/multi_match/boost").unwrap(), 1.5);

        let should = query.pointer("/bool/should").unwrap().as_array().unwrap();
        assert_eq!(should[0].pointer("/multi_match/boost").unwrap(), 0.75);

        let filter = query.pointer("/bool/filter").unwrap().as_array().unwrap();
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let deduped = dedup_preserving_order(vec![
            "D2".into(),
            "D1".into(),
            "D2".into(),
            "D3".into(),
        ]);
        assert_eq!(deduped, vec!["D2", "D1", "D3"]);
    }
}
