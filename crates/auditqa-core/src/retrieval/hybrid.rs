//! Hybrid search primitive with Reciprocal Rank Fusion
//!
//! Runs the lexical and vector sub-searches concurrently, recovers each side
//! to an empty ranking on error, and fuses by RRF. When one ranking is empty
//! the fusion degenerates to the other.

use crate::backend::{Embedder, LexicalBackend, LexicalHit, VectorBackend, VectorFilter, VectorHit};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Parameters of one hybrid invocation
#[derive(Debug, Clone)]
pub struct HybridParams {
    pub k_lex: usize,
    pub k_vec: usize,
    pub k_rrf: f64,
    pub score_threshold: f32,
    pub top_n: usize,
    /// Run BM25 only, treating the vector ranking as empty
    pub skip_vector: bool,
}

/// One fused hit carrying both original scores and their sources
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: String,
    pub score_lex: f64,
    pub score_vec: f64,
    pub rrf_score: f64,
    pub lexical_source: Option<serde_json::Value>,
    pub vector_payload: Option<serde_json::Value>,
}

impl FusedHit {
    /// The higher of the two original scores, used for tie-breaking
    fn best_original(&self) -> f64 {
        self.score_lex.max(self.score_vec)
    }
}

/// Result of a hybrid invocation, with per-side failure flags for warnings
#[derive(Debug, Default)]
pub struct HybridOutcome {
    pub hits: Vec<FusedHit>,
    pub lexical_failed: bool,
    pub vector_failed: bool,
}

/// Reciprocal Rank Fusion over two rankings.
///
/// `rrf = Σ_r 1 / (k + rank_r)` with 1-based ranks; an item absent from a
/// ranking contributes nothing for it. Ordering is rrf descending, then the
/// higher original score, then id ascending, so equal inputs always produce
/// identical output.
pub fn rrf_fuse(lexical: &[LexicalHit], vector: &[VectorHit], k_rrf: f64) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for (rank, hit) in lexical.iter().enumerate() {
        let entry = fused.entry(hit.id.clone()).or_insert_with(|| FusedHit {
            id: hit.id.clone(),
            score_lex: 0.0,
            score_vec: 0.0,
            rrf_score: 0.0,
            lexical_source: None,
            vector_payload: None,
        });
        entry.score_lex = hit.score;
        entry.lexical_source = Some(hit.source.clone());
        entry.rrf_score += 1.0 / (k_rrf + (rank + 1) as f64);
    }

    for (rank, hit) in vector.iter().enumerate() {
        let entry = fused.entry(hit.id.clone()).or_insert_with(|| FusedHit {
            id: hit.id.clone(),
            score_lex: 0.0,
            score_vec: 0.0,
            rrf_score: 0.0,
            lexical_source: None,
            vector_payload: None,
        });
        entry.score_vec = hit.score;
        entry.vector_payload = Some(hit.payload.clone());
        entry.rrf_score += 1.0 / (k_rrf + (rank + 1) as f64);
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.best_original()
                    .partial_cmp(&a.best_original())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    hits
}

/// Full hybrid invocation: concurrent sub-searches, recovery, fusion, cutoff.
pub async fn hybrid_search(
    lexical: &dyn LexicalBackend,
    vector: &dyn VectorBackend,
    embedder: &dyn Embedder,
    query_text: &str,
    lexical_query: serde_json::Value,
    vector_filter: &VectorFilter,
    index: &str,
    collection: &str,
    params: &HybridParams,
) -> HybridOutcome {
    let lexical_fut = async {
        match lexical.search(index, lexical_query, params.k_lex).await {
            Ok(hits) => (hits, false),
            Err(e) => {
                tracing::warn!("lexical search failed on {}: {}", index, e);
                (Vec::new(), true)
            }
        }
    };

    let vector_fut = async {
        if params.skip_vector {
            return (Vec::new(), false);
        }
        let embedding = match embedder.embed(query_text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("query embedding failed: {}", e);
                return (Vec::new(), true);
            }
        };
        match vector
            .search(
                collection,
                embedding,
                vector_filter,
                params.k_vec,
                params.score_threshold,
            )
            .await
        {
            Ok(hits) => (hits, false),
            Err(e) => {
                tracing::warn!("vector search failed on {}: {}", collection, e);
                (Vec::new(), true)
            }
        }
    };

    let ((lexical_hits, lexical_failed), (vector_hits, vector_failed)) =
        tokio::join!(lexical_fut, vector_fut);

    let mut hits = rrf_fuse(&lexical_hits, &vector_hits, params.k_rrf);
    hits.truncate(params.top_n);

    HybridOutcome {
        hits,
        lexical_failed,
        vector_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lex(id: &str, score: f64) -> LexicalHit {
        LexicalHit {
            id: id.to_string(),
            score,
            source: json!({}),
        }
    }

    fn vec_hit(id: &str, score: f64) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            payload: json!({}),
        }
    }

    #[test]
    fn fusion_prefers_items_in_both_rankings() {
        let lexical = vec![lex("a", 9.0), lex("b", 8.0)];
        let vector = vec![vec_hit("b", 0.9), vec_hit("c", 0.8)];

        let fused = rrf_fuse(&lexical, &vector, 60.0);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].id, "b");
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].rrf_score - expected).abs() < 1e-12);
    }

    #[test]
    fn fusion_degenerates_when_one_side_empty() {
        let lexical = vec![lex("a", 9.0), lex("b", 8.0)];
        let fused = rrf_fuse(&lexical, &[], 60.0);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "a");
        assert!((fused[0].rrf_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn ties_break_by_original_score_then_id() {
        // Same rrf contribution (rank 1 in one ranking each)
        let lexical = vec![lex("b", 5.0)];
        let vector = vec![vec_hit("a", 0.7)];

        let fused = rrf_fuse(&lexical, &vector, 60.0);
        assert_eq!(fused[0].id, "b"); // higher original score wins

        let lexical = vec![lex("b", 0.7)];
        let vector = vec![vec_hit("a", 0.7)];
        let fused = rrf_fuse(&lexical, &vector, 60.0);
        assert_eq!(fused[0].id, "a"); // equal originals fall back to id order
    }

    #[test]
    fn scores_are_finite_and_non_negative() {
        let lexical = vec![lex("a", 3.0), lex("b", 2.0)];
        let vector = vec![vec_hit("a", 0.5)];
        for hit in rrf_fuse(&lexical, &vector, 60.0) {
            assert!(hit.rrf_score.is_finite());
            assert!(hit.rrf_score >= 0.0);
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn ranking(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
            proptest::collection::vec(0u8..12, 0..max_len).prop_map(|ids| {
                let mut seen = std::collections::BTreeSet::new();
                ids.into_iter().filter(|id| seen.insert(*id)).collect()
            })
        }

        fn fused_score(fused: &[FusedHit], id: u8) -> f64 {
            fused
                .iter()
                .find(|h| h.id == id.to_string())
                .map(|h| h.rrf_score)
                .unwrap_or(0.0)
        }

        proptest! {
            // Appending an item to one ranking can only raise its fused score.
            #[test]
            fn rrf_is_monotone(lex_ids in ranking(8), vec_ids in ranking(8), added in 0u8..12) {
                let to_lex = |ids: &[u8]| -> Vec<LexicalHit> {
                    ids.iter().map(|id| lex(&id.to_string(), 1.0)).collect()
                };
                let to_vec = |ids: &[u8]| -> Vec<VectorHit> {
                    ids.iter().map(|id| vec_hit(&id.to_string(), 0.5)).collect()
                };

                prop_assume!(!lex_ids.contains(&added));

                let before = rrf_fuse(&to_lex(&lex_ids), &to_vec(&vec_ids), 60.0);
                let mut extended = lex_ids.clone();
                extended.push(added);
                let after = rrf_fuse(&to_lex(&extended), &to_vec(&vec_ids), 60.0);

                prop_assert!(fused_score(&after, added) >= fused_score(&before, added));
                // Items ranked ahead of the appended one are untouched.
                for id in &lex_ids {
                    prop_assert!((fused_score(&after, *id) - fused_score(&before, *id)).abs() < 1e-12);
                }
            }
        }
    }
}
