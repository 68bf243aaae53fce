//! Stage-2 retrieval over chunk-level records
//!
//! One hybrid invocation per required section, all issued concurrently and
//! restricted to the stage-1 findings. Chunks whose payload lacks text are
//! completed from the lexical store or dropped.

use crate::backend::{Embedder, LexicalBackend, VectorBackend, VectorFilter};
use crate::config::Config;
use crate::error::Result;
use crate::model::{Chunk, ChunkHit, QueryContext, Section};
use crate::retrieval::hybrid::{hybrid_search, FusedHit, HybridParams};
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;

/// Chunk fields scored by the lexical query, with boosts
const CHUNK_FIELDS: [&str; 3] = ["text^2", "text_norm^1", "item^0.5"];

pub struct ChunkRetriever<'a> {
    pub lexical: &'a dyn LexicalBackend,
    pub vector: &'a dyn VectorBackend,
    pub embedder: &'a dyn Embedder,
    pub config: &'a Config,
}

impl<'a> ChunkRetriever<'a> {
    /// Run stage 2, filling `section_groups` on the context.
    pub async fn retrieve(&self, ctx: &mut QueryContext) -> Result<()> {
        let finding_ids: Vec<String> = ctx
            .finding_hits
            .iter()
            .map(|h| h.finding.finding_id.clone())
            .collect();
        if finding_ids.is_empty() {
            return Ok(());
        }

        let sections = required_sections(ctx);
        let ctx_ref: &QueryContext = ctx;
        let searches = sections.iter().map(|&section| {
            let finding_ids = finding_ids.clone();
            async move {
                let outcome = self.search_section(ctx_ref, section, &finding_ids).await;
                (section, outcome)
            }
        });
        let results: Vec<(Section, (Vec<FusedHit>, bool))> = join_all(searches).await;

        let mut vector_failed = false;
        let mut groups: BTreeMap<Section, Vec<ChunkHit>> = BTreeMap::new();
        for (section, (hits, section_vector_failed)) in results {
            vector_failed |= section_vector_failed;
            let mut chunk_hits = Vec::with_capacity(hits.len());
            for hit in hits {
                if let Some(chunk_hit) = self.materialize(section, hit).await {
                    chunk_hits.push(chunk_hit);
                }
            }
            tracing::info!("stage 2 [{}]: {} chunks", section, chunk_hits.len());
            groups.insert(section, chunk_hits);
        }

        if vector_failed {
            let note = "의미 검색을 사용할 수 없어 어휘 검색 결과만 사용했습니다.".to_string();
            if !ctx.warnings.contains(&note) {
                ctx.warnings.push(note);
            }
        }

        ctx.section_groups = groups;
        Ok(())
    }

    async fn search_section(
        &self,
        ctx: &QueryContext,
        section: Section,
        finding_ids: &[String],
    ) -> (Vec<FusedHit>, bool) {
        let hints = ctx
            .slots
            .section_hints
            .get(&section)
            .map(|h| h.join(" "))
            .unwrap_or_default();
        let query_text = if hints.is_empty() {
            ctx.slots.free_text.clone()
        } else {
            format!("{} {}", ctx.slots.free_text, hints)
        };

        let mut filter = vec![
            json!({ "term": { "section": section.as_str() } }),
            json!({ "terms": { "finding_id": finding_ids } }),
        ];
        let mut vector_filter = VectorFilter::new()
            .eq("section", section.as_str())
            .any_of("finding_id", finding_ids.to_vec());

        if let Some(ref doc_ids) = ctx.target_doc_ids {
            if !doc_ids.is_empty() {
                filter.push(json!({ "terms": { "doc_id": doc_ids } }));
                vector_filter = vector_filter.any_of("doc_id", doc_ids.iter().cloned().collect());
            }
        }

        let lexical_query = json!({
            "bool": {
                "must": [
                    { "multi_match": { "query": query_text, "fields": CHUNK_FIELDS } }
                ],
                "filter": filter,
            }
        });

        let retrieval = &self.config.retrieval;
        let params = HybridParams {
            k_lex: retrieval.chunks_top_k_lex,
            k_vec: retrieval.chunks_top_k_vec,
            k_rrf: retrieval.findings_rrf_k,
            score_threshold: retrieval.vector_score_threshold,
            top_n: retrieval.chunks_top_k_lex.max(retrieval.chunks_top_k_vec),
            skip_vector: false,
        };

        let outcome = hybrid_search(
            self.lexical,
            self.vector,
            self.embedder,
            &query_text,
            lexical_query,
            &vector_filter,
            &self.config.lexical.chunks_index,
            &self.config.vector.chunks_collection,
            &params,
        )
        .await;

        (outcome.hits, outcome.vector_failed)
    }

    /// Build a [`ChunkHit`] from a fused hit, completing missing text from
    /// the lexical store. Chunks with no recoverable text are dropped.
    async fn materialize(&self, section: Section, hit: FusedHit) -> Option<ChunkHit> {
        let source = hit
            .lexical_source
            .clone()
            .filter(|s| !s.is_null())
            .or_else(|| hit.vector_payload.clone())
            .unwrap_or(serde_json::Value::Null);
        let mut chunk: Chunk = serde_json::from_value(source).unwrap_or_default();
        if chunk.chunk_id.is_empty() {
            chunk.chunk_id = hit.id.clone();
        }
        if chunk.section.is_none() {
            chunk.section = Some(section);
        }

        if chunk.text.is_empty() {
            // Vector payloads may carry only metadata.
            match self
                .lexical
                .get(&self.config.lexical.chunks_index, &chunk.chunk_id)
                .await
            {
                Ok(Some(source)) => {
                    if let Ok(full) = serde_json::from_value::<Chunk>(source) {
                        chunk.text = full.text;
                        chunk.page = chunk.page.or(full.page);
                        chunk.start_line = chunk.start_line.or(full.start_line);
                        chunk.end_line = chunk.end_line.or(full.end_line);
                        if chunk.finding_id.is_empty() {
                            chunk.finding_id = full.finding_id;
                        }
                        if chunk.doc_id.is_empty() {
                            chunk.doc_id = full.doc_id;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("chunk text fetch failed for {}: {}", chunk.chunk_id, e);
                }
            }
        }

        if chunk.text.is_empty() {
            tracing::debug!("dropping chunk {} with no text", chunk.chunk_id);
            return None;
        }

        Some(ChunkHit {
            chunk,
            score_combined: hit.rrf_score,
        })
    }
}

/// The sections stage 2 must cover: hinted sections when present, else both
/// primary sections.
pub fn required_sections(ctx: &QueryContext) -> Vec<Section> {
    let hinted: Vec<Section> = ctx.slots.section_hints.keys().copied().collect();
    if hinted.is_empty() {
        Section::PRIMARY.to_vec()
    } else {
        hinted
    }
}
