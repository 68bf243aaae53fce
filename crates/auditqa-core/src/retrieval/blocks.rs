//! Block promotion: chunks back to finding-level presentation units
//!
//! Groups stage-2 chunks by finding within each section, prefers findings
//! covered by every required section when enough of them exist, otherwise
//! blends per-section scores, then applies the block-level keyword filter
//! and the per-document diversity cap.

use crate::config::AnswerConfig;
use crate::model::{ChunkHit, FindingHit, QueryContext, RankedBlock, Section};
use crate::retrieval::chunks::required_sections;
use std::collections::{BTreeMap, BTreeSet};

/// How a block relates to the must-have keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeywordMatch {
    /// Contains a block-level keyword
    Full,
    /// Contains only the document-level keyword
    Partial,
    None,
}

/// Run block promotion, filling `block_ranking`, `excluded_blocks` and
/// `keyword_block_counts` on the context.
pub fn promote_blocks(ctx: &mut QueryContext, config: &AnswerConfig) {
    let sections = required_sections(ctx);
    let expansion = ctx.expansion.clone().unwrap_or_default();

    // finding_id → section → top chunks
    let mut per_finding: BTreeMap<String, BTreeMap<Section, Vec<ChunkHit>>> = BTreeMap::new();
    for (&section, hits) in &ctx.section_groups {
        let mut per_section: BTreeMap<String, Vec<ChunkHit>> = BTreeMap::new();
        for hit in hits {
            let entry = per_section
                .entry(hit.chunk.finding_id.clone())
                .or_default();
            // Hits arrive in rank order, so the first k are the top chunks.
            if entry.len() < config.block_top_k_chunks {
                entry.push(hit.clone());
            }
        }
        for (finding_id, chunks) in per_section {
            per_finding
                .entry(finding_id)
                .or_default()
                .insert(section, chunks);
        }
    }

    let covered: BTreeSet<String> = per_finding
        .iter()
        .filter(|(_, by_section)| sections.iter().all(|s| by_section.contains_key(s)))
        .map(|(id, _)| id.clone())
        .collect();

    let intersection_mode = covered.len() >= config.block_intersection_min;
    if intersection_mode {
        tracing::info!(
            "intersection mode: {} findings cover all {} sections",
            covered.len(),
            sections.len()
        );
        per_finding.retain(|id, _| covered.contains(id));
    }

    let finding_index: BTreeMap<&str, &FindingHit> = ctx
        .finding_hits
        .iter()
        .map(|h| (h.finding.finding_id.as_str(), h))
        .collect();

    let mut blocks: Vec<RankedBlock> = per_finding
        .into_iter()
        .map(|(finding_id, by_section)| {
            let score = if intersection_mode {
                mean_chunk_score(&by_section)
            } else {
                blended_score(&by_section, &sections, config)
            };
            build_block(finding_id, by_section, score, &finding_index)
        })
        .collect();

    // Keyword filtering only applies to multi-keyword strategies.
    let block_keywords = expansion.block_keywords();
    let mut excluded = Vec::new();
    if !block_keywords.is_empty() {
        let doc_keyword = expansion.doc_keyword().unwrap_or_default().to_string();
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut kept = Vec::new();

        for block in blocks {
            let text = block.joined_text();
            for kw in block_keywords {
                if text.contains(kw.as_str()) {
                    *counts.entry(kw.clone()).or_default() += 1;
                }
            }
            match classify(&text, &doc_keyword, block_keywords) {
                KeywordMatch::Full => kept.push(block),
                KeywordMatch::Partial => excluded.push(block),
                KeywordMatch::None => {}
            }
        }
        blocks = kept;
        ctx.keyword_block_counts = counts;
    }

    blocks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.finding_id.cmp(&b.finding_id))
    });

    // Diversity cap, then the final cut.
    let mut per_doc: BTreeMap<String, usize> = BTreeMap::new();
    let mut ranking = Vec::new();
    for block in blocks {
        let seen = per_doc.entry(block.doc_id.clone()).or_default();
        if *seen >= config.max_blocks_per_doc {
            continue;
        }
        *seen += 1;
        ranking.push(block);
        if ranking.len() >= config.block_final_top_n {
            break;
        }
    }

    tracing::info!(
        "block ranking: {} blocks, {} excluded",
        ranking.len(),
        excluded.len()
    );
    ctx.block_ranking = ranking;
    ctx.excluded_blocks = excluded;
}

fn classify(text: &str, doc_keyword: &str, block_keywords: &[String]) -> KeywordMatch {
    if block_keywords.iter().any(|kw| text.contains(kw.as_str())) {
        KeywordMatch::Full
    } else if !doc_keyword.is_empty() && text.contains(doc_keyword) {
        KeywordMatch::Partial
    } else {
        KeywordMatch::None
    }
}

/// Intersection-mode score: mean over the block's selected chunks across all
/// included sections.
fn mean_chunk_score(by_section: &BTreeMap<Section, Vec<ChunkHit>>) -> f64 {
    let scores: Vec<f64> = by_section
        .values()
        .flatten()
        .map(|c| c.score_combined)
        .collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// Union-mode score: weighted average of per-section block scores, a section
/// with no chunks contributing zero.
fn blended_score(
    by_section: &BTreeMap<Section, Vec<ChunkHit>>,
    sections: &[Section],
    config: &AnswerConfig,
) -> f64 {
    if sections.is_empty() {
        return 0.0;
    }
    let uniform = 1.0 / sections.len() as f64;
    sections
        .iter()
        .map(|section| {
            let weight = match section {
                Section::InvestigationFindings if sections.len() == 2 => {
                    config.section_weight_findings
                }
                Section::InvestigationTechnique if sections.len() == 2 => {
                    config.section_weight_technique
                }
                _ => uniform,
            };
            let section_score = by_section
                .get(section)
                .filter(|chunks| !chunks.is_empty())
                .map(|chunks| {
                    chunks.iter().map(|c| c.score_combined).sum::<f64>() / chunks.len() as f64
                })
                .unwrap_or(0.0);
            weight * section_score
        })
        .sum()
}

fn build_block(
    finding_id: String,
    by_section: BTreeMap<Section, Vec<ChunkHit>>,
    score: f64,
    finding_index: &BTreeMap<&str, &FindingHit>,
) -> RankedBlock {
    let source_sections: BTreeSet<Section> = by_section.keys().copied().collect();
    let doc_id = by_section
        .values()
        .flatten()
        .next()
        .map(|c| c.chunk.doc_id.clone())
        .unwrap_or_default();

    let (item, code) = finding_index
        .get(finding_id.as_str())
        .map(|hit| (hit.finding.item.clone(), hit.finding.code.clone()))
        .unwrap_or_default();

    RankedBlock {
        finding_id,
        doc_id,
        item,
        code,
        score,
        sections: by_section,
        source_sections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, Expansion};

    fn chunk_hit(finding: &str, doc: &str, section: Section, text: &str, score: f64) -> ChunkHit {
        ChunkHit {
            chunk: Chunk {
                chunk_id: format!("{}-{}-{}", finding, section, text.len()),
                finding_id: finding.to_string(),
                doc_id: doc.to_string(),
                section: Some(section),
                text: text.to_string(),
                ..Default::default()
            },
            score_combined: score,
        }
    }

    fn base_ctx() -> QueryContext {
        let mut ctx = QueryContext::new("제조업 매출누락");
        ctx.expansion = Some(Expansion {
            must_have: vec!["제조업".into(), "매출누락".into()],
            ..Default::default()
        });
        ctx
    }

    fn config() -> AnswerConfig {
        AnswerConfig {
            block_top_k_chunks: 3,
            block_intersection_min: 2,
            block_final_top_n: 3,
            max_blocks_per_doc: 2,
            context_token_budget: 4000,
            context_merge_adjacent: true,
            section_weight_findings: 0.5,
            section_weight_technique: 0.5,
            query_deadline_secs: 90,
        }
    }

    #[test]
    fn intersection_mode_requires_full_coverage() {
        let mut ctx = base_ctx();
        for finding in ["F1", "F2"] {
            ctx.section_groups
                .entry(Section::InvestigationFindings)
                .or_default()
                .push(chunk_hit(finding, "D1", Section::InvestigationFindings, "매출누락 적발", 0.8));
            ctx.section_groups
                .entry(Section::InvestigationTechnique)
                .or_default()
                .push(chunk_hit(finding, "D1", Section::InvestigationTechnique, "현금 매출누락 추적", 0.7));
        }
        // F3 covers only one section and must not survive intersection mode.
        ctx.section_groups
            .entry(Section::InvestigationFindings)
            .or_default()
            .push(chunk_hit("F3", "D2", Section::InvestigationFindings, "매출누락", 0.9));

        promote_blocks(&mut ctx, &config());

        assert_eq!(ctx.block_ranking.len(), 2);
        for block in &ctx.block_ranking {
            assert!(block.source_sections.contains(&Section::InvestigationFindings));
            assert!(block.source_sections.contains(&Section::InvestigationTechnique));
        }
    }

    #[test]
    fn union_mode_blends_with_missing_section_as_zero() {
        let mut ctx = base_ctx();
        ctx.expansion = Some(Expansion {
            must_have: vec!["제조업".into()],
            ..Default::default()
        });
        ctx.section_groups
            .entry(Section::InvestigationFindings)
            .or_default()
            .push(chunk_hit("F1", "D1", Section::InvestigationFindings, "적출", 0.8));

        promote_blocks(&mut ctx, &config());

        assert_eq!(ctx.block_ranking.len(), 1);
        // One covered section at weight 0.5, the other contributes zero.
        assert!((ctx.block_ranking[0].score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn keyword_filter_partitions_blocks() {
        let mut ctx = base_ctx();
        ctx.expansion = Some(Expansion {
            must_have: vec!["제조업".into(), "매출누락".into()],
            ..Default::default()
        });
        // Full match: has the block keyword.
        ctx.section_groups
            .entry(Section::InvestigationFindings)
            .or_default()
            .extend([
                chunk_hit("F1", "D1", Section::InvestigationFindings, "매출누락 확인", 0.9),
                chunk_hit("F2", "D2", Section::InvestigationFindings, "제조업 원가 부풀리기", 0.8),
                chunk_hit("F3", "D3", Section::InvestigationFindings, "접대비 한도초과", 0.7),
            ]);

        promote_blocks(&mut ctx, &config());

        assert_eq!(ctx.block_ranking.len(), 1);
        assert_eq!(ctx.block_ranking[0].finding_id, "F1");
        assert_eq!(ctx.excluded_blocks.len(), 1);
        assert_eq!(ctx.excluded_blocks[0].finding_id, "F2");
        assert_eq!(ctx.keyword_block_counts.get("매출누락"), Some(&1));
    }

    #[test]
    fn diversity_cap_limits_blocks_per_doc() {
        let mut ctx = base_ctx();
        ctx.expansion = Some(Expansion {
            must_have: vec!["제조업".into()],
            ..Default::default()
        });
        let mut cfg = config();
        cfg.block_final_top_n = 4;
        for (finding, score) in [("F1", 0.9), ("F2", 0.8), ("F3", 0.7), ("F4", 0.6)] {
            ctx.section_groups
                .entry(Section::InvestigationFindings)
                .or_default()
                .push(chunk_hit(finding, "D1", Section::InvestigationFindings, "적출", score));
        }

        promote_blocks(&mut ctx, &cfg);

        assert_eq!(ctx.block_ranking.len(), 2);
        assert_eq!(ctx.block_ranking[0].finding_id, "F1");
        assert_eq!(ctx.block_ranking[1].finding_id, "F2");
    }

    #[test]
    fn blocks_keep_at_most_top_k_chunks_per_section() {
        let mut ctx = base_ctx();
        ctx.expansion = Some(Expansion {
            must_have: vec!["제조업".into()],
            ..Default::default()
        });
        for i in 0..5 {
            ctx.section_groups
                .entry(Section::InvestigationFindings)
                .or_default()
                .push(chunk_hit("F1", "D1", Section::InvestigationFindings, &format!("텍스트{}", i), 0.9 - i as f64 * 0.1));
        }

        promote_blocks(&mut ctx, &config());

        let block = &ctx.block_ranking[0];
        assert_eq!(block.sections[&Section::InvestigationFindings].len(), 3);
        // Rank order preserved: the highest-scored chunks were kept.
        assert!((block.sections[&Section::InvestigationFindings][0].score_combined - 0.9).abs() < 1e-12);
    }
}
