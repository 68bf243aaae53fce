//! Context packing
//!
//! Renders the ranked blocks into a bounded markdown context for the LLM.
//! Sections follow a fixed presentation order, chunks follow their source
//! order, and adjacent chunks can be merged into one body. Every emitted
//! body ends with its citation tag; the citation list is built alongside.

use crate::config::AnswerConfig;
use crate::model::{ChunkHit, Citation, PackedContext, RankedBlock, Section};

/// Approximate token count: whitespace tokens × 1.3.
///
/// The multiplier compensates for subword splitting; the estimator is a
/// single free function so it can be swapped for a real tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as usize
}

/// Pack blocks into a prompt context within the token budget.
pub fn pack_context(blocks: &[RankedBlock], config: &AnswerConfig) -> PackedContext {
    let mut packed = PackedContext::default();
    let mut budget_hit = false;

    for (rank, block) in blocks.iter().enumerate() {
        if budget_hit {
            break;
        }
        let header = render_header(rank + 1, block);
        let header_tokens = estimate_tokens(&header);
        if packed.token_estimate + header_tokens > config.context_token_budget {
            break;
        }
        packed.text.push_str(&header);
        packed.token_estimate += header_tokens;

        for section in Section::PRESENTATION_ORDER {
            let Some(chunks) = block.sections.get(&section) else {
                continue;
            };
            if chunks.is_empty() {
                continue;
            }
            let mut ordered: Vec<&ChunkHit> = chunks.iter().collect();
            ordered.sort_by_key(|hit| (hit.chunk.section_order, hit.chunk.chunk_order));

            let runs = if config.context_merge_adjacent {
                merge_adjacent(&ordered)
            } else {
                ordered.iter().map(|hit| vec![*hit]).collect()
            };

            let section_heading = format!("### {}\n", section.label());
            let mut heading_emitted = false;

            for run in runs {
                let (body, citation) = render_run(&run, block);
                let mut tokens = estimate_tokens(&body);
                if !heading_emitted {
                    tokens += estimate_tokens(&section_heading);
                }
                if packed.token_estimate + tokens > config.context_token_budget {
                    budget_hit = true;
                    break;
                }
                if !heading_emitted {
                    packed.text.push_str(&section_heading);
                    heading_emitted = true;
                }
                packed.text.push_str(&body);
                packed.token_estimate += tokens;
                packed.citations.push(citation);
            }
            if budget_hit {
                break;
            }
        }
        packed.text.push('\n');
    }

    if budget_hit {
        tracing::info!(
            "context budget reached at ~{} tokens",
            packed.token_estimate
        );
    }
    packed
}

fn render_header(rank: usize, block: &RankedBlock) -> String {
    let sections: Vec<&str> = block
        .source_sections
        .iter()
        .map(|s| s.label())
        .collect();
    format!(
        "## Block {rank}\n- 문서: {doc}\n- 적출항목: {finding} {item}\n- 세목코드: {code}\n- 섹션: {sections}\n",
        rank = rank,
        doc = block.doc_id,
        finding = block.finding_id,
        item = block.item,
        code = block.code.as_deref().unwrap_or("-"),
        sections = sections.join(", "),
    )
}

/// Render one run of merged chunks: bodies joined by single newlines, one
/// citation spanning the run.
fn render_run(run: &[&ChunkHit], block: &RankedBlock) -> (String, Citation) {
    let bodies: Vec<&str> = run.iter().map(|hit| hit.chunk.text.trim()).collect();
    let first = &run[0].chunk;
    let last = &run[run.len() - 1].chunk;

    let line_range = match (first.start_line, last.end_line) {
        (Some(start), Some(end)) => Some((start, end)),
        _ => None,
    };
    let citation = Citation {
        doc_id: if first.doc_id.is_empty() {
            block.doc_id.clone()
        } else {
            first.doc_id.clone()
        },
        finding_id: block.finding_id.clone(),
        page: first.page,
        line_range,
    };

    let body = format!("{}\n{}\n", bodies.join("\n"), citation.tag());
    (body, citation)
}

/// Group chunks whose `(section_order, chunk_order)` are consecutive.
fn merge_adjacent<'a>(ordered: &[&'a ChunkHit]) -> Vec<Vec<&'a ChunkHit>> {
    let mut runs: Vec<Vec<&ChunkHit>> = Vec::new();
    for hit in ordered {
        let adjacent = runs.last().and_then(|run| run.last()).is_some_and(|prev| {
            prev.chunk.section_order == hit.chunk.section_order
                && hit.chunk.chunk_order == prev.chunk.chunk_order + 1
        });
        if adjacent {
            if let Some(run) = runs.last_mut() {
                run.push(hit);
            }
        } else {
            runs.push(vec![hit]);
        }
    }
    runs
}
