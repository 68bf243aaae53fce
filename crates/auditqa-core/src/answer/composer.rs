//! Answer composition
//!
//! One LLM call turns the packed context into a card-per-block markdown
//! answer; the final text adds the keyword-strategy preamble, the citation
//! footer and the supplementary section. On LLM failure a deterministic
//! block listing is emitted instead, so the query still returns sources.

use crate::backend::LlmClient;
use crate::model::{QueryContext, RankedBlock};

pub struct Composer<'a> {
    pub llm: &'a dyn LlmClient,
}

impl<'a> Composer<'a> {
    /// Compose the final answer for the search path.
    pub async fn compose(&self, ctx: &mut QueryContext) {
        let context_text = ctx
            .context
            .as_ref()
            .map(|c| c.text.clone())
            .unwrap_or_default();

        let body = match self
            .llm
            .generate(&build_answer_prompt(&ctx.raw, &context_text), false)
            .await
        {
            Ok(response) if !response.trim().is_empty() => response,
            Ok(_) => {
                tracing::warn!("composer returned empty output, using block listing");
                ctx.error = Some("LLM 응답이 비어 있습니다".to_string());
                fallback_body(&ctx.block_ranking)
            }
            Err(e) => {
                tracing::warn!("composer LLM call failed: {}", e);
                ctx.error = Some(format!("답변 생성 실패: {}", e));
                fallback_body(&ctx.block_ranking)
            }
        };

        let mut answer = String::new();
        if let Some(preamble) = strategy_preamble(ctx) {
            answer.push_str(&preamble);
            answer.push('\n');
        }
        answer.push_str(body.trim());
        answer.push_str(&references_section(ctx));
        answer.push_str(&additional_section(&ctx.excluded_blocks));
        ctx.answer = Some(answer);
    }

    /// Explanation path: definitional answers without retrieval.
    pub async fn explain(&self, ctx: &mut QueryContext) {
        let prompt = format!(
            "세무조사 분야의 용어 질문이다. 아래 질문에 대해 정의와 전형적인 사례 유형을 한국어로 간결히 설명하라.\n\n질문: {}",
            ctx.raw
        );
        match self.llm.generate(&prompt, false).await {
            Ok(response) if !response.trim().is_empty() => {
                ctx.answer = Some(response.trim().to_string());
            }
            Ok(_) | Err(_) => {
                tracing::warn!("explain LLM call unusable, emitting fixed message");
                ctx.error = Some("설명 생성 실패".to_string());
                ctx.answer = Some(
                    "현재 용어 설명을 생성할 수 없습니다. 잠시 후 다시 시도해 주세요.".to_string(),
                );
            }
        }
    }
}

fn build_answer_prompt(question: &str, context_text: &str) -> String {
    format!(
        r###"아래는 세무조사 적출사례 검색 결과다. 이를 근거로 질문에 답하라.

질문: {question}

검색 결과:
{context_text}

지침:
- 검색 결과의 모든 Block 을 빠짐없이 다룰 것
- Block 마다 "## Block N" 제목의 카드 형식 마크다운으로 작성할 것
- 본문에 제공된 인용 태그([문서:페이지:행] 형식)를 그대로 사용해 출처를 표시할 것
- 검색 결과에 없는 내용은 쓰지 말 것"###,
        question = question,
        context_text = context_text,
    )
}

/// Multi-keyword searches explain their strategy before the answer body.
fn strategy_preamble(ctx: &QueryContext) -> Option<String> {
    let expansion = ctx.expansion.as_ref()?;
    if expansion.must_have.len() < 2 {
        return None;
    }
    let doc_keyword = expansion.doc_keyword().unwrap_or_default();
    let doc_count = ctx
        .target_doc_ids
        .as_ref()
        .map(|d| d.len())
        .unwrap_or_default();

    let mut preamble = format!(
        "**검색 전략**: 문서 필터 키워드 '{doc_keyword}' (대상 문서 {doc_count}건)",
    );
    for kw in expansion.block_keywords() {
        let blocks = ctx.keyword_block_counts.get(kw).copied().unwrap_or(0);
        let freq = ctx.keyword_freq.get(kw).copied().unwrap_or(0);
        preamble.push_str(&format!(
            ", 블록 필터 키워드 '{kw}' (문서 내 출현 {freq}건, 매칭 블록 {blocks}건)"
        ));
    }
    preamble.push('\n');
    Some(preamble)
}

/// Deterministic answer body used when the LLM is unavailable: block headers
/// without narrative.
fn fallback_body(blocks: &[RankedBlock]) -> String {
    let mut body = String::from("검색된 사례 목록입니다.\n");
    for (rank, block) in blocks.iter().enumerate() {
        body.push_str(&format!(
            "\n## Block {}\n- 문서: {}\n- 적출항목: {} {}\n- 세목코드: {}\n",
            rank + 1,
            block.doc_id,
            block.finding_id,
            block.item,
            block.code.as_deref().unwrap_or("-"),
        ));
    }
    body
}

fn references_section(ctx: &QueryContext) -> String {
    let Some(context) = ctx.context.as_ref() else {
        return String::new();
    };
    if context.citations.is_empty() {
        return String::new();
    }
    let mut section = String::from("\n\n## References\n");
    let mut seen = std::collections::BTreeSet::new();
    for citation in &context.citations {
        let tag = citation.tag();
        if seen.insert(tag.clone()) {
            section.push_str(&format!("- {} ({})\n", tag, citation.finding_id));
        }
    }
    section
}

fn additional_section(excluded: &[RankedBlock]) -> String {
    if excluded.is_empty() {
        return String::new();
    }
    let mut section = String::from("\n## Additional\n문서 키워드만 일치한 참고 사례:\n");
    for block in excluded {
        section.push_str(&format!(
            "- {} / {} {}\n",
            block.doc_id, block.finding_id, block.item
        ));
    }
    section
}
