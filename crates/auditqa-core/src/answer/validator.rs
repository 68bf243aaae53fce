//! Final answer validation
//!
//! The last gate before text leaves the pipeline: forwards recorded errors,
//! renders the no-result and timeout messages, and flags answers that lost
//! their citations.

use crate::model::{QueryContext, Route};

/// Message returned when the per-query deadline expires.
pub fn timeout_message() -> String {
    "요청 처리 시간이 초과되었습니다. 질문을 더 구체적으로 줄여 다시 시도해 주세요.".to_string()
}

/// Validate the assembled answer and return the final text.
pub fn validate(ctx: &mut QueryContext) -> String {
    // Non-search routes already carry their final text.
    if matches!(ctx.route, Some(Route::Clarify)) {
        return ctx.answer.clone().unwrap_or_else(|| {
            "질문을 조금 더 구체적으로 입력해 주세요.".to_string()
        });
    }

    if matches!(ctx.route, Some(Route::Explain)) {
        return with_notices(ctx, ctx.answer.clone().unwrap_or_default());
    }

    if ctx.block_ranking.is_empty() {
        // An outage is not the same as a genuine miss: with both stores down
        // the keyword echo would wrongly suggest the corpus has no match.
        if ctx.retrieval_unavailable {
            return with_notices(
                ctx,
                "검색 저장소에 연결할 수 없어 결과를 제공할 수 없습니다. 잠시 후 다시 시도해 주세요."
                    .to_string(),
            );
        }
        let keywords = ctx
            .expansion
            .as_ref()
            .map(|e| e.must_have.join("', '"))
            .unwrap_or_default();
        let message = if keywords.is_empty() {
            "조건에 맞는 사례를 찾지 못했습니다.".to_string()
        } else {
            format!("'{}' 키워드로 일치하는 사례를 찾지 못했습니다.", keywords)
        };
        return with_notices(ctx, message);
    }

    let mut answer = ctx.answer.clone().unwrap_or_default();

    // Blocks without a single inline citation mean the model dropped its
    // sources; the reader has to know.
    if !answer.contains('[') {
        answer.push_str("\n\n※ 이 답변에는 출처 인용이 누락되었습니다. 원문 확인을 권장합니다.");
    }

    with_notices(ctx, answer)
}

/// Append recorded errors and warnings as reader-visible notices.
fn with_notices(ctx: &QueryContext, mut answer: String) -> String {
    if let Some(ref error) = ctx.error {
        answer.push_str(&format!("\n\n※ 처리 중 오류가 있었습니다: {}", error));
    }
    for warning in &ctx.warnings {
        answer.push_str(&format!("\n※ {}", warning));
    }
    answer
}
