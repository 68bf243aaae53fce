//! Routing over the parsed query
//!
//! Low-confidence or under-specified queries are sent back to the user with
//! a clarification question instead of a retrieval round-trip.

use crate::model::{Intent, QueryContext, Route};

/// Decide the route for the current context.
pub fn route(ctx: &QueryContext, confidence_threshold: f64) -> Route {
    if ctx.slots.confidence < confidence_threshold {
        return Route::Clarify;
    }
    // Definitional questions carry no keyword strategy; they go straight to
    // the explanation path.
    if ctx.intent == Intent::Explain {
        return Route::Explain;
    }
    let must_have_empty = ctx
        .expansion
        .as_ref()
        .map_or(true, |e| e.must_have.is_empty());
    if must_have_empty || ctx.slots.is_empty_meta() {
        return Route::Clarify;
    }
    Route::Search
}

/// Templated clarification naming the missing slot categories.
pub fn clarify_message(ctx: &QueryContext) -> String {
    let mut missing = Vec::new();
    if ctx.slots.industry_sub.is_empty() {
        missing.push("업종 (예: 제조업, 도매업)");
    }
    if ctx.slots.domain_tags.is_empty() {
        missing.push("세무 쟁점 키워드 (예: 매출누락, 가공경비)");
    }
    if ctx.slots.codes.is_empty() {
        missing.push("업종코드 (5자리)");
    }

    let mut message = String::from("질문을 조금 더 구체적으로 입력해 주세요.\n");
    if missing.is_empty() {
        message.push_str("어떤 사례를 찾으시는지 핵심 키워드를 덧붙여 주시면 정확한 검색이 가능합니다.");
    } else {
        message.push_str("다음 정보가 있으면 정확한 사례 검색이 가능합니다:\n");
        for category in missing {
            message.push_str("- ");
            message.push_str(category);
            message.push('\n');
        }
    }
    message
}
