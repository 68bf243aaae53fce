//! In-process mock backends for pipeline tests
//!
//! The lexical mock interprets the same bool-query subset the retrievers
//! emit (must/should clauses, term/terms filters), so tests exercise the
//! real query construction instead of canned responses.

use async_trait::async_trait;
use auditqa_core::backend::{
    Embedder, FilterCondition, LexicalBackend, LexicalHit, LlmClient, VectorBackend, VectorFilter,
    VectorHit,
};
use auditqa_core::error::{AuditQaError, Result};
use auditqa_core::model::{Chunk, Finding, Section};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// ---------------------------------------------------------------------------
// Lexical mock
// ---------------------------------------------------------------------------

pub struct MockLexical {
    pub findings: Vec<Finding>,
    pub chunks: Vec<Chunk>,
    pub fail: AtomicBool,
    pub search_calls: AtomicUsize,
}

impl MockLexical {
    pub fn new(findings: Vec<Finding>, chunks: Vec<Chunk>) -> Self {
        Self {
            findings,
            chunks,
            fail: AtomicBool::new(false),
            search_calls: AtomicUsize::new(0),
        }
    }

    fn docs_for(&self, index: &str) -> Vec<(String, serde_json::Value)> {
        if index == "chunks" {
            self.chunks
                .iter()
                .map(|c| {
                    (
                        c.chunk_id.clone(),
                        serde_json::to_value(c).unwrap_or_default(),
                    )
                })
                .collect()
        } else {
            self.findings
                .iter()
                .map(|f| {
                    (
                        f.finding_id.clone(),
                        serde_json::to_value(f).unwrap_or_default(),
                    )
                })
                .collect()
        }
    }
}

/// All string content of a document, the haystack for term matching
fn doc_text(doc: &serde_json::Value) -> String {
    let mut text = String::new();
    collect_strings(doc, &mut text);
    text
}

fn collect_strings(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Terms of one scored clause (multi_match or match)
fn clause_terms(clause: &serde_json::Value) -> Vec<String> {
    if let Some(query) = clause.pointer("/multi_match/query").and_then(|q| q.as_str()) {
        return query.split_whitespace().map(str::to_string).collect();
    }
    if let Some(fields) = clause.get("match").and_then(|m| m.as_object()) {
        return fields
            .values()
            .filter_map(|v| v.as_str())
            .flat_map(|s| s.split_whitespace())
            .map(str::to_string)
            .collect();
    }
    Vec::new()
}

fn matched_terms(text: &str, terms: &[String]) -> usize {
    terms.iter().filter(|t| text.contains(t.as_str())).count()
}

fn field_values(doc: &serde_json::Value, field: &str) -> Vec<String> {
    match doc.get(field) {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn passes_filter(doc: &serde_json::Value, filter: &serde_json::Value) -> bool {
    if let Some(term) = filter.get("term").and_then(|t| t.as_object()) {
        return term.iter().all(|(field, expected)| {
            expected
                .as_str()
                .map(|e| field_values(doc, field).iter().any(|v| v == e))
                .unwrap_or(false)
        });
    }
    if let Some(terms) = filter.get("terms").and_then(|t| t.as_object()) {
        return terms.iter().all(|(field, expected)| {
            let allowed: Vec<&str> = expected
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            field_values(doc, field).iter().any(|v| allowed.contains(&v.as_str()))
        });
    }
    true
}

/// Score a document against the emitted query subset: every must clause has
/// to match, shoulds add score, filters are strict.
fn score_doc(doc: &serde_json::Value, query: &serde_json::Value) -> Option<f64> {
    let text = doc_text(doc);

    if let Some(bool_query) = query.get("bool") {
        let empty = Vec::new();
        let musts = bool_query
            .get("must")
            .and_then(|m| m.as_array())
            .unwrap_or(&empty);
        let shoulds = bool_query
            .get("should")
            .and_then(|s| s.as_array())
            .unwrap_or(&empty);
        let filters = bool_query
            .get("filter")
            .and_then(|f| f.as_array())
            .unwrap_or(&empty);

        if !filters.iter().all(|f| passes_filter(doc, f)) {
            return None;
        }

        let mut score = 0.0;
        for clause in musts {
            let matched = matched_terms(&text, &clause_terms(clause));
            if matched == 0 {
                return None;
            }
            score += matched as f64;
        }
        for clause in shoulds {
            score += matched_terms(&text, &clause_terms(clause)) as f64 * 0.5;
        }
        return Some(score);
    }

    // Bare multi_match (document prefilter)
    let matched = matched_terms(&text, &clause_terms(query));
    (matched > 0).then_some(matched as f64)
}

#[async_trait]
impl LexicalBackend for MockLexical {
    async fn search(
        &self,
        index: &str,
        query: serde_json::Value,
        size: usize,
    ) -> Result<Vec<LexicalHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditQaError::Lexical("mock lexical down".to_string()));
        }

        let mut hits: Vec<LexicalHit> = self
            .docs_for(index)
            .into_iter()
            .filter_map(|(id, doc)| {
                score_doc(&doc, &query).map(|score| LexicalHit {
                    id,
                    score,
                    source: doc,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(size);
        Ok(hits)
    }

    async fn keyword_counts(
        &self,
        _index: &str,
        doc_ids: &[String],
        keywords: &[String],
        _field: &str,
    ) -> Result<HashMap<String, u64>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditQaError::Lexical("mock lexical down".to_string()));
        }
        let mut counts = HashMap::new();
        for kw in keywords {
            let count = self
                .findings
                .iter()
                .filter(|f| doc_ids.contains(&f.doc_id))
                .filter(|f| format!("{} {}", f.item, f.item_detail).contains(kw.as_str()))
                .count() as u64;
            counts.insert(kw.clone(), count);
        }
        Ok(counts)
    }

    async fn get(&self, _index: &str, id: &str) -> Result<Option<serde_json::Value>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditQaError::Lexical("mock lexical down".to_string()));
        }
        Ok(self
            .chunks
            .iter()
            .find(|c| c.chunk_id == id)
            .map(|c| serde_json::to_value(c).unwrap_or_default()))
    }

    async fn ping(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Vector mock
// ---------------------------------------------------------------------------

pub struct MockVector {
    /// collection → hits in score order
    pub store: HashMap<String, Vec<VectorHit>>,
    pub fail: AtomicBool,
}

impl MockVector {
    pub fn empty() -> Self {
        Self {
            store: HashMap::new(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        Self {
            store: HashMap::new(),
            fail: AtomicBool::new(true),
        }
    }
}

fn payload_matches(payload: &serde_json::Value, condition: &FilterCondition) -> bool {
    match condition {
        FilterCondition::Eq(field, value) => payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(|v| v == value)
            .unwrap_or(false),
        FilterCondition::AnyOf(field, values) => payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(|v| values.iter().any(|allowed| allowed == v))
            .unwrap_or(false),
    }
}

#[async_trait]
impl VectorBackend for MockVector {
    async fn search(
        &self,
        collection: &str,
        _vector: Vec<f32>,
        filter: &VectorFilter,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorHit>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditQaError::Vector("mock vector down".to_string()));
        }
        let hits = self
            .store
            .get(collection)
            .map(|hits| {
                hits.iter()
                    .filter(|h| h.score >= f64::from(score_threshold))
                    .filter(|h| {
                        filter
                            .conditions
                            .iter()
                            .all(|c| payload_matches(&h.payload, c))
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// LLM + embedder mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockLlm {
    pub slot_json: Option<String>,
    pub expansion_json: Option<String>,
    pub answer: Option<String>,
    pub fail: AtomicBool,
}

impl MockLlm {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, prompt: &str, _json_format: bool) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditQaError::Llm("mock llm down".to_string()));
        }
        if prompt.contains("슬롯") {
            return Ok(self
                .slot_json
                .clone()
                .unwrap_or_else(|| r#"{"industry_sub": [], "domain_tags": [], "code": [], "entities": [], "section_hints": {}}"#.to_string()));
        }
        if prompt.contains("키워드를 설계") {
            return Ok(self.expansion_json.clone().unwrap_or_else(|| {
                r#"{"must_have": [], "should_have": [], "related_terms": [], "boost_weights": {}}"#
                    .to_string()
            }));
        }
        Ok(self
            .answer
            .clone()
            .unwrap_or_else(|| "## Block 1\n요약 답변 [D1:1:1-2]".to_string()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

pub struct MockEmbedder {
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.1, 0.2, 0.3, 0.4])
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn finding(finding_id: &str, doc_id: &str, item: &str, detail: &str) -> Finding {
    Finding {
        finding_id: finding_id.to_string(),
        doc_id: doc_id.to_string(),
        item: item.to_string(),
        item_detail: detail.to_string(),
        code: Some("28112".to_string()),
        industry_sub: Some("제조업".to_string()),
        domain_tags: vec!["매출누락".to_string()],
    }
}

pub fn chunk(
    chunk_id: &str,
    finding_id: &str,
    doc_id: &str,
    section: Section,
    order: u32,
    text: &str,
) -> Chunk {
    Chunk {
        chunk_id: chunk_id.to_string(),
        finding_id: finding_id.to_string(),
        doc_id: doc_id.to_string(),
        section: Some(section),
        section_order: 1,
        chunk_order: order,
        page: Some(3),
        start_line: Some(order * 10),
        end_line: Some(order * 10 + 8),
        text: text.to_string(),
    }
}

/// Two manufacturing documents, four findings, both sections populated.
pub fn manufacturing_corpus() -> (Vec<Finding>, Vec<Chunk>) {
    let findings = vec![
        finding("F1", "D1", "제조업 매출누락", "제조업 법인의 현금 매출누락, 부가가치세 과소신고"),
        finding("F2", "D1", "제조업 가공경비", "제조업 법인의 매출누락 및 가공경비 계상"),
        finding("F3", "D2", "제조업 매출누락", "제조업 수출 매출누락, 부가가치세 환급 부당"),
        finding("F4", "D2", "제조업 재고누락", "제조업 재고자산 매출누락 추정"),
    ];
    let mut chunks = Vec::new();
    for f in &findings {
        chunks.push(chunk(
            &format!("{}-find-1", f.finding_id),
            &f.finding_id,
            &f.doc_id,
            Section::InvestigationFindings,
            1,
            &format!("{} 조사 결과: {} 금액을 적출하였다", f.item, f.item_detail),
        ));
        chunks.push(chunk(
            &format!("{}-tech-1", f.finding_id),
            &f.finding_id,
            &f.doc_id,
            Section::InvestigationTechnique,
            1,
            "거래처 금융계좌 추적으로 현금 매출누락 흐름을 확인하는 조사기법",
        ));
    }
    (findings, chunks)
}

/// Canned LLM slots/expansion for the multi-keyword manufacturing query.
pub fn manufacturing_llm() -> MockLlm {
    MockLlm {
        slot_json: Some(
            r#"{"industry_sub": ["제조업"], "domain_tags": ["매출누락"], "code": [], "entities": [], "section_hints": {}}"#
                .to_string(),
        ),
        expansion_json: Some(
            r#"{"must_have": ["제조업", "매출누락"], "should_have": ["현금매출"], "related_terms": ["무자료매출"], "boost_weights": {"제조업": 3.0, "매출누락": 2.5}}"#
                .to_string(),
        ),
        answer: Some("## Block 1\n제조업 매출누락 사례 [D1:3:10-18]".to_string()),
        fail: AtomicBool::new(false),
    }
}
