//! Domain types shared across the pipeline
//!
//! A query is processed as a single [`QueryContext`] value threaded through
//! the stages; each stage reads the fields written by earlier stages and
//! fills in its own.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Rhetorical section of a chunk within a finding.
///
/// The two primary sections drive retrieval; the two auxiliary sections only
/// influence presentation order in the packed context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    #[serde(rename = "investigation-findings")]
    InvestigationFindings,
    #[serde(rename = "investigation-technique")]
    InvestigationTechnique,
    #[serde(rename = "taxation-logic")]
    TaxationLogic,
    #[serde(rename = "evidence-and-risk")]
    EvidenceAndRisk,
}

impl Section {
    /// Sections that participate in chunk retrieval
    pub const PRIMARY: [Section; 2] = [Section::InvestigationFindings, Section::InvestigationTechnique];

    /// Fixed ordering of sections in the rendered context
    pub const PRESENTATION_ORDER: [Section; 4] = [
        Section::InvestigationTechnique,
        Section::TaxationLogic,
        Section::EvidenceAndRisk,
        Section::InvestigationFindings,
    ];

    /// Wire name of the section as stored in the indices
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::InvestigationFindings => "investigation-findings",
            Section::InvestigationTechnique => "investigation-technique",
            Section::TaxationLogic => "taxation-logic",
            Section::EvidenceAndRisk => "evidence-and-risk",
        }
    }

    /// Parse a wire name back into a section
    pub fn parse(s: &str) -> Option<Section> {
        match s {
            "investigation-findings" => Some(Section::InvestigationFindings),
            "investigation-technique" => Some(Section::InvestigationTechnique),
            "taxation-logic" => Some(Section::TaxationLogic),
            "evidence-and-risk" => Some(Section::EvidenceAndRisk),
            _ => None,
        }
    }

    /// Korean display label used in headers and clarify messages
    pub fn label(&self) -> &'static str {
        match self {
            Section::InvestigationFindings => "적출사항",
            Section::InvestigationTechnique => "조사기법",
            Section::TaxationLogic => "과세논리",
            Section::EvidenceAndRisk => "증빙·위험",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit item within a case document. Read-only to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub finding_id: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub item_detail: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub industry_sub: Option<String>,
    #[serde(default)]
    pub domain_tags: Vec<String>,
}

/// A passage within a finding, tagged by section and carrying citations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub finding_id: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub section: Option<Section>,
    #[serde(default)]
    pub section_order: u32,
    #[serde(default)]
    pub chunk_order: u32,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub text: String,
}

/// Stage-1 output: a finding with its retrieval scores
#[derive(Debug, Clone)]
pub struct FindingHit {
    pub finding: Finding,
    pub score_bm25: f64,
    pub score_vector: f64,
    pub score_combined: f64,
}

/// Stage-2 output: a chunk with its fused score
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub score_combined: f64,
}

/// Stage-3 output: a finding with its selected chunks, one presentation unit
#[derive(Debug, Clone)]
pub struct RankedBlock {
    pub finding_id: String,
    pub doc_id: String,
    pub item: String,
    pub code: Option<String>,
    pub score: f64,
    /// Chunks grouped by the section they came from, retrieval order preserved
    pub sections: BTreeMap<Section, Vec<ChunkHit>>,
    pub source_sections: BTreeSet<Section>,
}

impl RankedBlock {
    /// All chunk texts of this block concatenated, used by the keyword filter
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for chunks in self.sections.values() {
            for hit in chunks {
                out.push_str(&hit.chunk.text);
                out.push('\n');
            }
        }
        out
    }
}

/// A source reference rendered as `[doc_id:page:start-end]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub doc_id: String,
    pub finding_id: String,
    pub page: Option<u32>,
    pub line_range: Option<(u32, u32)>,
}

impl Citation {
    /// Inline tag form of this citation
    pub fn tag(&self) -> String {
        let page = self.page.map_or_else(|| "-".to_string(), |p| p.to_string());
        match self.line_range {
            Some((s, e)) => format!("[{}:{}:{}-{}]", self.doc_id, page, s, e),
            None => format!("[{}:{}:-]", self.doc_id, page),
        }
    }
}

/// Stage-4 output: the rendered prompt context and its citations
#[derive(Debug, Clone, Default)]
pub struct PackedContext {
    pub text: String,
    pub citations: Vec<Citation>,
    pub token_estimate: usize,
}

/// Query intent decided by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intent {
    #[default]
    CaseLookup,
    Explain,
}

/// Structured slots extracted from the query
#[derive(Debug, Clone, Default)]
pub struct Slots {
    pub industry_sub: BTreeSet<String>,
    pub domain_tags: BTreeSet<String>,
    pub codes: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub section_hints: BTreeMap<Section, Vec<String>>,
    pub free_text: String,
    /// Parser confidence in [0, 1]
    pub confidence: f64,
    /// True when the rule-based extractor produced these slots
    pub from_fallback: bool,
}

impl Slots {
    /// True when none of the filterable slot groups carries a value
    pub fn is_empty_meta(&self) -> bool {
        self.industry_sub.is_empty() && self.domain_tags.is_empty() && self.codes.is_empty()
    }
}

/// Keyword expansion for case lookup.
///
/// `must_have` ordering matters: the first entry restricts the candidate
/// document set, the rest filter blocks.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub must_have: Vec<String>,
    pub should_have: Vec<String>,
    pub related_terms: Vec<String>,
    pub boost_weights: HashMap<String, f64>,
}

impl Expansion {
    /// The document-level keyword, when present
    pub fn doc_keyword(&self) -> Option<&str> {
        self.must_have.first().map(String::as_str)
    }

    /// The block-level keywords (everything after the first)
    pub fn block_keywords(&self) -> &[String] {
        if self.must_have.len() > 1 {
            &self.must_have[1..]
        } else {
            &[]
        }
    }

    /// Boost for a keyword, defaulting to the neutral 1.5
    pub fn boost(&self, keyword: &str) -> f64 {
        self.boost_weights.get(keyword).copied().unwrap_or(1.5)
    }
}

/// Routing decision over the parsed query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Clarify,
    Search,
    Explain,
}

/// The single mutable value threaded through the pipeline.
///
/// Created at request entry, mutated only by the currently executing stage,
/// discarded after the answer is returned.
#[derive(Debug, Default)]
pub struct QueryContext {
    pub raw: String,
    pub normalized: String,
    pub intent: Intent,
    pub slots: Slots,
    pub expansion: Option<Expansion>,
    pub route: Option<Route>,

    /// Candidate document set from the prefilter, when active
    pub target_doc_ids: Option<BTreeSet<String>>,
    /// Per-keyword frequencies over the candidate documents
    pub keyword_freq: HashMap<String, u64>,
    /// Both retrieval stores failed; empty results mean outage, not no match
    pub retrieval_unavailable: bool,

    pub finding_hits: Vec<FindingHit>,
    pub section_groups: BTreeMap<Section, Vec<ChunkHit>>,

    pub block_ranking: Vec<RankedBlock>,
    pub excluded_blocks: Vec<RankedBlock>,
    pub keyword_block_counts: BTreeMap<String, u64>,

    pub context: Option<PackedContext>,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl QueryContext {
    /// Start a context for a raw query string
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Default::default()
        }
    }
}
