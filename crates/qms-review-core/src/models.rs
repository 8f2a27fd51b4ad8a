//! Core data models shared by the ingestion, retrieval, and review paths.
//!
//! The JSON shapes of [`Verdict`] and [`SynthesisResult`] are the contract
//! with the language model: camelCase keys and upper-case enum values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bounded, section-tagged segment of a source document.
///
/// Offsets are absolute character (Unicode scalar) positions in the source
/// text; `[start_offset, end_offset)` is the window the chunk was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_header: Option<String>,
}

/// A single ranked result of [`RetrievalStore::search`](crate::store::RetrievalStore::search).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_header: Option<String>,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Snapshot returned by [`RetrievalStore::status`](crate::store::RetrievalStore::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub initialized: bool,
    pub count: usize,
    pub capacity: usize,
    pub target_watermark: usize,
}

/// A reviewer's classification of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Pass,
    Warning,
    Block,
    NeedsInfo,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Pass => "PASS",
            VerdictKind::Warning => "WARNING",
            VerdictKind::Block => "BLOCK",
            VerdictKind::NeedsInfo => "NEEDS_INFO",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output of one reviewer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub missing_info: Vec<String>,
    #[serde(default)]
    pub referenced_sections: Vec<String>,
}

impl Verdict {
    /// The conservative verdict returned whenever a reviewer cannot produce
    /// a usable answer.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            verdict: VerdictKind::NeedsInfo,
            findings: vec![reason.into()],
            recommendations: vec!["manual review required".to_string()],
            missing_info: Vec::new(),
            referenced_sections: Vec::new(),
        }
    }
}

/// Aggregate decision for a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalVerdict {
    Approved,
    Rejected,
    NeedsReview,
}

impl FinalVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalVerdict::Approved => "APPROVED",
            FinalVerdict::Rejected => "REJECTED",
            FinalVerdict::NeedsReview => "NEEDS_REVIEW",
        }
    }
}

impl fmt::Display for FinalVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the synthesis step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisResult {
    pub final_verdict: FinalVerdict,
    pub summary: String,
    pub required_documents: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
}

/// Participant in the review audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    Coordinator,
    Regulatory,
    Quality,
    Engineering,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "COORDINATOR",
            AgentRole::Regulatory => "REGULATORY",
            AgentRole::Quality => "QUALITY",
            AgentRole::Engineering => "ENGINEERING",
        }
    }

    /// Stable lower-case identifier used as `agent_id` in messages.
    pub fn agent_id(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Regulatory => "regulatory",
            AgentRole::Quality => "quality",
            AgentRole::Engineering => "engineering",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only review log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMessage {
    pub agent_id: String,
    pub role: AgentRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verdict: Option<VerdictKind>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_kind_wire_names() {
        let json = serde_json::to_string(&VerdictKind::NeedsInfo).unwrap();
        assert_eq!(json, "\"NEEDS_INFO\"");
        let back: VerdictKind = serde_json::from_str("\"BLOCK\"").unwrap();
        assert_eq!(back, VerdictKind::Block);
    }

    #[test]
    fn test_fallback_verdict_shape() {
        let v = Verdict::fallback("model call timed out");
        assert_eq!(v.verdict, VerdictKind::NeedsInfo);
        assert_eq!(v.findings, vec!["model call timed out".to_string()]);
        assert_eq!(v.recommendations, vec!["manual review required".to_string()]);
        assert!(v.missing_info.is_empty());
        assert!(v.referenced_sections.is_empty());
    }

    #[test]
    fn test_verdict_optional_lists_default() {
        let v: Verdict = serde_json::from_str(
            r#"{"verdict":"PASS","findings":[],"recommendations":["ship it"]}"#,
        )
        .unwrap();
        assert!(v.missing_info.is_empty());
        assert_eq!(v.recommendations.len(), 1);
    }
}
