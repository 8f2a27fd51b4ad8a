//! Review state machine.
//!
//! ```text
//! INITIATED → REGULATORY_REVIEW → QUALITY_REVIEW → ENGINEERING_REVIEW → SYNTHESIS → COMPLETED
//!                    │                                                      │
//!                    └──────────────────────► BLOCKED ◄─────────────────────┘
//! ```
//!
//! A [`ReviewState`] only moves forward along these edges. The
//! `REGULATORY_REVIEW → BLOCKED` edge is the regulatory short-circuit.
//! Once the phase is `COMPLETED` or `BLOCKED` every mutator returns
//! [`TransitionError::Finished`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransitionError;
use crate::models::{AgentRole, FinalVerdict, ReviewMessage, SynthesisResult, Verdict, VerdictKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewPhase {
    Initiated,
    RegulatoryReview,
    QualityReview,
    EngineeringReview,
    Synthesis,
    Completed,
    Blocked,
}

impl ReviewPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewPhase::Initiated => "INITIATED",
            ReviewPhase::RegulatoryReview => "REGULATORY_REVIEW",
            ReviewPhase::QualityReview => "QUALITY_REVIEW",
            ReviewPhase::EngineeringReview => "ENGINEERING_REVIEW",
            ReviewPhase::Synthesis => "SYNTHESIS",
            ReviewPhase::Completed => "COMPLETED",
            ReviewPhase::Blocked => "BLOCKED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewPhase::Completed | ReviewPhase::Blocked)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_advance_to(&self, next: ReviewPhase) -> bool {
        use ReviewPhase::*;
        matches!(
            (self, next),
            (Initiated, RegulatoryReview)
                | (RegulatoryReview, QualityReview)
                | (RegulatoryReview, Blocked)
                | (QualityReview, EngineeringReview)
                | (EngineeringReview, Synthesis)
                | (Synthesis, Completed)
                | (Synthesis, Blocked)
        )
    }

    /// The phase during which `role` reviews, if it is a reviewer.
    pub fn for_reviewer(role: AgentRole) -> Option<ReviewPhase> {
        match role {
            AgentRole::Regulatory => Some(ReviewPhase::RegulatoryReview),
            AgentRole::Quality => Some(ReviewPhase::QualityReview),
            AgentRole::Engineering => Some(ReviewPhase::EngineeringReview),
            AgentRole::Coordinator => None,
        }
    }
}

impl fmt::Display for ReviewPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request review record, owned by one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    request_id: String,
    description: String,
    phase: ReviewPhase,
    messages: Vec<ReviewMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    regulatory_verdict: Option<VerdictKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quality_verdict: Option<VerdictKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    engineering_verdict: Option<VerdictKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_verdict: Option<FinalVerdict>,
    #[serde(default)]
    required_documents: Vec<String>,
    #[serde(default)]
    missing_info: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReviewState {
    /// A fresh `INITIATED` state with a random request id.
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_request_id(Uuid::new_v4().to_string(), description)
    }

    pub fn with_request_id(request_id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            description: description.into(),
            phase: ReviewPhase::Initiated,
            messages: Vec::new(),
            regulatory_verdict: None,
            quality_verdict: None,
            engineering_verdict: None,
            final_verdict: None,
            required_documents: Vec::new(),
            missing_info: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn phase(&self) -> ReviewPhase {
        self.phase
    }

    pub fn messages(&self) -> &[ReviewMessage] {
        &self.messages
    }

    pub fn regulatory_verdict(&self) -> Option<VerdictKind> {
        self.regulatory_verdict
    }

    pub fn quality_verdict(&self) -> Option<VerdictKind> {
        self.quality_verdict
    }

    pub fn engineering_verdict(&self) -> Option<VerdictKind> {
        self.engineering_verdict
    }

    pub fn final_verdict(&self) -> Option<FinalVerdict> {
        self.final_verdict
    }

    pub fn required_documents(&self) -> &[String] {
        &self.required_documents
    }

    pub fn missing_info(&self) -> &[String] {
        &self.missing_info
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move to `next` along a legal edge.
    pub fn advance(&mut self, next: ReviewPhase) -> Result<(), TransitionError> {
        self.ensure_open()?;
        if !self.phase.can_advance_to(next) {
            return Err(TransitionError::Illegal {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.touch();
        Ok(())
    }

    /// Append a message to the audit log.
    pub fn push_message(
        &mut self,
        role: AgentRole,
        content: impl Into<String>,
        verdict: Option<VerdictKind>,
    ) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let now = Utc::now();
        self.messages.push(ReviewMessage {
            agent_id: role.agent_id().to_string(),
            role,
            content: content.into(),
            verdict,
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Record a reviewer's verdict: append its message, store the verdict
    /// kind, and accumulate its missing information.
    ///
    /// Only allowed while the state is in that reviewer's phase.
    pub fn record_review(&mut self, role: AgentRole, verdict: &Verdict) -> Result<(), TransitionError> {
        self.ensure_open()?;
        if ReviewPhase::for_reviewer(role) != Some(self.phase) {
            return Err(TransitionError::OutOfPhase {
                role,
                phase: self.phase,
            });
        }

        self.push_message(role, render_verdict(verdict), Some(verdict.verdict))?;
        match role {
            AgentRole::Regulatory => self.regulatory_verdict = Some(verdict.verdict),
            AgentRole::Quality => self.quality_verdict = Some(verdict.verdict),
            AgentRole::Engineering => self.engineering_verdict = Some(verdict.verdict),
            AgentRole::Coordinator => {}
        }
        self.missing_info.extend(verdict.missing_info.iter().cloned());
        Ok(())
    }

    /// Take the regulatory short-circuit: `REGULATORY_REVIEW → BLOCKED`
    /// with a `REJECTED` decision. No message is appended.
    pub fn short_circuit(&mut self) -> Result<(), TransitionError> {
        self.ensure_open()?;
        if self.phase != ReviewPhase::RegulatoryReview {
            return Err(TransitionError::Illegal {
                from: self.phase,
                to: ReviewPhase::Blocked,
            });
        }
        self.final_verdict = Some(FinalVerdict::Rejected);
        self.advance(ReviewPhase::Blocked)
    }

    /// Apply the synthesis decision from `SYNTHESIS`: record the final
    /// verdict and required documents, append the closing coordinator
    /// message, and finish in `BLOCKED` (rejected) or `COMPLETED`.
    pub fn conclude(&mut self, synthesis: &SynthesisResult) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let next = match synthesis.final_verdict {
            FinalVerdict::Rejected => ReviewPhase::Blocked,
            FinalVerdict::Approved | FinalVerdict::NeedsReview => ReviewPhase::Completed,
        };
        if !self.phase.can_advance_to(next) || self.phase != ReviewPhase::Synthesis {
            return Err(TransitionError::Illegal {
                from: self.phase,
                to: next,
            });
        }

        self.final_verdict = Some(synthesis.final_verdict);
        self.required_documents = synthesis.required_documents.clone();
        self.push_message(
            AgentRole::Coordinator,
            format!("Final verdict: {}\n{}", synthesis.final_verdict, synthesis.summary),
            None,
        )?;
        self.advance(next)
    }

    fn ensure_open(&self) -> Result<(), TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError::Finished(self.phase));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Message body for a reviewer's entry in the audit log.
pub fn render_verdict(verdict: &Verdict) -> String {
    format!(
        "Verdict: {}\nFindings: {}\nRecommendations: {}",
        verdict.verdict,
        verdict.findings.join(", "),
        verdict.recommendations.join(", ")
    )
}
