//! Review orchestration.
//!
//! [`ReviewOrchestrator::process_design_change`] runs one request through
//! the phase sequence of [`ReviewState`]:
//!
//! 1. intake message from the coordinator
//! 2. regulatory review; a `BLOCK` ends the request as `REJECTED`
//! 3. quality review (a `BLOCK` here does not stop the pipeline)
//! 4. engineering review
//! 5. synthesis by the model, or [`fallback_synthesis`] when its answer is
//!    unusable
//!
//! Calls are strictly sequential within a request. Independent requests
//! may run concurrently against the same orchestrator; they share only the
//! retrieval store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use qms_review_core::llm::LanguageModel;
use qms_review_core::models::{AgentRole, FinalVerdict, SynthesisResult, Verdict, VerdictKind};
use qms_review_core::response::parse_synthesis;
use qms_review_core::state::{ReviewPhase, ReviewState};
use qms_review_core::{RetrievalStore, ReviewError};

use crate::config::Config;
use crate::llm::{create_model, invoke_with_timeout};
use crate::reviewer::{Assessment, Discipline, ExpertReviewer};

/// Summary used when the regulatory reviewer blocks the change.
pub const REGULATORY_BLOCK_SUMMARY: &str =
    "Regulatory review found a violation; the change cannot proceed.";

const FALLBACK_SUMMARY: &str = "Automatic decision (synthesis response was unusable)";
const FALLBACK_REQUIRED_DOCUMENTS: [&str; 2] = ["design change request", "risk analysis"];
const FALLBACK_NEXT_STEP: &str = "detailed review, then prepare the documentation";

const SYNTHESIS_INSTRUCTIONS: &str = r#"[Decision criteria]
- APPROVED: every expert returned PASS or only minor WARNINGs
- NEEDS_REVIEW: WARNINGs require further review or changes
- REJECTED: at least one BLOCK or a serious problem

Answer in JSON:
{
  "finalVerdict": "APPROVED" | "REJECTED" | "NEEDS_REVIEW",
  "summary": "reason for the overall decision",
  "requiredDocuments": ["documents that must be prepared"],
  "nextSteps": ["next steps"],
  "blockers": ["reasons the change cannot proceed, if any"]
}"#;

/// Result of a review request.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub state: ReviewState,
    pub synthesis: Option<SynthesisResult>,
}

pub struct ReviewOrchestrator {
    regulatory: ExpertReviewer,
    quality: ExpertReviewer,
    engineering: ExpertReviewer,
    synthesizer: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ReviewOrchestrator {
    /// All three reviewers share `reviewer_model`.
    pub fn new(
        store: Arc<RetrievalStore>,
        reviewer_model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn LanguageModel>,
        timeout: Duration,
    ) -> Self {
        let reviewer = |d| ExpertReviewer::new(d, store.clone(), reviewer_model.clone(), timeout);
        Self {
            regulatory: reviewer(Discipline::Regulatory),
            quality: reviewer(Discipline::Quality),
            engineering: reviewer(Discipline::Engineering),
            synthesizer,
            timeout,
        }
    }

    /// Assemble from individually built reviewers.
    pub fn from_parts(
        regulatory: ExpertReviewer,
        quality: ExpertReviewer,
        engineering: ExpertReviewer,
        synthesizer: Arc<dyn LanguageModel>,
        timeout: Duration,
    ) -> Self {
        Self {
            regulatory,
            quality,
            engineering,
            synthesizer,
            timeout,
        }
    }

    /// Build models and reviewers from the `[model]` and `[retrieval]`
    /// sections.
    pub fn from_config(config: &Config, store: Arc<RetrievalStore>) -> Result<Self> {
        let reviewer_model = create_model(&config.model, config.model.temperature)?;
        let synthesizer = create_model(&config.model, config.model.synthesis_temperature)?;
        let timeout = config.model.timeout();
        let passages = config.retrieval.context_passages;
        let reviewer = |d| {
            ExpertReviewer::new(d, store.clone(), reviewer_model.clone(), timeout)
                .with_context_passages(passages)
        };
        Ok(Self::from_parts(
            reviewer(Discipline::Regulatory),
            reviewer(Discipline::Quality),
            reviewer(Discipline::Engineering),
            synthesizer,
            timeout,
        ))
    }

    /// Run the full review of one design change.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Infrastructure`] only when every model call of this
    /// request found the backend unreachable. Reviewer and synthesis
    /// failures otherwise degrade to fallbacks.
    pub async fn process_design_change(&self, description: &str) -> Result<ReviewOutcome, ReviewError> {
        let mut state = ReviewState::new(description);
        let request_id = state.request_id().to_string();
        info!(request_id = %request_id, "starting design change review");

        state.push_message(
            AgentRole::Coordinator,
            format!("Design change request received: {}", description),
            None,
        )?;
        let mut calls = CallTally::default();

        // Regulatory gate
        state.advance(ReviewPhase::RegulatoryReview)?;
        let regulatory = self.run_reviewer(&self.regulatory, &mut state, &mut calls).await?;
        if regulatory.verdict == VerdictKind::Block {
            state.short_circuit()?;
            warn!(request_id = %request_id, "regulatory review blocked the change");
            let synthesis = SynthesisResult {
                final_verdict: FinalVerdict::Rejected,
                summary: REGULATORY_BLOCK_SUMMARY.to_string(),
                required_documents: Vec::new(),
                next_steps: regulatory.recommendations,
                blockers: regulatory.findings,
            };
            return Ok(ReviewOutcome {
                state,
                synthesis: Some(synthesis),
            });
        }

        state.advance(ReviewPhase::QualityReview)?;
        let quality = self.run_reviewer(&self.quality, &mut state, &mut calls).await?;

        state.advance(ReviewPhase::EngineeringReview)?;
        let engineering = self.run_reviewer(&self.engineering, &mut state, &mut calls).await?;

        state.advance(ReviewPhase::Synthesis)?;
        let synthesis = match self
            .synthesize(description, [&regulatory, &quality, &engineering])
            .await
        {
            SynthesisCall::Parsed(result) => {
                calls.answered();
                result
            }
            SynthesisCall::Unusable => {
                calls.answered();
                fallback_synthesis([&regulatory, &quality, &engineering])
            }
            SynthesisCall::Failed(e) => {
                calls.failed(e.is_unreachable());
                if calls.all_unreachable() {
                    error!(request_id = %request_id, error = %e, "model backend unreachable for every call");
                    return Err(ReviewError::Infrastructure {
                        message: e.to_string(),
                        state: Box::new(state),
                    });
                }
                fallback_synthesis([&regulatory, &quality, &engineering])
            }
        };

        state.conclude(&synthesis)?;
        info!(
            request_id = %request_id,
            final_verdict = %synthesis.final_verdict,
            phase = %state.phase(),
            "design change review finished"
        );

        Ok(ReviewOutcome {
            state,
            synthesis: Some(synthesis),
        })
    }

    async fn run_reviewer(
        &self,
        reviewer: &ExpertReviewer,
        state: &mut ReviewState,
        calls: &mut CallTally,
    ) -> Result<Verdict, ReviewError> {
        let Assessment {
            verdict,
            model_error,
        } = reviewer.assess(state.description(), None).await;
        match &model_error {
            Some(e) => calls.failed(e.is_unreachable()),
            None => calls.answered(),
        }
        state.record_review(reviewer.discipline().role(), &verdict)?;
        Ok(verdict)
    }

    async fn synthesize(&self, description: &str, verdicts: [&Verdict; 3]) -> SynthesisCall {
        let system = build_synthesis_prompt(verdicts);
        let user = format!("Design change: {}", description);

        match invoke_with_timeout(self.synthesizer.as_ref(), &system, &user, self.timeout).await {
            Ok(raw) => match parse_synthesis(&raw) {
                Ok(result) => SynthesisCall::Parsed(result),
                Err(e) => {
                    warn!(error = %e, "unusable synthesis response, using fallback");
                    SynthesisCall::Unusable
                }
            },
            Err(e) => {
                warn!(error = %e, "synthesis call failed, using fallback");
                SynthesisCall::Failed(e)
            }
        }
    }
}

enum SynthesisCall {
    Parsed(SynthesisResult),
    Unusable,
    Failed(qms_review_core::ModelError),
}

/// Model calls made for one request and how many found the backend down.
#[derive(Default)]
struct CallTally {
    total: usize,
    unreachable: usize,
}

impl CallTally {
    fn answered(&mut self) {
        self.total += 1;
    }

    fn failed(&mut self, unreachable: bool) {
        self.total += 1;
        if unreachable {
            self.unreachable += 1;
        }
    }

    fn all_unreachable(&self) -> bool {
        self.total > 0 && self.unreachable == self.total
    }
}

/// Deterministic decision used when the synthesis answer is unusable.
///
/// `REJECTED` if any verdict is `BLOCK`, else `NEEDS_REVIEW` if any is
/// `WARNING` or `NEEDS_INFO`, else `APPROVED`. Verdicts are in regulatory,
/// quality, engineering order.
pub fn fallback_synthesis(verdicts: [&Verdict; 3]) -> SynthesisResult {
    let kinds = verdicts.map(|v| v.verdict);
    let blocked = kinds.contains(&VerdictKind::Block);
    let final_verdict = if blocked {
        FinalVerdict::Rejected
    } else if kinds
        .iter()
        .any(|k| matches!(k, VerdictKind::Warning | VerdictKind::NeedsInfo))
    {
        FinalVerdict::NeedsReview
    } else {
        FinalVerdict::Approved
    };

    let blockers = if blocked {
        Discipline::ALL
            .iter()
            .zip(kinds)
            .filter(|(_, kind)| *kind == VerdictKind::Block)
            .map(|(d, _)| format!("{} review returned BLOCK", d))
            .collect()
    } else {
        Vec::new()
    };

    SynthesisResult {
        final_verdict,
        summary: FALLBACK_SUMMARY.to_string(),
        required_documents: FALLBACK_REQUIRED_DOCUMENTS
            .iter()
            .map(|d| d.to_string())
            .collect(),
        next_steps: vec![FALLBACK_NEXT_STEP.to_string()],
        blockers,
    }
}

fn build_synthesis_prompt(verdicts: [&Verdict; 3]) -> String {
    let mut prompt = String::from(
        "You make the final decision in a medical device QMS design change process.\n\
         Combine the reviews of the regulatory, quality and engineering experts into one decision.\n\n",
    );
    for (discipline, verdict) in Discipline::ALL.iter().zip(verdicts) {
        prompt.push_str(&format!(
            "[{} review]\nVerdict: {}\nFindings: {}\nRecommendations: {}\n\n",
            discipline,
            verdict.verdict,
            verdict.findings.join(", "),
            verdict.recommendations.join(", ")
        ));
    }
    prompt.push_str(SYNTHESIS_INSTRUCTIONS);
    prompt
}
