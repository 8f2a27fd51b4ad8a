//! Role-specific expert reviewers.
//!
//! An [`ExpertReviewer`] pairs a [`Discipline`] rubric with the shared
//! [`RetrievalStore`] and a [`LanguageModel`]. Every failure on the way
//! (retrieval, timeout, transport, unusable output) is absorbed into
//! [`Verdict::fallback`], so [`ExpertReviewer::analyze`] cannot fail.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use qms_review_core::llm::LanguageModel;
use qms_review_core::models::{AgentRole, Verdict};
use qms_review_core::response::parse_verdict;
use qms_review_core::{ModelError, RetrievalStore};

use crate::llm::invoke_with_timeout;

/// Passages retrieved per review when not configured otherwise.
pub const DEFAULT_CONTEXT_PASSAGES: usize = 3;

const UNPARSABLE_RESPONSE: &str = "model response could not be parsed";

const VERDICT_INSTRUCTIONS: &str = r#"After your analysis, answer ONLY with a JSON object in exactly this format:
{
  "verdict": "PASS" | "WARNING" | "BLOCK" | "NEEDS_INFO",
  "findings": ["finding 1", "finding 2"],
  "recommendations": ["recommendation 1", "recommendation 2"],
  "missingInfo": ["additional information needed, if any"],
  "referencedSections": ["procedure sections you relied on"]
}"#;

const REGULATORY_RUBRIC: &str = r#"You are a medical device Regulatory Affairs (RA) specialist with deep knowledge of MFDS (Korean Ministry of Food and Drug Safety) regulations.
The product targets Class I medical device status or the non-medical wellness category.

[Review scope]
1. Wellness boundary:
   - The words "diagnosis", "prescription" and "treatment" must not be used
   - The device must not decide whether a disease is present
   - Health monitoring and lifestyle guidance are allowed
2. Classification upgrade risk:
   - Real-time vital sign monitoring combined with danger alarms means Class II or higher
   - Applying energy to the body or invasive measurement raises the class
   - Detect features that fall outside the approved scope
3. Change notification or approval:
   - Check whether the change stays within the current registration
   - Decide whether a change approval is required

[Verdict criteria]
- PASS: within the current approval scope, no regulatory risk
- WARNING: wording changes or feature limits recommended
- BLOCK: classification upgrade or medical practice; cannot proceed
- NEEDS_INFO: more information needed for a regulatory decision"#;

const QUALITY_RUBRIC: &str = r#"You are a Quality Assurance (QA) specialist for a medical device quality management system.
Review the change from a quality perspective according to ISO 13485 and MFDS GMP.

[Review scope]
1. Documentation completeness: are all required records and forms present?
2. Process compliance: does the change follow the established procedures (SOPs)?
3. Traceability: can inputs be traced to outputs?
4. Risk management: has risk assessment been performed adequately?
5. Verification and validation: is a V&V plan in place?

[Verdict criteria]
- PASS: quality requirements met
- WARNING: minor nonconformity or improvement recommended
- BLOCK: major quality issue; cannot proceed
- NEEDS_INFO: more information needed to decide"#;

const ENGINEERING_RUBRIC: &str = r#"You are the technical lead of a medical device software development team.
Review the change from a technical perspective according to IEC 62304 (medical device software life cycle).

[Review scope]
1. Technical feasibility: can the proposed change be implemented?
2. Architectural impact: how does it affect the existing system structure?
3. Dependencies: does it affect other modules or features?
4. Implementation complexity: expected effort and difficulty
5. Test impact: do existing test cases need to change?

[Verdict criteria]
- PASS: no technical problems
- WARNING: technical risks that need attention
- BLOCK: serious technical problems; redesign required
- NEEDS_INFO: technical specifications or design documents needed"#;

/// The three review axes. Each has a fixed rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    Regulatory,
    Quality,
    Engineering,
}

impl Discipline {
    pub const ALL: [Discipline; 3] = [
        Discipline::Regulatory,
        Discipline::Quality,
        Discipline::Engineering,
    ];

    pub fn role(&self) -> AgentRole {
        match self {
            Discipline::Regulatory => AgentRole::Regulatory,
            Discipline::Quality => AgentRole::Quality,
            Discipline::Engineering => AgentRole::Engineering,
        }
    }

    pub fn rubric(&self) -> &'static str {
        match self {
            Discipline::Regulatory => REGULATORY_RUBRIC,
            Discipline::Quality => QUALITY_RUBRIC,
            Discipline::Engineering => ENGINEERING_RUBRIC,
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role().as_str())
    }
}

/// A verdict plus what happened to the model call behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    /// Set when the model call itself failed (as opposed to answering
    /// with unusable output).
    pub model_error: Option<ModelError>,
}

impl Assessment {
    pub fn backend_unreachable(&self) -> bool {
        self.model_error
            .as_ref()
            .is_some_and(ModelError::is_unreachable)
    }
}

pub struct ExpertReviewer {
    discipline: Discipline,
    store: Arc<RetrievalStore>,
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    context_passages: usize,
}

impl ExpertReviewer {
    pub fn new(
        discipline: Discipline,
        store: Arc<RetrievalStore>,
        model: Arc<dyn LanguageModel>,
        timeout: Duration,
    ) -> Self {
        Self {
            discipline,
            store,
            model,
            timeout,
            context_passages: DEFAULT_CONTEXT_PASSAGES,
        }
    }

    pub fn with_context_passages(mut self, passages: usize) -> Self {
        self.context_passages = passages.max(1);
        self
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Review `description` and return a schema-valid verdict.
    pub async fn analyze(&self, description: &str, extra_context: Option<&str>) -> Verdict {
        self.assess(description, extra_context).await.verdict
    }

    /// Like [`analyze`](Self::analyze), also reporting whether the model
    /// call failed.
    pub async fn assess(&self, description: &str, extra_context: Option<&str>) -> Assessment {
        let role = self.discipline.role();
        let context = self.procedure_context(description).await;
        let system = build_system_prompt(self.discipline.rubric(), &context, extra_context);
        let user = format!("[Analysis request]\n{}", description);

        info!(role = %role, model = self.model.model_name(), "starting analysis");

        let raw = match invoke_with_timeout(self.model.as_ref(), &system, &user, self.timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(role = %role, error = %e, "analysis failed, using fallback verdict");
                return Assessment {
                    verdict: Verdict::fallback(format!("analysis failed: {}", e)),
                    model_error: Some(e),
                };
            }
        };

        let verdict = match parse_verdict(&raw) {
            Ok(verdict) => {
                info!(role = %role, verdict = %verdict.verdict, "analysis complete");
                verdict
            }
            Err(e) => {
                warn!(role = %role, error = %e, "unusable verdict, using fallback");
                Verdict::fallback(UNPARSABLE_RESPONSE)
            }
        };

        Assessment {
            verdict,
            model_error: None,
        }
    }

    /// Supporting passages for this role, or an empty string when the
    /// store cannot answer.
    async fn procedure_context(&self, description: &str) -> String {
        let query = format!("{} {}", self.discipline, description);
        match self
            .store
            .search_with_context(&query, self.context_passages)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!(role = %self.discipline, error = %e, "procedure search failed");
                String::new()
            }
        }
    }
}

fn build_system_prompt(rubric: &str, context: &str, extra_context: Option<&str>) -> String {
    let mut prompt = String::with_capacity(rubric.len() + context.len() + 512);
    prompt.push_str(rubric);
    prompt.push_str("\n\n");
    if !context.is_empty() {
        prompt.push_str("[Reference procedures]\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }
    if let Some(extra) = extra_context.filter(|e| !e.trim().is_empty()) {
        prompt.push_str("[Additional context]\n");
        prompt.push_str(extra);
        prompt.push_str("\n\n");
    }
    prompt.push_str(VERDICT_INSTRUCTIONS);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qms_review_core::models::VerdictKind;
    use qms_review_core::StoreLimits;
    use std::sync::Mutex;

    use crate::embedding::HashProvider;

    /// Replays a fixed reply and records the prompts it was given.
    struct Scripted {
        reply: Result<String, ModelError>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl Scripted {
        fn new(reply: Result<&str, ModelError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn invoke(&self, system: &str, user: &str, _t: Duration) -> Result<String, ModelError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            self.reply.clone()
        }
    }

    fn empty_store() -> Arc<RetrievalStore> {
        Arc::new(RetrievalStore::new(
            Arc::new(HashProvider::new(64).unwrap()),
            StoreLimits::default(),
        ))
    }

    fn reviewer(model: Arc<Scripted>, store: Arc<RetrievalStore>) -> ExpertReviewer {
        ExpertReviewer::new(Discipline::Regulatory, store, model, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_parses_wrapped_verdict() {
        let model = Scripted::new(Ok(
            "Here is my review:\n{\"verdict\":\"WARNING\",\"findings\":[\"uses the word diagnosis\"],\"recommendations\":[\"reword\"]}",
        ));
        let store = empty_store();
        store.initialize();
        let v = reviewer(model, store).analyze("new alarm screen", None).await;
        assert_eq!(v.verdict, VerdictKind::Warning);
        assert_eq!(v.recommendations, vec!["reword".to_string()]);
    }

    #[tokio::test]
    async fn test_garbage_output_falls_back() {
        let model = Scripted::new(Ok("I think this is fine."));
        let store = empty_store();
        store.initialize();
        let a = reviewer(model, store).assess("x", None).await;
        assert_eq!(a.verdict, Verdict::fallback(UNPARSABLE_RESPONSE));
        assert!(a.model_error.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_falls_back_and_is_reported() {
        let model = Scripted::new(Err(ModelError::Unreachable("connection refused".into())));
        let a = reviewer(model, empty_store()).assess("x", None).await;
        assert_eq!(a.verdict.verdict, VerdictKind::NeedsInfo);
        assert!(a.verdict.findings[0].starts_with("analysis failed"));
        assert_eq!(a.verdict.recommendations, vec!["manual review required".to_string()]);
        assert!(a.backend_unreachable());
    }

    #[tokio::test]
    async fn test_uninitialized_store_does_not_block_review() {
        let model = Scripted::new(Ok(
            r#"{"verdict":"PASS","findings":[],"recommendations":[]}"#,
        ));
        let v = reviewer(model.clone(), empty_store()).analyze("x", None).await;
        assert_eq!(v.verdict, VerdictKind::Pass);
        let prompts = model.prompts.lock().unwrap();
        assert!(!prompts[0].0.contains("[Reference procedures]"));
    }

    #[tokio::test]
    async fn test_prompt_carries_rubric_context_and_request() {
        let store = empty_store();
        store
            .add_chunks(&qms_review_core::chunk::chunk_document(
                "# Labeling\nWellness products must not claim diagnosis.",
                "sop-labeling.md",
                &Default::default(),
            )
            .unwrap())
            .await
            .unwrap();
        let model = Scripted::new(Ok(
            r#"{"verdict":"PASS","findings":[],"recommendations":[]}"#,
        ));
        reviewer(model.clone(), store)
            .analyze("rename the sleep score", Some("release 2.3"))
            .await;

        let prompts = model.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.starts_with(REGULATORY_RUBRIC));
        assert!(system.contains("[Reference procedures]"));
        assert!(system.contains("(source: sop-labeling.md)"));
        assert!(system.contains("[Additional context]\nrelease 2.3"));
        assert!(system.ends_with(VERDICT_INSTRUCTIONS));
        assert_eq!(user, "[Analysis request]\nrename the sleep score");
    }

    #[test]
    fn test_disciplines_map_to_roles() {
        assert_eq!(Discipline::Quality.role(), AgentRole::Quality);
        assert_eq!(Discipline::Engineering.to_string(), "ENGINEERING");
        assert!(Discipline::Quality.rubric().contains("ISO 13485"));
        assert!(Discipline::Engineering.rubric().contains("IEC 62304"));
    }
}
