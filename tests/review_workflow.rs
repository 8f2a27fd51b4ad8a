use async_trait::async_trait;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use qms_review::config::parse_config;
use qms_review::embedding::HashProvider;
use qms_review::history::{JsonlHistory, ReviewSink};
use qms_review::ingest::{build_store, ingest_documents};
use qms_review::orchestrator::{ReviewOrchestrator, REGULATORY_BLOCK_SUMMARY};
use qms_review::reviewer::{Discipline, ExpertReviewer};
use qms_review_core::chunk::{chunk_document, ChunkOptions};
use qms_review_core::llm::LanguageModel;
use qms_review_core::models::{AgentRole, FinalVerdict, VerdictKind};
use qms_review_core::state::ReviewPhase;
use qms_review_core::{ModelError, RetrievalStore, ReviewError, StoreLimits};

const TIMEOUT: Duration = Duration::from_secs(2);

/// A model that always gives the same reply and counts its calls.
struct Scripted {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl Scripted {
    fn answering(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, _system: &str, _user: &str, _timeout: Duration) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(ModelError::Unreachable("connection refused".into())),
        }
    }
}

fn verdict_json(verdict: &str, finding: &str) -> String {
    format!(
        r#"Here is my review:
{{"verdict":"{}","findings":["{}"],"recommendations":["document the change"],"missingInfo":[],"referencedSections":["7.3.9"]}}"#,
        verdict, finding
    )
}

async fn procedure_store() -> Arc<RetrievalStore> {
    let store = Arc::new(RetrievalStore::new(
        Arc::new(HashProvider::new(128).unwrap()),
        StoreLimits::default(),
    ));
    let options = ChunkOptions {
        chunk_size: 200,
        overlap: 40,
        preserve_sections: true,
    };
    let text = "# 7.3.9 Design changes\nDesign changes are identified, reviewed, verified and approved before implementation.\n\n\
                # 7.1 Risk management\nEvery change is assessed against the risk management file.";
    store
        .add_chunks(&chunk_document(text, "sop-design.md", &options).unwrap())
        .await
        .unwrap();
    store.initialize();
    store
}

struct Panel {
    regulatory: Arc<Scripted>,
    quality: Arc<Scripted>,
    engineering: Arc<Scripted>,
    synthesizer: Arc<Scripted>,
}

impl Panel {
    fn orchestrator(&self, store: Arc<RetrievalStore>) -> ReviewOrchestrator {
        let reviewer = |d, m: &Arc<Scripted>| {
            ExpertReviewer::new(d, store.clone(), m.clone() as Arc<dyn LanguageModel>, TIMEOUT)
        };
        ReviewOrchestrator::from_parts(
            reviewer(Discipline::Regulatory, &self.regulatory),
            reviewer(Discipline::Quality, &self.quality),
            reviewer(Discipline::Engineering, &self.engineering),
            self.synthesizer.clone(),
            TIMEOUT,
        )
    }
}

#[tokio::test]
async fn test_regulatory_block_short_circuits() {
    let panel = Panel {
        regulatory: Scripted::answering(verdict_json("BLOCK", "adds a diagnosis claim")),
        quality: Scripted::answering(verdict_json("PASS", "ok")),
        engineering: Scripted::answering(verdict_json("PASS", "ok")),
        synthesizer: Scripted::answering("{}"),
    };
    let outcome = panel
        .orchestrator(procedure_store().await)
        .process_design_change("Show a fever diagnosis on the home screen")
        .await
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.phase(), ReviewPhase::Blocked);
    assert_eq!(state.final_verdict(), Some(FinalVerdict::Rejected));
    assert_eq!(state.regulatory_verdict(), Some(VerdictKind::Block));
    assert_eq!(state.quality_verdict(), None);
    assert_eq!(state.engineering_verdict(), None);

    assert_eq!(state.messages().len(), 2);
    assert_eq!(state.messages()[0].role, AgentRole::Coordinator);
    assert_eq!(state.messages()[1].role, AgentRole::Regulatory);
    assert_eq!(state.messages()[1].verdict, Some(VerdictKind::Block));

    assert_eq!(panel.quality.calls(), 0);
    assert_eq!(panel.engineering.calls(), 0);
    assert_eq!(panel.synthesizer.calls(), 0);

    let synthesis = outcome.synthesis.unwrap();
    assert_eq!(synthesis.summary, REGULATORY_BLOCK_SUMMARY);
    assert_eq!(synthesis.blockers, vec!["adds a diagnosis claim".to_string()]);
}

#[tokio::test]
async fn test_all_pass_with_synthesis_down_is_approved_by_fallback() {
    let panel = Panel {
        regulatory: Scripted::answering(verdict_json("PASS", "within scope")),
        quality: Scripted::answering(verdict_json("PASS", "records complete")),
        engineering: Scripted::answering(verdict_json("PASS", "small change")),
        synthesizer: Scripted::unreachable(),
    };
    let outcome = panel
        .orchestrator(procedure_store().await)
        .process_design_change("Change the button colour")
        .await
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.phase(), ReviewPhase::Completed);
    assert_eq!(state.final_verdict(), Some(FinalVerdict::Approved));
    assert_eq!(state.messages().len(), 5);
    let last = state.messages().last().unwrap();
    assert_eq!(last.role, AgentRole::Coordinator);
    assert!(last.content.starts_with("Final verdict: APPROVED\n"));

    let synthesis = outcome.synthesis.unwrap();
    assert!(synthesis.blockers.is_empty());
    assert_eq!(
        state.required_documents(),
        &["design change request".to_string(), "risk analysis".to_string()]
    );
    assert_eq!(panel.synthesizer.calls(), 1);
}

#[tokio::test]
async fn test_quality_block_does_not_stop_engineering() {
    let panel = Panel {
        regulatory: Scripted::answering(verdict_json("PASS", "within scope")),
        quality: Scripted::answering(verdict_json("BLOCK", "no risk analysis")),
        engineering: Scripted::answering(verdict_json("WARNING", "touches the alarm module")),
        synthesizer: Scripted::answering("I cannot decide."),
    };
    let outcome = panel
        .orchestrator(procedure_store().await)
        .process_design_change("Replace the temperature sensor")
        .await
        .unwrap();

    let state = &outcome.state;
    assert_eq!(panel.engineering.calls(), 1);
    assert_eq!(state.engineering_verdict(), Some(VerdictKind::Warning));
    assert_eq!(state.phase(), ReviewPhase::Blocked);
    assert_eq!(state.final_verdict(), Some(FinalVerdict::Rejected));
    assert_eq!(
        outcome.synthesis.unwrap().blockers,
        vec!["QUALITY review returned BLOCK".to_string()]
    );
}

#[tokio::test]
async fn test_model_synthesis_is_used_when_parsable() {
    let synthesis = r#"```json
{"finalVerdict":"NEEDS_REVIEW","summary":"labeling must change","requiredDocuments":["labeling review"],"nextSteps":["update IFU"],"blockers":[]}
```"#;
    let panel = Panel {
        regulatory: Scripted::answering(verdict_json("WARNING", "wording")),
        quality: Scripted::answering(verdict_json("PASS", "ok")),
        engineering: Scripted::answering(verdict_json("PASS", "ok")),
        synthesizer: Scripted::answering(synthesis),
    };
    let outcome = panel
        .orchestrator(procedure_store().await)
        .process_design_change("Rename the sleep score")
        .await
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.phase(), ReviewPhase::Completed);
    assert_eq!(state.final_verdict(), Some(FinalVerdict::NeedsReview));
    assert_eq!(state.required_documents(), &["labeling review".to_string()]);
    assert_eq!(
        state.messages().last().unwrap().content,
        "Final verdict: NEEDS_REVIEW\nlabeling must change"
    );
}

#[tokio::test]
async fn test_unparsable_reviewer_answer_becomes_needs_info() {
    let panel = Panel {
        regulatory: Scripted::answering("no json here"),
        quality: Scripted::answering(verdict_json("PASS", "ok")),
        engineering: Scripted::answering(verdict_json("PASS", "ok")),
        synthesizer: Scripted::answering("still no json"),
    };
    let outcome = panel
        .orchestrator(procedure_store().await)
        .process_design_change("Add a step counter")
        .await
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.regulatory_verdict(), Some(VerdictKind::NeedsInfo));
    assert_eq!(state.final_verdict(), Some(FinalVerdict::NeedsReview));
    assert_eq!(state.phase(), ReviewPhase::Completed);
}

#[tokio::test]
async fn test_every_call_unreachable_is_an_infrastructure_error() {
    let panel = Panel {
        regulatory: Scripted::unreachable(),
        quality: Scripted::unreachable(),
        engineering: Scripted::unreachable(),
        synthesizer: Scripted::unreachable(),
    };
    let err = panel
        .orchestrator(procedure_store().await)
        .process_design_change("Anything")
        .await
        .unwrap_err();

    match err {
        ReviewError::Infrastructure { state, .. } => {
            assert_eq!(state.phase(), ReviewPhase::Synthesis);
            assert_eq!(state.final_verdict(), None);
            assert_eq!(state.messages().len(), 4);
        }
        other => panic!("expected infrastructure error, got {:?}", other),
    }
    assert_eq!(panel.synthesizer.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_reviews_share_one_store() {
    let panel = Panel {
        regulatory: Scripted::answering(verdict_json("PASS", "ok")),
        quality: Scripted::answering(verdict_json("PASS", "ok")),
        engineering: Scripted::answering(verdict_json("PASS", "ok")),
        synthesizer: Scripted::unreachable(),
    };
    let store = procedure_store().await;
    let orchestrator = Arc::new(panel.orchestrator(store.clone()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .process_design_change(&format!("change number {}", i))
                .await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.state.phase(), ReviewPhase::Completed);
        assert_eq!(outcome.state.messages().len(), 5);
        ids.insert(outcome.state.request_id().to_string());
    }
    assert_eq!(ids.len(), 8);
    assert_eq!(panel.regulatory.calls(), 8);
    assert!(store.len() > 0);
}

#[tokio::test]
async fn test_ingest_then_review_records_history() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("procedures");
    fs::create_dir_all(docs.join("design")).unwrap();
    fs::write(
        docs.join("design/sop-design-change.md"),
        "# Design change control\nEvery design change needs a change request and a risk analysis.",
    )
    .unwrap();
    fs::write(docs.join("notes.pdf"), [0xff_u8, 0xfe, 0x00]).unwrap();

    let config = parse_config(&format!(
        r#"[model]
provider = "disabled"

[chunking]
chunk_size = 120
overlap = 20

[documents]
root = "{}"

[history]
path = "{}"
"#,
        docs.display(),
        tmp.path().join("history/reviews.jsonl").display()
    ))
    .unwrap();

    let store = build_store(&config).unwrap();
    let report = ingest_documents(&config, &store, false).await.unwrap();
    assert_eq!(report.documents, 1);
    assert!(report.indexed >= 1);
    assert!(store.status().initialized);

    let panel = Panel {
        regulatory: Scripted::answering(verdict_json("BLOCK", "diagnosis claim")),
        quality: Scripted::answering(verdict_json("PASS", "ok")),
        engineering: Scripted::answering(verdict_json("PASS", "ok")),
        synthesizer: Scripted::answering("{}"),
    };
    let outcome = panel
        .orchestrator(store)
        .process_design_change("Diagnose fever")
        .await
        .unwrap();

    let history = JsonlHistory::open(config.history.path.clone().unwrap()).unwrap();
    history
        .record(&outcome.state, outcome.synthesis.as_ref())
        .unwrap();

    let reviews = history.reviews(None).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].request_id, outcome.state.request_id());
    let trail = history.audit_trail(outcome.state.request_id()).unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].role, AgentRole::Regulatory);
}
