//! Question answering over the indexed procedures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use qms_review_core::llm::LanguageModel;
use qms_review_core::store::render_context;
use qms_review_core::RetrievalStore;

use crate::llm::invoke_with_timeout;

/// Answer given when nothing has been ingested.
pub const NO_PROCEDURES_LOADED: &str =
    "No procedure documents are loaded. Ingest the procedures first.";

const ANSWER_GUIDELINES: &str = "Guidelines:
1. Base your answer strictly on the procedure content provided.
2. Do not guess about anything the procedures do not cover.
3. Cite the relevant clause numbers or sections.
4. If a procedure must be carried out, list its steps in order.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureAnswer {
    pub answer: String,
    /// Source identifiers of the passages used, in rank order, without
    /// duplicates.
    pub sources: Vec<String>,
}

pub struct ProcedureAgent {
    store: Arc<RetrievalStore>,
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    passages: usize,
}

impl ProcedureAgent {
    pub fn new(
        store: Arc<RetrievalStore>,
        model: Arc<dyn LanguageModel>,
        timeout: Duration,
        passages: usize,
    ) -> Self {
        Self {
            store,
            model,
            timeout,
            passages: passages.max(1),
        }
    }

    pub async fn ask(&self, question: &str) -> Result<ProcedureAnswer> {
        if self.store.is_empty() {
            return Ok(ProcedureAnswer {
                answer: NO_PROCEDURES_LOADED.to_string(),
                sources: Vec::new(),
            });
        }

        let hits = self
            .store
            .search(question, self.passages)
            .await
            .with_context(|| "procedure search failed")?;

        let system = format!(
            "You are a procedure (SOP) specialist for a medical device quality management system.\n\
             Answer the user's question from the procedure content below.\n\n\
             [Procedure content]\n{}\n\n{}",
            render_context(&hits),
            ANSWER_GUIDELINES
        );

        let answer = invoke_with_timeout(self.model.as_ref(), &system, question, self.timeout)
            .await
            .with_context(|| "procedure question could not be answered")?;

        let mut sources: Vec<String> = Vec::with_capacity(hits.len());
        for hit in hits {
            if !sources.contains(&hit.source_id) {
                sources.push(hit.source_id);
            }
        }

        info!(passages = sources.len(), "procedure question answered");
        Ok(ProcedureAnswer { answer, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qms_review_core::chunk::{chunk_document, ChunkOptions};
    use qms_review_core::{ModelError, StoreLimits};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::embedding::HashProvider;

    struct Echo {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn invoke(&self, system: &str, _user: &str, _t: Duration) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ModelError::Backend("boom".into()));
            }
            Ok(format!("answered from {} bytes of context", system.len()))
        }
    }

    fn store() -> Arc<RetrievalStore> {
        Arc::new(RetrievalStore::new(
            Arc::new(HashProvider::new(128).unwrap()),
            StoreLimits::default(),
        ))
    }

    async fn load(store: &RetrievalStore, source: &str, text: &str) {
        let options = ChunkOptions {
            chunk_size: 60,
            overlap: 10,
            preserve_sections: true,
        };
        let chunks = chunk_document(text, source, &options).unwrap();
        store.add_chunks(&chunks).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_answers_without_model() {
        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let agent = ProcedureAgent::new(store(), model.clone(), Duration::from_secs(1), 4);
        let answer = agent.ask("How do I file a CAPA?").await.unwrap();
        assert_eq!(answer.answer, NO_PROCEDURES_LOADED);
        assert!(answer.sources.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sources_are_deduplicated_in_rank_order() {
        let store = store();
        load(
            &store,
            "sop-capa.md",
            "# CAPA\nOpen a CAPA record within five days.\n\n# CAPA review\nThe CAPA board reviews every CAPA record monthly.",
        )
        .await;
        load(&store, "sop-training.md", "# Training\nTraining records are kept for ten years.").await;

        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let agent = ProcedureAgent::new(store, model, Duration::from_secs(1), 4);
        let answer = agent.ask("CAPA record review").await.unwrap();
        assert!(answer.answer.starts_with("answered from"));
        assert_eq!(answer.sources[0], "sop-capa.md");
        let unique: std::collections::HashSet<_> = answer.sources.iter().collect();
        assert_eq!(unique.len(), answer.sources.len());
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let store = store();
        load(&store, "sop.md", "Complaints are logged the same day.").await;
        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let agent = ProcedureAgent::new(store, model, Duration::from_secs(1), 4);
        assert!(agent.ask("complaints").await.is_err());
    }
}
