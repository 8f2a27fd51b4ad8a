//! Durable review history as JSON lines.
//!
//! Each completed review appends one `review` record followed by one
//! `audit` row per message, in log order:
//!
//! ```text
//! {"kind":"review","requestId":"…","recordedAt":"…","state":{…},"synthesis":{…}}
//! {"kind":"audit","requestId":"…","sequence":0,"role":"COORDINATOR",…}
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use qms_review_core::models::{AgentRole, SynthesisResult, VerdictKind};
use qms_review_core::state::ReviewState;

/// Receives finished reviews for durable storage.
pub trait ReviewSink: Send + Sync {
    fn record(&self, state: &ReviewState, synthesis: Option<&SynthesisResult>) -> Result<()>;
}

/// Record a finished review on tokio's blocking pool.
pub async fn append(
    sink: Arc<dyn ReviewSink>,
    state: ReviewState,
    synthesis: Option<SynthesisResult>,
) -> Result<()> {
    tokio::task::spawn_blocking(move || sink.record(&state, synthesis.as_ref()))
        .await
        .with_context(|| "history writer task failed")?
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub request_id: String,
    pub recorded_at: DateTime<Utc>,
    pub state: ReviewState,
    pub synthesis: Option<SynthesisResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub request_id: String,
    pub sequence: usize,
    pub role: AgentRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictKind>,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    Review(ReviewRecord),
    Audit(AuditRow),
}

pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    /// Open (or lazily create) the history file, creating parent
    /// directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Review records, oldest first, keeping only the last `limit`.
    pub fn reviews(&self, limit: Option<usize>) -> Result<Vec<ReviewRecord>> {
        let mut reviews: Vec<ReviewRecord> = self
            .read_all()?
            .into_iter()
            .filter_map(|r| match r {
                HistoryRecord::Review(review) => Some(review),
                HistoryRecord::Audit(_) => None,
            })
            .collect();
        if let Some(limit) = limit {
            let skip = reviews.len().saturating_sub(limit);
            reviews.drain(..skip);
        }
        Ok(reviews)
    }

    /// Audit rows of one request in sequence order.
    pub fn audit_trail(&self, request_id: &str) -> Result<Vec<AuditRow>> {
        let mut rows: Vec<AuditRow> = self
            .read_all()?
            .into_iter()
            .filter_map(|r| match r {
                HistoryRecord::Audit(row) if row.request_id == request_id => Some(row),
                _ => None,
            })
            .collect();
        rows.sort_by_key(|r| r.sequence);
        Ok(rows)
    }

    fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", self.path.display()))
            }
        };

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).with_context(|| {
                format!("Malformed history record at {}:{}", self.path.display(), n + 1)
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl ReviewSink for JsonlHistory {
    fn record(&self, state: &ReviewState, synthesis: Option<&SynthesisResult>) -> Result<()> {
        let mut lines = Vec::with_capacity(state.messages().len() + 1);
        lines.push(serde_json::to_string(&HistoryRecord::Review(ReviewRecord {
            request_id: state.request_id().to_string(),
            recorded_at: Utc::now(),
            state: state.clone(),
            synthesis: synthesis.cloned(),
        }))?);
        for (sequence, message) in state.messages().iter().enumerate() {
            lines.push(serde_json::to_string(&HistoryRecord::Audit(AuditRow {
                request_id: state.request_id().to_string(),
                sequence,
                role: message.role,
                verdict: message.verdict,
                timestamp: message.timestamp,
                content: message.content.clone(),
            }))?);
        }

        let mut buf = lines.join("\n");
        buf.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(buf.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qms_review_core::models::FinalVerdict;
    use qms_review_core::state::ReviewPhase;
    use tempfile::TempDir;

    fn finished_state(description: &str) -> ReviewState {
        let mut state = ReviewState::new(description);
        state
            .push_message(AgentRole::Coordinator, "received", None)
            .unwrap();
        state.advance(ReviewPhase::RegulatoryReview).unwrap();
        state
            .record_review(
                AgentRole::Regulatory,
                &qms_review_core::models::Verdict {
                    verdict: VerdictKind::Block,
                    findings: vec!["diagnosis claim".into()],
                    recommendations: vec![],
                    missing_info: vec![],
                    referenced_sections: vec![],
                },
            )
            .unwrap();
        state.short_circuit().unwrap();
        state
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let history = JsonlHistory::open(dir.path().join("nested/reviews.jsonl")).unwrap();
        assert!(history.reviews(None).unwrap().is_empty());
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_records_review_and_audit_rows() {
        let dir = TempDir::new().unwrap();
        let history = JsonlHistory::open(dir.path().join("reviews.jsonl")).unwrap();
        let state = finished_state("add fever alarm");
        let synthesis = SynthesisResult {
            final_verdict: FinalVerdict::Rejected,
            summary: "blocked".into(),
            required_documents: vec![],
            next_steps: vec![],
            blockers: vec!["diagnosis claim".into()],
        };
        history.record(&state, Some(&synthesis)).unwrap();

        let reviews = history.reviews(None).unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].state, state);
        assert_eq!(reviews[0].synthesis.as_ref(), Some(&synthesis));

        let trail = history.audit_trail(state.request_id()).unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].role, AgentRole::Coordinator);
        assert_eq!(trail[1].verdict, Some(VerdictKind::Block));

        let raw = std::fs::read_to_string(history.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.lines().next().unwrap().starts_with("{\"kind\":\"review\""));
    }

    #[test]
    fn test_reviews_limit_keeps_most_recent() {
        let dir = TempDir::new().unwrap();
        let history = JsonlHistory::open(dir.path().join("reviews.jsonl")).unwrap();
        for i in 0..3 {
            history
                .record(&finished_state(&format!("change {}", i)), None)
                .unwrap();
        }
        let last_two = history.reviews(Some(2)).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].state.description(), "change 1");
        assert_eq!(last_two[1].state.description(), "change 2");
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let history = JsonlHistory::open(&path).unwrap();
        let err = history.reviews(None).unwrap_err();
        assert!(err.to_string().contains("Malformed history record"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_line_intact() {
        let dir = TempDir::new().unwrap();
        let history = Arc::new(JsonlHistory::open(dir.path().join("reviews.jsonl")).unwrap());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let sink: Arc<dyn ReviewSink> = history.clone();
            tasks.push(tokio::spawn(append(
                sink,
                finished_state(&format!("change {}", i)),
                None,
            )));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reviews = history.reviews(None).unwrap();
        assert_eq!(reviews.len(), 16);
        for review in &reviews {
            assert_eq!(history.audit_trail(&review.request_id).unwrap().len(), 2);
        }
    }
}
