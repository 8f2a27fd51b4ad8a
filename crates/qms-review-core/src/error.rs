//! Error taxonomy shared by the core components.
//!
//! | Error | Raised by | Handled at |
//! |-------|-----------|------------|
//! | [`ConfigError`] | chunk options, store limits | caller (fail fast) |
//! | [`RetrievalError`] | [`RetrievalStore`](crate::store::RetrievalStore) | reviewer (empty context) |
//! | [`ModelError`] | [`LanguageModel`](crate::llm::LanguageModel) backends | reviewer / orchestrator (fallback) |
//! | [`ResponseParseError`] | [`response`](crate::response) | reviewer / orchestrator (fallback) |
//! | [`TransitionError`] | [`ReviewState`](crate::state::ReviewState) | orchestrator (programming error) |
//! | [`ReviewError`] | review orchestrator | caller |

use std::time::Duration;

use thiserror::Error;

use crate::models::AgentRole;
use crate::state::{ReviewPhase, ReviewState};

/// Invalid chunking options or store limits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
    #[error("target_watermark ({target}) must be > 0 and < max_capacity ({max})")]
    InvalidWatermarks { max: usize, target: usize },
}

/// Failures of the retrieval path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    #[error("retrieval store is not initialized")]
    NotInitialized,
    #[error("embedding backend failed: {0}")]
    Embedding(String),
}

/// Failures of a single language-model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The call exceeded its budget.
    #[error("model call timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// The backend cannot be reached at all (connection refused, DNS,
    /// rejected credentials, provider disabled).
    #[error("model backend unreachable: {0}")]
    Unreachable(String),
    /// The backend answered but the call failed.
    #[error("model backend error: {0}")]
    Backend(String),
}

impl ModelError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ModelError::Unreachable(_))
    }
}

/// The model's raw output could not be turned into a typed response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseParseError {
    #[error("no JSON object found in model response")]
    NoJsonObject,
    #[error("model response is not valid JSON: {0}")]
    Malformed(String),
    #[error("model response violates the schema: {0}")]
    Schema(String),
}

/// An illegal change to a [`ReviewState`](crate::state::ReviewState).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal phase transition {from} -> {to}")]
    Illegal { from: ReviewPhase, to: ReviewPhase },
    #[error("review is already finished ({0})")]
    Finished(ReviewPhase),
    #[error("{role} review cannot be recorded during {phase}")]
    OutOfPhase { role: AgentRole, phase: ReviewPhase },
}

/// Terminal failure of a whole review request.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Every model call of the request found the backend unreachable. The
    /// state is returned as it stood when the outage was detected.
    #[error("model backend unreachable for every call: {message}")]
    Infrastructure {
        message: String,
        state: Box<ReviewState>,
    },
    /// The orchestrator attempted an illegal phase change.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}
