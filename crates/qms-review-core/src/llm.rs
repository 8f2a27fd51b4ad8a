//! Generation backend trait.
//!
//! The reviewers and the synthesis step talk to a language model only
//! through [`LanguageModel`]. Concrete backends (OpenAI, Ollama) live in the
//! `qms-review` app crate; tests script their own.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ModelError;

/// A text-in, text-out language model.
///
/// `invoke` returns the raw completion, which may wrap the requested JSON in
/// prose or code fences. Parse it with [`crate::response`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier used in logs (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Run one completion with the given system and user prompts.
    ///
    /// Implementations should give up after `timeout` and report
    /// [`ModelError::Timeout`]; callers enforce the same budget again on
    /// their side.
    async fn invoke(&self, system: &str, user: &str, timeout: Duration) -> Result<String, ModelError>;
}
