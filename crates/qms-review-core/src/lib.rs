//! # QMS Review Core
//!
//! Shared, runtime-free logic for QMS Review: data models, section-aware
//! chunking, the bounded retrieval store, the model-output contract, and
//! the review state machine.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. Embedding
//! and generation backends are injected through the [`embedding::EmbeddingProvider`]
//! and [`llm::LanguageModel`] traits by the application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod response;
pub mod state;
pub mod store;

pub use error::{
    ConfigError, ModelError, ResponseParseError, RetrievalError, ReviewError, TransitionError,
};
pub use store::{RetrievalStore, StoreLimits};
