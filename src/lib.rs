//! # QMS Review
//!
//! Multi-discipline review of product design changes, grounded in the
//! organisation's own procedures.
//!
//! Procedure documents are chunked and indexed in an in-memory
//! [`RetrievalStore`](qms_review_core::RetrievalStore). A design change then
//! passes through three expert reviewers (regulatory, quality, engineering)
//! and a synthesis step, tracked by a
//! [`ReviewState`](qms_review_core::state::ReviewState) state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ Procedures  │──▶│ Chunk+Embed │──▶│ RetrievalStore │
//! │  (*.md)     │   │             │   │  (in memory)   │
//! └─────────────┘   └─────────────┘   └───────┬────────┘
//!                                             │
//!                 ┌───────────────────────────┤
//!                 ▼                           ▼
//!         ┌──────────────┐            ┌──────────────┐
//!         │ Orchestrator │──reviews──▶│   History    │
//!         │ REG→QA→ENG   │            │   (JSONL)    │
//!         └──────┬───────┘            └──────────────┘
//!                │
//!        ┌───────┴───────┐
//!        ▼               ▼
//!   ┌──────────┐   ┌──────────┐
//!   │   CLI    │   │   HTTP   │
//!   │  (qms)   │   │  (axum)  │
//!   └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers (hash, OpenAI, Ollama) |
//! | [`llm`] | Chat model backends and call timeouts |
//! | [`ingest`] | Filesystem scan and indexing |
//! | [`reviewer`] | Per-discipline expert reviewers |
//! | [`orchestrator`] | The review workflow |
//! | [`procedure`] | Question answering over procedures |
//! | [`history`] | JSON-lines review history |
//! | [`server`] | HTTP API |

pub mod config;
pub mod embedding;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod orchestrator;
pub mod procedure;
pub mod reviewer;
pub mod server;
