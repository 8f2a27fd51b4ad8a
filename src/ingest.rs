//! Filesystem ingestion: scan → chunk → embed → index.
//!
//! Documents come from `[documents].root`, filtered by include/exclude
//! globs. Only UTF-8 text is read; binary formats are skipped. An embedding
//! failure for one document is logged and counted, never fatal.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use qms_review_core::chunk::{chunk_document, ChunkOptions};
use qms_review_core::RetrievalStore;

use crate::config::Config;
use crate::embedding::create_provider;

/// A procedure document read from disk.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Path relative to the documents root.
    pub source_id: String,
    pub text: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub indexed: usize,
    /// Documents whose chunks could not be embedded.
    pub failed: usize,
    pub words: usize,
}

pub fn scan_documents(config: &Config) -> Result<Vec<SourceDocument>> {
    let docs_config = &config.documents;
    let root = &docs_config.root;
    if !root.exists() {
        bail!("Documents root does not exist: {}", root.display());
    }

    let include_set = build_globset(&docs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(docs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(docs_config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_document(path, &rel_str) {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => warn!(source_id = %rel_str, "skipping non-UTF-8 file"),
            Err(e) => return Err(e),
        }
    }

    documents.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(documents)
}

/// `Ok(None)` for files that are not valid UTF-8.
fn read_document(path: &Path, relative_path: &str) -> Result<Option<SourceDocument>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return Ok(None),
    };

    Ok(Some(SourceDocument {
        source_id: relative_path.to_string(),
        word_count: text.split_whitespace().count(),
        text,
    }))
}

/// An empty, uninitialized store wired to the configured embedding
/// provider and capacity limits.
pub fn build_store(config: &Config) -> Result<Arc<RetrievalStore>> {
    let provider = create_provider(&config.embedding)?;
    let limits = config.retrieval.limits()?;
    Ok(Arc::new(RetrievalStore::new(provider, limits)))
}

/// Scan the documents root and index every document into `store`.
///
/// With `dry_run`, chunks are counted but nothing is embedded.
pub async fn ingest_documents(
    config: &Config,
    store: &RetrievalStore,
    dry_run: bool,
) -> Result<IngestReport> {
    let documents = scan_documents(config)?;
    let options = config.chunking.options();
    let mut report = IngestReport::default();

    for doc in &documents {
        report.documents += 1;
        report.words += doc.word_count;

        let chunks = chunk_document(&doc.text, &doc.source_id, &options)?;
        report.chunks += chunks.len();
        if dry_run || chunks.is_empty() {
            continue;
        }

        match store.add_chunks(&chunks).await {
            Ok(indexed) => report.indexed += indexed,
            Err(e) => {
                warn!(source_id = %doc.source_id, error = %e, "failed to index document");
                report.failed += 1;
            }
        }
    }

    if !dry_run {
        store.initialize();
    }

    info!(
        documents = report.documents,
        chunks = report.chunks,
        indexed = report.indexed,
        failed = report.failed,
        dry_run,
        "ingestion finished"
    );
    Ok(report)
}

/// Chunk and index one document supplied directly (e.g. over HTTP).
/// Returns `(chunks, indexed)`.
pub async fn ingest_text(
    store: &RetrievalStore,
    options: &ChunkOptions,
    source_id: &str,
    text: &str,
) -> Result<(usize, usize)> {
    let chunks = chunk_document(text, source_id, options)?;
    let indexed = store
        .add_chunks(&chunks)
        .await
        .with_context(|| format!("failed to index {}", source_id))?;
    Ok((chunks.len(), indexed))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_globset_matches_nested_paths() {
        let set = build_globset(&["**/*.md".to_string()]).unwrap();
        assert!(set.is_match("sops/design/4.1-inputs.md"));
        assert!(!set.is_match("sops/design/4.1-inputs.pdf"));
        assert!(build_globset(&["[".to_string()]).is_err());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let config = parse_config(
            "[model]\nprovider = \"disabled\"\n[documents]\nroot = \"/definitely/not/here\"\n",
        )
        .unwrap();
        let err = scan_documents(&config).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_scan_reads_text_documents_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("design")).unwrap();
        std::fs::write(dir.path().join("design/b.md"), "Design inputs are reviewed.").unwrap();
        std::fs::write(dir.path().join("a.txt"), "Complaints logged").unwrap();
        std::fs::write(dir.path().join("binary.md"), [0xff_u8, 0xfe, 0xfd]).unwrap();
        std::fs::write(dir.path().join("ignored.pdf"), "not matched").unwrap();

        let config = parse_config(&format!(
            "[model]\nprovider = \"disabled\"\n[documents]\nroot = \"{}\"\n",
            dir.path().display()
        ))
        .unwrap();
        let docs = scan_documents(&config).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "design/b.md"]);
        assert_eq!(docs[0].word_count, 2);
        assert_eq!(docs[1].text, "Design inputs are reviewed.");
    }
}
