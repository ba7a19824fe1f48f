//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow from raw text to searchable index rows:
//! loader → chunking → embedding → index insert. Each document is inserted
//! as one batch, so an embedding or index fault leaves the index exactly as
//! it was before that document.

use std::path::Path;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::loader;
use crate::models::{Chunk, Document};

/// Counters reported after an ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
}

/// Ingest every `.txt` file at `path` (a single file or a directory).
pub async fn ingest_path(
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
    path: &Path,
) -> Result<IngestReport> {
    let documents = loader::load_path(path)?;
    ingest_documents(index, embedder, config, &documents).await
}

/// Ingest a set of already-loaded documents in order. Stops at the first
/// failing document; documents acknowledged before it stay indexed.
pub async fn ingest_documents(
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
    documents: &[Document],
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    for document in documents {
        let inserted = ingest_document(index, embedder, config, document).await?;
        report.documents += 1;
        report.chunks += inserted;
    }
    tracing::info!(
        documents = report.documents,
        chunks = report.chunks,
        "ingestion complete"
    );
    Ok(report)
}

/// Chunk, embed, and index one document. Returns the number of chunks
/// written; an empty document writes nothing. All of the document's chunks
/// go in as a single insert, so a fault cannot leave it half-indexed.
pub async fn ingest_document(
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
    document: &Document,
) -> Result<usize> {
    let chunks: Vec<Chunk> = chunk_text(
        &document.id,
        &document.source_label,
        &document.text,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    )?
    .collect();
    if chunks.is_empty() {
        tracing::debug!(source = %document.source_label, "document yielded no chunks");
        return Ok(0);
    }

    let mut batch: Vec<(Chunk, Vec<f32>)> = Vec::with_capacity(chunks.len());
    for group in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = group.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        batch.extend(group.iter().cloned().zip(vectors));
    }

    let inserted = index.insert(batch)?;
    tracing::info!(
        source = %document.source_label,
        chunks = inserted,
        chars = document.text.chars().count(),
        "indexed document"
    );
    Ok(inserted)
}
