//! Persistent similarity index over embedded chunks.
//!
//! [`VectorIndex`] keeps every chunk and its embedding in memory (a chunk
//! table plus one flat row-major f32 arena) and mirrors that state to a
//! directory on disk:
//!
//! - `manifest.json` — format version, dimension, metric, record count,
//!   vector-file checksum, and the full chunk table
//! - `vectors-<checksum>.bin` — fixed header (magic, version, dimension,
//!   count) followed by little-endian f32 rows, named by the checksum the
//!   manifest records
//!
//! `insert` persists before acknowledging, so a successful return means the
//! batch survives a restart. The manifest rename is the single commit
//! point: the vector rows land under their checksum-derived name before the
//! manifest that references them, so a crash at any step leaves the
//! previously committed pair loadable and loses at most the in-flight
//! batch. Readers and writers share an `RwLock`; the write lock covers the
//! whole read-modify-persist cycle and no lock is ever held across an await
//! point. Anything suspicious on load (unknown version, wrong dimension,
//! truncation, checksum mismatch) fails with [`Error::IndexCorrupt`] rather
//! than returning garbage scores.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{blob_to_vec, cosine_similarity, dot_product, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Chunk, RetrievalHit};

pub const MANIFEST_FILE: &str = "manifest.json";

const FORMAT_VERSION: u32 = 2;
const VECTORS_PREFIX: &str = "vectors-";
const VECTORS_SUFFIX: &str = ".bin";
const VECTORS_MAGIC: [u8; 4] = *b"MRAG";
const VECTORS_HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// File name for the vector rows with checksum `digest`. The first 16 hex
/// chars are enough to key a generation; a digest too short to slice falls
/// through whole and simply names a file that will not exist.
fn vectors_file_name(digest: &str) -> String {
    let prefix = digest.get(..16).unwrap_or(digest);
    format!("{VECTORS_PREFIX}{prefix}{VECTORS_SUFFIX}")
}

fn is_vectors_file(name: &str) -> bool {
    name.starts_with(VECTORS_PREFIX) && name.ends_with(VECTORS_SUFFIX)
}

/// Similarity metric, fixed when an index is constructed and recorded in
/// its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Dot,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Metric> {
        match name {
            "cosine" => Ok(Metric::Cosine),
            "dot" => Ok(Metric::Dot),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown similarity metric '{other}'. Must be cosine or dot."
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        }
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::Dot => dot_product(a, b),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    dimension: usize,
    metric: Metric,
    count: usize,
    vectors_sha256: String,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Default)]
struct IndexState {
    chunks: Vec<Chunk>,
    /// Row-major embedding arena, `chunks.len() * dimension` floats.
    vectors: Vec<f32>,
}

/// Persistent vector similarity index. See the module docs for the on-disk
/// schema and concurrency contract.
#[derive(Debug)]
pub struct VectorIndex {
    dir: PathBuf,
    dimension: usize,
    metric: Metric,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create a fresh empty index at `dir` and persist it immediately.
    pub fn create(dir: &Path, dimension: usize, metric: Metric) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfiguration(
                "index dimension must be > 0".to_string(),
            ));
        }
        let index = VectorIndex {
            dir: dir.to_path_buf(),
            dimension,
            metric,
            state: RwLock::new(IndexState::default()),
        };
        {
            let state = index.read_state()?;
            index.persist(&state)?;
        }
        Ok(index)
    }

    /// Restore an index from `dir`, validating format version, checksum,
    /// and that its dimension matches `expected_dim`.
    pub fn load(dir: &Path, expected_dim: usize) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_bytes = std::fs::read(&manifest_path).map_err(|e| {
            Error::IndexCorrupt(format!("cannot read {}: {e}", manifest_path.display()))
        })?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| Error::IndexCorrupt(format!("malformed manifest: {e}")))?;

        if manifest.version != FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "unsupported index format version {} (this build reads version {})",
                manifest.version, FORMAT_VERSION
            )));
        }
        if manifest.dimension != expected_dim {
            return Err(Error::IndexCorrupt(format!(
                "index dimension {} does not match embedding dimension {}",
                manifest.dimension, expected_dim
            )));
        }
        if manifest.count != manifest.chunks.len() {
            return Err(Error::IndexCorrupt(format!(
                "manifest count {} disagrees with chunk table length {}",
                manifest.count,
                manifest.chunks.len()
            )));
        }

        let vectors_path = dir.join(vectors_file_name(&manifest.vectors_sha256));
        let vector_bytes = std::fs::read(&vectors_path).map_err(|e| {
            Error::IndexCorrupt(format!("cannot read {}: {e}", vectors_path.display()))
        })?;
        let checksum = hex_digest(&vector_bytes);
        if checksum != manifest.vectors_sha256 {
            return Err(Error::IndexCorrupt(
                "vector file checksum mismatch".to_string(),
            ));
        }
        let vectors = decode_vectors(&vector_bytes, manifest.dimension, manifest.count)?;

        Ok(VectorIndex {
            dir: dir.to_path_buf(),
            dimension: manifest.dimension,
            metric: manifest.metric,
            state: RwLock::new(IndexState {
                chunks: manifest.chunks,
                vectors,
            }),
        })
    }

    /// Load the index at `dir` if one exists there, otherwise create an
    /// empty one. The flag reports whether a fresh index was created, so a
    /// caller can decide to seed it.
    pub fn open_or_create(dir: &Path, dimension: usize, metric: Metric) -> Result<(Self, bool)> {
        if dir.join(MANIFEST_FILE).exists() {
            Ok((Self::load(dir, dimension)?, false))
        } else {
            Ok((Self::create(dir, dimension, metric)?, true))
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.chunks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch of chunks with their embeddings and persist.
    ///
    /// The batch is all-or-nothing: a dimension mismatch or a persistence
    /// failure leaves both the in-memory state and the files exactly as they
    /// were. Returns the number of records inserted.
    pub fn insert(&self, batch: Vec<(Chunk, Vec<f32>)>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        for (chunk, vector) in &batch {
            if vector.len() != self.dimension {
                return Err(Error::IndexCorrupt(format!(
                    "cannot insert a {}-dimensional vector for chunk {} into a {}-dimensional index",
                    vector.len(),
                    chunk.id,
                    self.dimension
                )));
            }
        }

        let mut state = self.write_state()?;
        let prior_chunks = state.chunks.len();
        let prior_floats = state.vectors.len();
        let inserted = batch.len();
        for (chunk, vector) in batch {
            state.chunks.push(chunk);
            state.vectors.extend_from_slice(&vector);
        }
        if let Err(e) = self.persist(&state) {
            state.chunks.truncate(prior_chunks);
            state.vectors.truncate(prior_floats);
            return Err(e);
        }
        Ok(inserted)
    }

    /// Return up to `k` hits ordered by descending score; equal scores keep
    /// insertion order. An empty index yields an empty result.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Err(Error::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        if vector.len() != self.dimension {
            return Err(Error::IndexCorrupt(format!(
                "query vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }

        let state = self.read_state()?;
        if state.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = state
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(ordinal, row)| (ordinal, self.metric.score(row, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(ordinal, score)| {
                let chunk = &state.chunks[ordinal];
                RetrievalHit {
                    chunk_id: chunk.id.clone(),
                    source_label: chunk.source_label.clone(),
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Write the current state to the index directory.
    pub fn save(&self) -> Result<()> {
        let state = self.read_state()?;
        self.persist(&state)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|_| Error::IndexCorrupt("index lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|_| Error::IndexCorrupt("index lock poisoned".to_string()))
    }

    /// Serialize `state` to disk. The vector rows land first under their
    /// checksum-derived name, unreferenced until the manifest rename; that
    /// rename is the single commit point. Interrupted anywhere, the
    /// directory still holds the previously committed manifest/vector pair.
    fn persist(&self, state: &IndexState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let vector_bytes = encode_vectors(&state.vectors, self.dimension, state.chunks.len());
        let digest = hex_digest(&vector_bytes);
        let vectors_name = vectors_file_name(&digest);
        let manifest = Manifest {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            metric: self.metric,
            count: state.chunks.len(),
            vectors_sha256: digest,
            chunks: state.chunks.clone(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| Error::IndexCorrupt(format!("manifest serialization: {e}")))?;

        let vectors_path = self.dir.join(&vectors_name);
        let manifest_path = self.dir.join(MANIFEST_FILE);
        let vectors_tmp = self.dir.join(format!("{vectors_name}.tmp"));
        let manifest_tmp = self.dir.join(format!("{MANIFEST_FILE}.tmp"));

        std::fs::write(&vectors_tmp, &vector_bytes)?;
        std::fs::rename(&vectors_tmp, &vectors_path)?;
        std::fs::write(&manifest_tmp, &manifest_bytes)?;
        std::fs::rename(&manifest_tmp, &manifest_path)?;

        self.sweep_stale_vector_files(&vectors_name);
        Ok(())
    }

    /// Remove vector files the just-committed manifest does not name, and
    /// temp files an interrupted persist left behind (ours were renamed
    /// away before this runs). Best-effort: load ignores unreferenced
    /// files, so a leftover is wasted bytes, never an error.
    fn sweep_stale_vector_files(&self, keep: &str) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if (is_vectors_file(name) && name != keep) || name.ends_with(".tmp") {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn encode_vectors(vectors: &[f32], dimension: usize, count: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(VECTORS_HEADER_LEN + vectors.len() * 4);
    bytes.extend_from_slice(&VECTORS_MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dimension as u32).to_le_bytes());
    bytes.extend_from_slice(&(count as u64).to_le_bytes());
    bytes.extend_from_slice(&vec_to_blob(vectors));
    bytes
}

fn decode_vectors(bytes: &[u8], dimension: usize, count: usize) -> Result<Vec<f32>> {
    if bytes.len() < VECTORS_HEADER_LEN {
        return Err(Error::IndexCorrupt(
            "vector file too short for its header".to_string(),
        ));
    }
    if bytes[..4] != VECTORS_MAGIC {
        return Err(Error::IndexCorrupt(
            "vector file has the wrong magic bytes".to_string(),
        ));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(Error::IndexCorrupt(format!(
            "unsupported vector file version {version}"
        )));
    }
    let file_dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if file_dim != dimension {
        return Err(Error::IndexCorrupt(format!(
            "vector file dimension {file_dim} disagrees with manifest dimension {dimension}"
        )));
    }
    let file_count = u64::from_le_bytes([
        bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19],
    ]) as usize;
    if file_count != count {
        return Err(Error::IndexCorrupt(format!(
            "vector file count {file_count} disagrees with manifest count {count}"
        )));
    }

    let data = &bytes[VECTORS_HEADER_LEN..];
    if data.len() != count * dimension * 4 {
        return Err(Error::IndexCorrupt(format!(
            "vector file truncated: expected {} data bytes, found {}",
            count * dimension * 4,
            data.len()
        )));
    }
    Ok(blob_to_vec(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn chunk(text: &str, index: i64) -> Chunk {
        Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: "doc1".to_string(),
            source_label: "notes.txt".to_string(),
            chunk_index: index,
            char_start: 0,
            char_end: text.chars().count(),
            text: text.to_string(),
        }
    }

    fn dot_index(dir: &Path) -> VectorIndex {
        VectorIndex::create(dir, 2, Metric::Dot).unwrap()
    }

    /// Path of the vector file the current manifest references.
    fn vectors_path(dir: &Path) -> PathBuf {
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        dir.join(vectors_file_name(
            manifest["vectors_sha256"].as_str().unwrap(),
        ))
    }

    #[test]
    fn test_insert_then_query_returns_nearest() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![
                (chunk("about colds", 0), vec![1.0, 0.0]),
                (chunk("about taxes", 1), vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = index.query(&[1.0, 0.1], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "about colds");
        assert!(hits[0].score > 0.9);
    }

    #[test]
    fn test_query_orders_by_score_then_insertion() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![
                (chunk("weak", 0), vec![0.2, 0.0]),
                (chunk("tie-first", 1), vec![0.5, 0.0]),
                (chunk("tie-second", 2), vec![0.5, 0.0]),
                (chunk("strong", 3), vec![1.0, 0.0]),
            ])
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 4).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["strong", "tie-first", "tie-second", "weak"]);
    }

    #[test]
    fn test_query_k_zero_is_invalid_argument() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        let err = index.query(&[1.0, 0.0], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_empty_index_query_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        assert!(index.query(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_k_beyond_len_returns_everything() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("only", 0), vec![1.0, 0.0])])
            .unwrap();
        assert_eq!(index.query(&[1.0, 0.0], 10).unwrap().len(), 1);
    }

    #[test]
    fn test_query_dimension_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        let err = index.query(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt(_)));
    }

    #[test]
    fn test_insert_dimension_mismatch_leaves_index_untouched() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("good", 0), vec![1.0, 0.0])])
            .unwrap();

        let err = index
            .insert(vec![
                (chunk("also good", 1), vec![0.5, 0.5]),
                (chunk("bad width", 2), vec![0.5]),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt(_)));
        assert_eq!(index.len(), 1);

        let reopened = VectorIndex::load(tmp.path(), 2).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_save_load_roundtrip_preserves_results() {
        let tmp = TempDir::new().unwrap();
        {
            let index = dot_index(tmp.path());
            index
                .insert(vec![
                    (chunk("fever and chills", 0), vec![0.9, 0.1]),
                    (chunk("sprained ankle", 1), vec![0.1, 0.9]),
                ])
                .unwrap();
        }
        let index = VectorIndex::load(tmp.path(), 2).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.metric(), Metric::Dot);
        let hits = index.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].text, "fever and chills");
        assert_eq!(hits[0].source_label, "notes.txt");
    }

    #[test]
    fn test_load_rejects_unknown_manifest_version() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("x", 0), vec![1.0, 0.0])])
            .unwrap();

        let path = tmp.path().join(MANIFEST_FILE);
        let mut manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        manifest["version"] = serde_json::json!(99);
        std::fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let err = VectorIndex::load(tmp.path(), 2).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt(_)));
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_load_rejects_wrong_expected_dimension() {
        let tmp = TempDir::new().unwrap();
        dot_index(tmp.path());
        let err = VectorIndex::load(tmp.path(), 3).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt(_)));
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn test_load_rejects_truncated_vector_file() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("x", 0), vec![1.0, 0.0])])
            .unwrap();

        let path = vectors_path(tmp.path());
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = VectorIndex::load(tmp.path(), 2).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt(_)));
    }

    #[test]
    fn test_interrupted_persist_keeps_prior_batch_loadable() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("first batch", 0), vec![1.0, 0.0])])
            .unwrap();
        let committed_manifest = std::fs::read(tmp.path().join(MANIFEST_FILE)).unwrap();
        let committed_vectors_path = vectors_path(tmp.path());
        let committed_vectors = std::fs::read(&committed_vectors_path).unwrap();

        index
            .insert(vec![(chunk("second batch", 1), vec![0.0, 1.0])])
            .unwrap();

        // Rebuild the directory a crash between the vector-file rename and
        // the manifest rename would leave behind: committed manifest and
        // vector file intact, newer vector file present but unreferenced.
        std::fs::write(tmp.path().join(MANIFEST_FILE), &committed_manifest).unwrap();
        std::fs::write(&committed_vectors_path, &committed_vectors).unwrap();

        let reloaded = VectorIndex::load(tmp.path(), 2).unwrap();
        assert_eq!(reloaded.len(), 1);
        let hits = reloaded.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "first batch");
    }

    #[test]
    fn test_load_ignores_vector_files_the_manifest_does_not_name() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("kept", 0), vec![1.0, 0.0])])
            .unwrap();
        std::fs::write(tmp.path().join("vectors-00000000deadbeef.bin"), b"junk").unwrap();

        let reloaded = VectorIndex::load(tmp.path(), 2).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.query(&[1.0, 0.0], 1).unwrap()[0].text, "kept");
    }

    #[test]
    fn test_persist_sweeps_unreferenced_vector_files() {
        let tmp = TempDir::new().unwrap();
        let index = dot_index(tmp.path());
        index
            .insert(vec![(chunk("one", 0), vec![1.0, 0.0])])
            .unwrap();
        let first = vectors_path(tmp.path());
        index
            .insert(vec![(chunk("two", 1), vec![0.0, 1.0])])
            .unwrap();
        let second = vectors_path(tmp.path());
        assert_ne!(first, second);
        assert!(!first.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_open_or_create_reports_fresh_then_reopens() {
        let tmp = TempDir::new().unwrap();
        let (index, created) = VectorIndex::open_or_create(tmp.path(), 2, Metric::Cosine).unwrap();
        assert!(created);
        index
            .insert(vec![(chunk("persisted", 0), vec![1.0, 0.0])])
            .unwrap();
        drop(index);

        let (index, created) = VectorIndex::open_or_create(tmp.path(), 2, Metric::Cosine).unwrap();
        assert!(!created);
        assert_eq!(index.len(), 1);
    }
}
