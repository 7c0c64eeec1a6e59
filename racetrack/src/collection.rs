//! Shared collection point for published worker results.
//!
//! Workers publish exactly once, when they leave the run loop. The coordinator
//! reads everything back during Collect. Implementations must be append-only:
//! a published result is never changed or removed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::ledger::WorkerRunResult;

/// Errors raised while publishing or collecting results.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// Reading or writing the backing file failed.
    #[error("collection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A result could not be encoded or decoded.
    #[error("collection encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Append-only, process-visible collection of [`WorkerRunResult`]s.
#[async_trait]
pub trait ResultCollection: Send + Sync {
    /// Append one result.
    async fn publish(&self, result: WorkerRunResult) -> Result<(), CollectionError>;

    /// Every result published so far, in publication order.
    async fn collect_all(&self) -> Result<Vec<WorkerRunResult>, CollectionError>;
}

/// Collection shared by the workers of a single process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollection {
    results: Arc<Mutex<Vec<WorkerRunResult>>>,
}

impl InMemoryCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published results.
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Whether nothing was published yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCollection for InMemoryCollection {
    async fn publish(&self, result: WorkerRunResult) -> Result<(), CollectionError> {
        self.results.lock().push(result);
        Ok(())
    }

    async fn collect_all(&self) -> Result<Vec<WorkerRunResult>, CollectionError> {
        Ok(self.results.lock().clone())
    }
}

/// JSON-lines file shared by cooperating processes.
///
/// Each result is one line, written with a single `write_all` on a file opened
/// in append mode, so concurrent publishers never interleave within a line.
#[derive(Debug, Clone)]
pub struct FileCollection {
    path: PathBuf,
}

impl FileCollection {
    /// Use (or create on first publish) the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultCollection for FileCollection {
    async fn publish(&self, result: WorkerRunResult) -> Result<(), CollectionError> {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn collect_all(&self) -> Result<Vec<WorkerRunResult>, CollectionError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(CollectionError::from))
            .collect()
    }
}
