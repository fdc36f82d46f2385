//! Bounded, lazy row vendors shared by all concurrent runners of one journey.
//!
//! File-backed variants keep a single reader task that owns the file handle
//! and publishes rows into a bounded channel; consumers never touch the file,
//! which keeps EOF/rewind semantics in one place and propagates backpressure
//! to the reader.
mod file;
mod memory;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::error::AppResult;

pub type Row = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum DatapoolDescriptor {
    /// Finite; each row is handed to at most one runner on this node.
    InMemoryOnce { rows: Vec<Row> },
    /// Finite; rows recycle in FIFO order forever.
    InMemoryRecycle { rows: Vec<Row> },
    /// Newline-separated rows, single pass.
    FileOnce { path: String },
    /// Newline-separated rows, rewinds at EOF.
    FileRecycle { path: String },
}

#[derive(Debug, PartialEq, Eq)]
pub enum RowFetch {
    Row(Row),
    Exhausted,
}

enum Backend {
    Memory(std::sync::Mutex<memory::MemoryState>),
    File {
        rows: tokio::sync::Mutex<mpsc::Receiver<Row>>,
    },
}

struct PoolInner {
    backend: Backend,
    // Flipping to true stops the file reader and future handouts.
    closed: watch::Sender<bool>,
}

/// Thread-safe handle to one datapool; cheap to clone, handouts are atomic.
#[derive(Clone)]
pub struct Datapool {
    inner: Arc<PoolInner>,
}

impl Datapool {
    /// Build the backing variant. File pools open the file eagerly so a bad
    /// path fails at scenario start rather than on first fetch.
    pub async fn build(descriptor: &DatapoolDescriptor, channel_capacity: usize) -> AppResult<Self> {
        let (closed_tx, closed_rx) = watch::channel(false);
        let backend = match descriptor {
            DatapoolDescriptor::InMemoryOnce { rows } => {
                Backend::Memory(std::sync::Mutex::new(memory::MemoryState::new(
                    rows.clone(),
                    false,
                )))
            }
            DatapoolDescriptor::InMemoryRecycle { rows } => {
                Backend::Memory(std::sync::Mutex::new(memory::MemoryState::new(
                    rows.clone(),
                    true,
                )))
            }
            DatapoolDescriptor::FileOnce { path } => Backend::File {
                rows: tokio::sync::Mutex::new(
                    file::spawn_reader(path.clone(), false, channel_capacity, closed_rx).await?,
                ),
            },
            DatapoolDescriptor::FileRecycle { path } => Backend::File {
                rows: tokio::sync::Mutex::new(
                    file::spawn_reader(path.clone(), true, channel_capacity, closed_rx).await?,
                ),
            },
        };
        Ok(Datapool {
            inner: Arc::new(PoolInner {
                backend,
                closed: closed_tx,
            }),
        })
    }

    /// Fetch the next row. FIFO; when two runners race, each row goes to
    /// exactly one of them.
    pub async fn next_row(&self) -> RowFetch {
        if *self.inner.closed.borrow() {
            return RowFetch::Exhausted;
        }
        match &self.inner.backend {
            Backend::Memory(state) => {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.next_row()
            }
            Backend::File { rows } => {
                let mut receiver = rows.lock().await;
                if *self.inner.closed.borrow() {
                    return RowFetch::Exhausted;
                }
                match receiver.recv().await {
                    Some(row) => RowFetch::Row(row),
                    None => RowFetch::Exhausted,
                }
            }
        }
    }

    pub fn close(&self) {
        let _ = self.inner.closed.send(true);
    }
}
