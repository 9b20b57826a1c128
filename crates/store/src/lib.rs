//! Object-store adapter: the capability trait the reward-assignment core
//! reads and writes through, plus the compressed-JSONL codec shared by all
//! implementations. Real deployments front a cloud object store; the
//! filesystem and in-memory implementations here serve local operation and
//! tests respectively.

use bytes::Bytes;

mod codec;
mod fs;
mod mem;

pub use codec::{read_jsonl, write_jsonl};
pub use fs::FsStore;
pub use mem::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object {0:?} was not found")]
    NotFound(String),
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to decode JSON line {line}")]
    Decode {
        line: usize,
        #[source]
        err: serde_json::Error,
    },
    #[error("failed to encode JSON line")]
    Encode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Listed object with its size metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

/// ObjectStore is the storage capability injected into the core.
///
/// Contract notes:
/// - `list` returns objects under `prefix` in lexicographic key order.
/// - `put` overwrites any existing object at `key`.
/// - `delete` is bulk, and deleting an absent key is not an error.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
    async fn get(&self, key: &str) -> Result<Bytes>;
    async fn put(&self, key: &str, body: Bytes) -> Result<()>;
    async fn delete(&self, keys: &[String]) -> Result<()>;
}
