//! Content-addressed payload storage
//!
//! Version payloads are written once and never modified. The handle stored
//! alongside a version is the SHA-256 of the payload bytes.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result type for blob operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in a blob backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(BlobId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid blob handle: {0}")]
    InvalidHandle(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Handle of a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId([u8; 32]);

impl BlobId {
    /// Compute the id of some payload
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes =
            hex::decode(hex_str).map_err(|_| StorageError::InvalidHandle(hex_str.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StorageError::InvalidHandle(hex_str.to_string()))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Payload backend used by the workspace store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload, returning its handle. Storing the same bytes twice is a no-op.
    async fn put(&self, data: Bytes) -> Result<BlobId>;

    /// Fetch a payload by handle
    async fn get(&self, id: BlobId) -> Result<Bytes>;

    /// Make stored payloads durable
    fn persist(&self) -> Result<()> {
        Ok(())
    }
}

/// Blob store on a Fjall keyspace
pub struct FjallBlobStore {
    db: Arc<fjall::Database>,
    blobs: Arc<fjall::Keyspace>,
}

impl FjallBlobStore {
    /// Open or create a blob store at `path`
    pub fn open(path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let db = fjall::Database::builder(path)
            .open()
            .map_err(|e| StorageError::Database(format!("Failed to open blob store: {}", e)))?;

        let blobs = db
            .keyspace("blobs", || fjall::KeyspaceCreateOptions::default())
            .map_err(|e| StorageError::Database(format!("Failed to open blobs keyspace: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            blobs: Arc::new(blobs),
        })
    }
}

#[async_trait]
impl BlobStore for FjallBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobId> {
        let id = BlobId::from_data(&data);
        let key = id.to_hex();

        let present = self
            .blobs
            .get(&key)
            .map_err(|e| StorageError::Database(format!("Put lookup failed: {}", e)))?
            .is_some();
        if !present {
            self.blobs
                .insert(&key, data.as_ref())
                .map_err(|e| StorageError::Database(format!("Put failed: {}", e)))?;
        }

        Ok(id)
    }

    async fn get(&self, id: BlobId) -> Result<Bytes> {
        let key = id.to_hex();

        self.blobs
            .get(&key)
            .map_err(|e| StorageError::Database(format!("Get failed: {}", e)))?
            .map(|v| Bytes::from(v.to_vec()))
            .ok_or(StorageError::NotFound(id))
    }

    fn persist(&self) -> Result<()> {
        self.db
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| StorageError::Database(format!("Failed to persist: {}", e)))?;
        Ok(())
    }
}

/// In-memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct payloads held
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobId> {
        let id = BlobId::from_data(&data);
        self.blobs.write().await.entry(id).or_insert(data);
        Ok(id)
    }

    async fn get(&self, id: BlobId) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }
}
