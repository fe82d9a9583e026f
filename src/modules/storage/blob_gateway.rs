use async_trait::async_trait;

use crate::core::error::Result;

/// Object storage as seen by the messaging core.
///
/// Implementations hold no bytes themselves; they pass uploads through to the
/// backend and issue time-limited signed URLs for reads.
#[async_trait]
pub trait BlobGateway: Send + Sync {
    /// Store `data` under `path` and return the storage key to persist.
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String>;

    /// Issue a signed URL granting read access to `key` for `ttl_secs` seconds.
    async fn signed_url(&self, key: &str, ttl_secs: u32) -> Result<String>;
}
