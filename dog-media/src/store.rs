use async_trait::async_trait;
use crate::{ByteStream, MediaResult};

/// Object storage primitives the media store is built on.
///
/// Keys are `/`-delimited strings and always include the store-wide prefix;
/// implementations treat them as opaque.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// List every object key starting with `prefix`, in lexicographic order
    async fn list(&self, prefix: &str) -> MediaResult<Vec<String>>;

    /// Open an object for streaming reads. Missing objects are `NotFound`.
    async fn get(&self, key: &str) -> MediaResult<ByteStream>;

    /// Store an object from a stream. A stream error aborts the write and is
    /// returned as an I/O error; no partial object becomes visible.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        stream: ByteStream,
    ) -> MediaResult<PutResult>;

    /// Check whether an object exists
    async fn exists(&self, key: &str) -> MediaResult<bool>;

    /// Move an object to a new key.
    ///
    /// Fails with `AlreadyExists` when `to` is already present. Stores with a
    /// conditional write make this atomic; others check first and document the
    /// window.
    async fn rename(&self, from: &str, to: &str) -> MediaResult<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> MediaResult<()>;

    /// Public URL an object can be downloaded from
    fn public_url(&self, key: &str) -> String;
}

/// Result of a successful put operation
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: Option<String>,
    pub size_bytes: u64,
}
