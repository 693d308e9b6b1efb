use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::RwLock;

use crate::{ByteStream, MediaError, MediaResult, MediaStore, PutResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// In-memory store for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, in order
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Content type an object was stored with
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|o| o.content_type.clone())
    }

    /// Raw content of an object
    pub fn data(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|o| o.data.clone())
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn list(&self, prefix: &str) -> MediaResult<Vec<String>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> MediaResult<ByteStream> {
        let data = self
            .data(key)
            .ok_or_else(|| MediaError::not_found(key))?;
        Ok(Box::pin(futures_util::stream::once(async move { Ok(data) })))
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        mut stream: ByteStream,
    ) -> MediaResult<PutResult> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let data = buffer.freeze();
        let size_bytes = data.len() as u64;
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );

        Ok(PutResult {
            etag: None,
            size_bytes,
        })
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn rename(&self, from: &str, to: &str) -> MediaResult<()> {
        let mut objects = self.objects.write();
        if objects.contains_key(to) {
            return Err(MediaError::already_exists(to));
        }
        let object = objects
            .remove(from)
            .ok_or_else(|| MediaError::not_found(from))?;
        objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> MediaResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
