use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::keys::{encode_id, KeyCodec};
use crate::{
    ByteStream, MediaEntryIdentifier, MediaError, MediaFileIdentifier, MediaResult, MediaStore,
    MediaType, ORIGINAL_VARIANT,
};

/// A media entry and the variants stored under it.
///
/// Returned by insert, get and query. Accessors default to the `original`
/// variant and fail with `VariantNotFound` for names the entry doesn't have.
#[derive(Clone, Serialize)]
pub struct MediaEntry {
    /// Opaque ID; callers must not parse it
    pub id: String,

    #[serde(rename = "type")]
    pub media_type: MediaType,

    /// Ordered, unique variant names
    pub variants: Vec<String>,

    #[serde(skip)]
    identifier: MediaEntryIdentifier,

    #[serde(skip)]
    keys: KeyCodec,

    #[serde(skip)]
    store: Arc<dyn MediaStore>,
}

impl MediaEntry {
    pub(crate) fn new(
        identifier: MediaEntryIdentifier,
        variants: Vec<String>,
        keys: KeyCodec,
        store: Arc<dyn MediaStore>,
    ) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(variants.len());
        for variant in variants {
            if !unique.contains(&variant) {
                unique.push(variant);
            }
        }

        Self {
            id: encode_id(&identifier),
            media_type: identifier.media_type(),
            variants: unique,
            identifier,
            keys,
            store,
        }
    }

    pub fn identifier(&self) -> &MediaEntryIdentifier {
        &self.identifier
    }

    /// Handle to one variant's stored object
    pub fn file(&self, variant: Option<&str>) -> MediaResult<MediaFile> {
        let variant = variant.unwrap_or(ORIGINAL_VARIANT);
        if !self.variants.iter().any(|v| v == variant) {
            return Err(MediaError::VariantNotFound {
                variant: variant.to_string(),
                available: self.variants.clone(),
            });
        }
        Ok(MediaFile::new(
            self.identifier.with_variant(variant),
            &self.keys,
            self.store.clone(),
        ))
    }

    /// Public URL of one variant
    pub fn url(&self, variant: Option<&str>) -> MediaResult<String> {
        Ok(self.file(variant)?.url())
    }
}

impl std::fmt::Debug for MediaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEntry")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("variants", &self.variants)
            .finish()
    }
}

impl PartialEq for MediaEntry {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.variants == other.variants
    }
}

/// One stored object of an entry. Creating a handle does not check existence.
#[derive(Clone)]
pub struct MediaFile {
    identifier: MediaFileIdentifier,
    key: String,
    store: Arc<dyn MediaStore>,
}

impl MediaFile {
    pub(crate) fn new(identifier: MediaFileIdentifier, keys: &KeyCodec, store: Arc<dyn MediaStore>) -> Self {
        let key = keys.file_key(&identifier);
        Self {
            identifier,
            key,
            store,
        }
    }

    pub fn identifier(&self) -> &MediaFileIdentifier {
        &self.identifier
    }

    pub fn variant(&self) -> &str {
        &self.identifier.variant
    }

    /// Storage key, including the store prefix
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> String {
        self.store.public_url(&self.key)
    }

    pub async fn exists(&self) -> MediaResult<bool> {
        self.store.exists(&self.key).await
    }

    /// Stream the variant's content
    pub async fn open(&self) -> MediaResult<ByteStream> {
        self.store.get(&self.key).await
    }
}

impl std::fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFile").field("key", &self.key).finish()
    }
}

/// ID and type of the queried content (the to-be ID if it was never inserted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

/// One ranked match
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// In `[0, 1]`; 1.0 means an identical fine digest
    pub similarity: f64,
    pub entry: MediaEntry,
}

/// Result of a similarity query, hits sorted by descending similarity
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(rename = "queryInfo")]
    pub query_info: QueryInfo,
    pub hits: Vec<SearchHit>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn entry(variants: &[&str]) -> MediaEntry {
        let identifier = MediaEntryIdentifier::new(MediaType::File, vec!["abc".into()]).unwrap();
        MediaEntry::new(
            identifier,
            variants.iter().map(|v| v.to_string()).collect(),
            KeyCodec::new("media/", "temp"),
            Arc::new(MemoryStore::new()),
        )
    }

    #[test]
    fn accessors_default_to_original() {
        let entry = entry(&["original", "thumb"]);

        assert_eq!(entry.id, "file.abc");
        assert_eq!(entry.url(None).unwrap(), "memory://media/file/abc/original");
        assert_eq!(entry.file(Some("thumb")).unwrap().key(), "media/file/abc/thumb");
    }

    #[test]
    fn missing_variant_lists_available_ones() {
        let entry = entry(&["original", "thumb", "webp100w"]);

        let err = entry.url(Some("doesNotExist")).unwrap_err();
        assert!(matches!(err, MediaError::VariantNotFound { .. }));
        assert_eq!(
            err.to_string(),
            "Variant doesNotExist does not exist; available variants: original, thumb, webp100w"
        );
    }

    #[test]
    fn missing_original_is_an_error_too() {
        let entry = entry(&["thumb"]);
        assert!(entry.file(None).is_err());
    }

    #[test]
    fn variants_are_unique_and_ordered() {
        let entry = entry(&["original", "thumb", "original"]);
        assert_eq!(entry.variants, vec!["original", "thumb"]);
    }

    #[test]
    fn serializes_public_fields_only() {
        let json = serde_json::to_value(entry(&["original"])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "file.abc", "type": "file", "variants": ["original"] })
        );
    }
}
