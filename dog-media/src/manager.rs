use std::sync::Arc;
use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::coordinator::{Insertion, UploadCoordinator};
use crate::keys::{decode_id, encode_id, KeyCodec};
use crate::perceptual::PerceptualHasher;
use crate::similarity::SimilarityEngine;
use crate::types::is_variant_name;
use crate::variants::{DefaultPlanner, VariantPlanner};
use crate::{
    ByteStream, ContentHasher, MediaConfig, MediaEntry, MediaEntryIdentifier, MediaError, MediaFile,
    MediaResult, MediaStore, QueryInfo, SearchResult, SourceFetcher, ORIGINAL_VARIANT,
};

/// What a similarity query is driven by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaQuery {
    /// Fetch and hash the content, exactly as an insert would
    Url(String),

    /// A previously issued opaque ID; nothing is fetched
    Id(String),
}

/// The media store: insert, look up and search content-addressed media.
///
/// Holds no per-entry state; every call re-reads the backing store.
pub struct MediaManager {
    store: Arc<dyn MediaStore>,
    fetcher: Arc<dyn SourceFetcher>,
    keys: KeyCodec,
    hasher: ContentHasher,
    planner: Arc<dyn VariantPlanner>,
    config: MediaConfig,
}

impl MediaManager {
    /// Create a manager over `store`, fetching sources with `fetcher`
    pub fn new<S, F>(store: S, fetcher: F, config: MediaConfig) -> MediaResult<Self>
    where
        S: MediaStore + 'static,
        F: SourceFetcher + 'static,
    {
        config.validate()?;

        Ok(Self {
            store: Arc::new(store),
            fetcher: Arc::new(fetcher),
            keys: KeyCodec::from_config(&config),
            hasher: ContentHasher::new(config.image_hashing.clone()),
            planner: Arc::new(DefaultPlanner),
            config,
        })
    }

    /// Replace the store-wide default variant plan
    pub fn with_variant_planner<P: VariantPlanner + 'static>(mut self, planner: P) -> Self {
        self.planner = Arc::new(planner);
        self
    }

    /// Replace the perceptual hash primitive used for images
    pub fn with_perceptual_hasher<P: PerceptualHasher + 'static>(mut self, hasher: P) -> Self {
        self.hasher = self.hasher.with_perceptual_hasher(hasher);
        self
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MediaStore> {
        &self.store
    }

    fn coordinator(&self) -> UploadCoordinator {
        UploadCoordinator::new(
            self.store.clone(),
            self.fetcher.clone(),
            self.hasher.clone(),
            self.keys.clone(),
            self.config.max_source_bytes,
        )
    }

    fn similarity(&self) -> SimilarityEngine {
        SimilarityEngine::new(self.store.clone(), self.keys.clone())
    }

    /// Insert the content at `url`, with an optional per-call variant plan.
    ///
    /// The returned entry is usable once `completion` resolves to `Ok`. A
    /// completion of `AlreadyExists` means identical content is already stored
    /// under the same ID.
    pub async fn insert(&self, url: &str, planner: Option<&dyn VariantPlanner>) -> MediaResult<Insertion> {
        let planner = planner.unwrap_or(self.planner.as_ref());
        self.coordinator().insert(url, planner).await
    }

    /// Rank stored entries against content or an ID
    #[instrument(skip(self))]
    pub async fn query(&self, query: MediaQuery) -> MediaResult<SearchResult> {
        let identifier = match query {
            MediaQuery::Id(id) => decode_id(&id)?,
            MediaQuery::Url(url) => self.identify(&url).await?,
        };

        let hits = self.similarity().search(&identifier).await?;
        debug!("Query matched {} entries", hits.len());

        Ok(SearchResult {
            query_info: QueryInfo {
                id: encode_id(&identifier),
                media_type: identifier.media_type(),
            },
            hits,
        })
    }

    /// Fetch and hash a source without storing anything
    async fn identify(&self, url: &str) -> MediaResult<MediaEntryIdentifier> {
        let source = self.fetcher.fetch(url).await?;
        let media_type = source.media_type()?;
        if source.content_length > self.config.max_source_bytes {
            return Err(MediaError::invalid(format!(
                "Source size {} exceeds maximum {}",
                source.content_length, self.config.max_source_bytes
            )));
        }

        let layers = self
            .hasher
            .hash(media_type, source.body, source.content_length, &source.content_type)
            .await?;
        MediaEntryIdentifier::new(media_type, layers)
    }

    /// Look up an entry by ID; `None` when no variant of it is stored
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> MediaResult<Option<MediaEntry>> {
        let identifier = decode_id(id)?;
        let entries = self
            .similarity()
            .entries_under(&self.keys.entry_prefix(&identifier))
            .await?;

        Ok(entries.into_iter().find(|entry| entry.identifier() == &identifier))
    }

    /// Handle to one variant (default `original`); existence is not checked
    pub fn file(&self, id: &str, variant: Option<&str>) -> MediaResult<MediaFile> {
        let identifier = decode_id(id)?;
        let variant = variant.unwrap_or(ORIGINAL_VARIANT);
        if !is_variant_name(variant) {
            return Err(MediaError::invalid(format!("Invalid variant name {:?}", variant)));
        }
        Ok(MediaFile::new(
            identifier.with_variant(variant),
            &self.keys,
            self.store.clone(),
        ))
    }

    /// Stream one variant's content
    pub async fn content(&self, id: &str, variant: Option<&str>) -> MediaResult<ByteStream> {
        self.file(id, variant)?.open().await
    }

    /// Delete staged objects older than `max_age`; returns how many were removed.
    ///
    /// Staged objects of failed or conflicting inserts are never reachable via
    /// a content key, so this is the only thing that reclaims them.
    #[instrument(skip(self))]
    pub async fn sweep_staging(&self, max_age: Duration) -> MediaResult<usize> {
        let cutoff = Utc::now() - max_age;
        let staged = self.store.list(&self.keys.staging_root()).await?;

        let mut removed = 0;
        for key in staged {
            let created_at = match self.keys.parse_staging_key(&key).and_then(|token| token.created_at()) {
                Some(created_at) => created_at,
                None => {
                    warn!("Ignoring staged object with unrecognized key {}", key);
                    continue;
                }
            };
            if created_at >= cutoff {
                continue;
            }

            match self.store.delete(&key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to delete stale staged object {}: {}", key, e),
            }
        }

        if removed > 0 {
            info!("Swept {} stale staged objects", removed);
        }
        Ok(removed)
    }
}
