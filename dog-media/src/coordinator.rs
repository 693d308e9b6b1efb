//! Upload coordinator: streams a source into staging while hashing it, then
//! promotes the staged variants to their content-addressed keys.
//!
//! ```text
//! FETCHING -> STAGING + HASHING (concurrent) -> PROMOTING | DISCARDING -> DONE
//!                  any error before the identity is known -> FAILED
//! ```
//!
//! Staged objects live under `{prefix}{staging_dir}/{token}/{variant}` where the
//! token is time- and randomness-derived, so concurrent inserts never collide.
//! The identity (and with it every final key) is only known once hashing has
//! consumed the whole body; staging does not wait for it.
//!
//! Promotion moves the canonical variant first. The store refuses to overwrite
//! an existing key, which settles races between identical inserts: whoever moves
//! the canonical variant first wins, the loser discards its staged objects and
//! reports `AlreadyExists`. The remaining variants are moved independently, so a
//! failure part way can leave an entry with some variants missing; the canonical
//! variant is the authority for whether the entry exists.
//!
//! Staged objects of failed inserts are left behind and are only reachable via
//! their staging keys; `MediaManager::sweep_staging` removes them by age.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use futures_util::future::try_join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::keys::{encode_id, KeyCodec};
use crate::variants::{validate_plan, PlanRequest, VariantPlanner, VariantSetting};
use crate::{
    ContentHasher, FetchedSource, MediaEntry, MediaEntryIdentifier, MediaError, MediaResult,
    MediaStore, MediaType, SourceFetcher, StagingToken,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Fetching,
    Staging,
    Hashing,
    Promoting,
    Discarding,
    Done,
    Failed,
}

fn enter(token: &StagingToken, state: UploadState) {
    debug!(token = %token, state = ?state, "upload state changed");
}

/// Resolves exactly once when an insert finishes in the background.
///
/// `Ok(())` means every variant was promoted. `AlreadyExists` means the content
/// was already stored (dedup), any other error is a failed upload. Dropping
/// this handle does not cancel promotion or cleanup.
#[derive(Debug)]
pub struct UploadCompletion {
    rx: oneshot::Receiver<MediaResult<()>>,
}

impl Future for UploadCompletion {
    type Output = MediaResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(MediaError::upload_failed(
                "upload task ended without reporting a result",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Outcome of starting an insert: the entry descriptor, available as soon as the
/// identity is known, and the completion of the background promotion.
///
/// The entry's URLs are only guaranteed to resolve after `completion` returns `Ok`.
#[derive(Debug)]
pub struct Insertion {
    pub entry: MediaEntry,
    pub completion: UploadCompletion,
}

/// Background staging of every variant. Aborted on drop unless handed off.
struct StagingTask {
    handle: Option<JoinHandle<MediaResult<()>>>,
}

impl StagingTask {
    fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Resolve when staging ends; on success the task is marked finished
    async fn finished(&mut self) -> MediaResult<()> {
        let result = match self.handle.as_mut() {
            Some(handle) => join_result(handle.await),
            None => Ok(()),
        };
        self.handle = None;
        result
    }

    async fn wait(mut self) -> MediaResult<()> {
        match self.handle.take() {
            Some(handle) => join_result(handle.await),
            None => Ok(()),
        }
    }
}

impl Drop for StagingTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

fn join_result(joined: Result<MediaResult<()>, tokio::task::JoinError>) -> MediaResult<()> {
    joined.map_err(|e| MediaError::upload_failed(format!("staging task failed: {}", e)))?
}

/// One variant's staging and final location
#[derive(Debug, Clone)]
struct VariantMove {
    staging_key: String,
    final_key: String,
}

/// Runs the insert protocol against a backing store
#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn MediaStore>,
    fetcher: Arc<dyn SourceFetcher>,
    hasher: ContentHasher,
    keys: KeyCodec,
    max_source_bytes: u64,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn MediaStore>,
        fetcher: Arc<dyn SourceFetcher>,
        hasher: ContentHasher,
        keys: KeyCodec,
        max_source_bytes: u64,
    ) -> Self {
        Self {
            store,
            fetcher,
            hasher,
            keys,
            max_source_bytes,
        }
    }

    /// Insert the content at `url`.
    ///
    /// Returns once the identity is known. Errors before that point (fetch,
    /// staging, hashing, the existence check) are returned directly and nothing
    /// is promoted. Later outcomes are delivered through the completion.
    #[instrument(skip(self, planner))]
    pub async fn insert(&self, url: &str, planner: &dyn VariantPlanner) -> MediaResult<Insertion> {
        let token = StagingToken::new();
        enter(&token, UploadState::Fetching);

        let FetchedSource {
            content_type,
            content_length,
            body,
        } = self.fetcher.fetch(url).await?;
        let media_type = MediaType::from_content_type(&content_type)?;
        if content_length > self.max_source_bytes {
            return Err(MediaError::invalid(format!(
                "Source size {} exceeds maximum {}",
                content_length, self.max_source_bytes
            )));
        }

        let plan = planner.plan(&PlanRequest {
            media_type,
            content_type: content_type.clone(),
            size: content_length,
        });
        validate_plan(&plan)?;
        let variant_names: Vec<String> = plan.iter().map(|s| s.name.clone()).collect();
        let staging_keys: Vec<String> = plan
            .iter()
            .map(|s| self.keys.staging_key(&token, &s.name))
            .collect();

        enter(&token, UploadState::Staging);
        let mut staging = StagingTask {
            handle: Some(tokio::spawn(stage_all(
                self.store.clone(),
                self.fetcher.clone(),
                url.to_string(),
                plan.into_iter().zip(staging_keys.iter().cloned()).collect(),
            ))),
        };

        enter(&token, UploadState::Hashing);
        let hashing = self.hasher.hash(media_type, body, content_length, &content_type);
        tokio::pin!(hashing);

        let layers = loop {
            let staging_running = staging.is_running();
            tokio::select! {
                layers = &mut hashing => break layers,
                staged = staging.finished(), if staging_running => {
                    if let Err(e) = staged {
                        enter(&token, UploadState::Failed);
                        warn!("Staging failed before identity was known: {}", e);
                        return Err(e);
                    }
                    debug!(token = %token, "all variants staged");
                }
            }
        };
        let layers = layers.inspect_err(|e| {
            enter(&token, UploadState::Failed);
            warn!("Hashing failed: {}", e);
        })?;

        let identifier = MediaEntryIdentifier::new(media_type, layers)?;
        let id = encode_id(&identifier);
        let moves: Vec<VariantMove> = variant_names
            .iter()
            .zip(staging_keys)
            .map(|(name, staging_key)| VariantMove {
                staging_key,
                final_key: self.keys.file_key(&identifier.with_variant(name.as_str())),
            })
            .collect();

        // Only meaningful now: the key depends on the full-body hash
        let exists = self.store.exists(&moves[0].final_key).await?;

        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        if exists {
            enter(&token, UploadState::Discarding);
            info!("Media entry {} already exists", id);
            let _ = tx.send(Err(MediaError::already_exists(id.clone())));
            tokio::spawn(async move {
                discard(store.as_ref(), staging, &moves).await;
                enter(&token, UploadState::Done);
            });
        } else {
            enter(&token, UploadState::Promoting);
            let promoted_id = id.clone();
            tokio::spawn(async move {
                let result = promote(store.as_ref(), staging, &moves, &promoted_id).await;
                match &result {
                    Ok(()) => {
                        info!("Promoted media entry {}", promoted_id);
                        enter(&token, UploadState::Done);
                    }
                    Err(e) if e.is_conflict() => enter(&token, UploadState::Done),
                    Err(e) => {
                        warn!("Promotion of {} failed: {}", promoted_id, e);
                        enter(&token, UploadState::Failed);
                    }
                }
                let _ = tx.send(result);
            });
        }

        Ok(Insertion {
            entry: MediaEntry::new(identifier, variant_names, self.keys.clone(), self.store.clone()),
            completion: UploadCompletion { rx },
        })
    }
}

/// Fetch, transform and stage every variant; each opens its own source stream
async fn stage_all(
    store: Arc<dyn MediaStore>,
    fetcher: Arc<dyn SourceFetcher>,
    url: String,
    jobs: Vec<(VariantSetting, String)>,
) -> MediaResult<()> {
    try_join_all(jobs.into_iter().map(|(setting, staging_key)| {
        stage_variant(store.as_ref(), fetcher.as_ref(), &url, setting, staging_key)
    }))
    .await?;
    Ok(())
}

async fn stage_variant(
    store: &dyn MediaStore,
    fetcher: &dyn SourceFetcher,
    url: &str,
    setting: VariantSetting,
    staging_key: String,
) -> MediaResult<()> {
    let source = fetcher.fetch(url).await?;
    let output = setting.transform.apply(source.body).await?;
    let result = store.put(&staging_key, &setting.content_type, output).await?;
    debug!(
        "Staged variant {} ({} bytes) at {}",
        setting.name, result.size_bytes, staging_key
    );
    Ok(())
}

/// Wait for staging, then move the canonical variant and the rest to their final keys
async fn promote(
    store: &dyn MediaStore,
    staging: StagingTask,
    moves: &[VariantMove],
    id: &str,
) -> MediaResult<()> {
    staging.wait().await?;

    let (canonical, rest) = moves
        .split_first()
        .ok_or_else(|| MediaError::upload_failed("nothing to promote"))?;

    match store.rename(&canonical.staging_key, &canonical.final_key).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            debug!("Lost promotion race for {}", id);
            delete_staged(store, moves).await;
            return Err(MediaError::already_exists(id));
        }
        Err(e) => return Err(e),
    }

    try_join_all(rest.iter().map(|m| async move {
        match store.rename(&m.staging_key, &m.final_key).await {
            Err(e) if e.is_conflict() => {
                debug!("Variant {} already promoted, dropping staged copy", m.final_key);
                store.delete(&m.staging_key).await
            }
            other => other,
        }
    }))
    .await?;

    Ok(())
}

/// Best-effort cleanup after a conflict; failures are logged, never returned
async fn discard(store: &dyn MediaStore, staging: StagingTask, moves: &[VariantMove]) {
    if let Err(e) = staging.wait().await {
        warn!("Staging of a duplicate upload failed: {}", e);
    }
    delete_staged(store, moves).await;
}

async fn delete_staged(store: &dyn MediaStore, moves: &[VariantMove]) {
    for m in moves {
        if let Err(e) = store.delete(&m.staging_key).await {
            warn!("Failed to delete staged object {}: {}", m.staging_key, e);
        }
    }
}
