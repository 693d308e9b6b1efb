//! # dog-media: Content-addressable media storage
//!
//! `dog-media` stores media under keys derived from the content itself. Generic
//! files are addressed by a SHA-256 digest, so byte-identical uploads dedup.
//! Images are addressed by a coarse and a fine perceptual digest, so near
//! duplicates land in the same bucket and can be ranked by similarity.
//!
//! ## Key Features
//!
//! - **Streaming uploads**: variants are staged while the identity is computed,
//!   the body is never held back waiting for its hash
//! - **Race-safe dedup**: identical concurrent inserts resolve to one winner and
//!   harmless losers
//! - **Similarity search**: query by content or by a previously issued ID
//! - **Pluggable variants**: per-call plans of named transform stages
//! - **Storage agnostic**: S3-compatible buckets, in-memory, or your own `MediaStore`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_media::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> MediaResult<()> {
//! let store = S3MediaStore::new(S3Config::from_env()?).await;
//! let media = MediaManager::new(store, HttpFetcher::new(), MediaConfig::from_env())?;
//!
//! let insertion = media.insert("https://example.com/cat.jpg", None).await?;
//! match insertion.completion.await {
//!     Ok(()) => println!("stored at {}", insertion.entry.url(None)?),
//!     Err(e) if e.is_conflict() => println!("already stored as {}", insertion.entry.id),
//!     Err(e) => return Err(e),
//! }
//!
//! let similar = media.query(MediaQuery::Id(insertion.entry.id.clone())).await?;
//! for hit in similar.hits {
//!     println!("{:.3} {}", hit.similarity, hit.entry.id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │    MediaManager    │  ← insert / get / query
//! ├─────────┬──────────┤
//! │ Upload  │Similarity│  ← staging + promotion, ranking
//! │Coordin. │  Engine  │
//! ├─────────┴──────────┤
//! │     MediaStore     │  ← storage primitives
//! └────────────────────┘
//! ```

mod config;
mod coordinator;
mod entry;
mod error;
pub mod fetch;
pub mod hash;
pub mod keys;
mod manager;
mod memory_store;
pub mod perceptual;
mod s3_store;
pub mod similarity;
pub mod store;
mod types;
pub mod variants;

// Re-export main types for clean API
pub use config::{ImageHashRules, MediaConfig};
pub use coordinator::{Insertion, UploadCompletion, UploadCoordinator};
pub use entry::{MediaEntry, MediaFile, QueryInfo, SearchHit, SearchResult};
pub use error::{MediaError, MediaResult};
pub use fetch::{FetchedSource, HttpFetcher, SourceFetcher};
pub use hash::ContentHasher;
pub use manager::{MediaManager, MediaQuery};
pub use memory_store::MemoryStore;
pub use perceptual::{BlockHasher, PerceptualHasher};
pub use s3_store::{S3Config, S3MediaStore};
pub use store::{MediaStore, PutResult};
pub use types::{
    ByteStream, MediaEntryIdentifier, MediaFileIdentifier, MediaType, StagingToken, ORIGINAL_VARIANT,
};
pub use variants::{
    DefaultPlanner, ImageResize, Passthrough, PlanRequest, VariantPlanner, VariantSetting, VariantTransform,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteStream, HttpFetcher, MediaConfig, MediaEntry, MediaError, MediaManager, MediaQuery,
        MediaResult, MediaStore, MediaType, MemoryStore, S3Config, S3MediaStore, SearchResult,
    };
}
