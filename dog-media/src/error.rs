use thiserror::Error;

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media operations
///
/// Variants fall into five classes. Input errors (`Invalid`, `MalformedId`) and
/// processing errors are never worth retrying. I/O class errors (`Io`, `Fetch`,
/// `Backend`, `UploadFailed`) are safe to retry as a whole insert or query.
/// `AlreadyExists` is the dedup signal and is not a failure of the store.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Malformed identifier {value:?}: {reason}")]
    MalformedId { value: String, reason: String },

    #[error("Image processing failed: {message}")]
    Processing { message: String },

    #[error("Media entry already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Media entry not found: {id}")]
    NotFound { id: String },

    #[error("Variant {variant} does not exist; available variants: {}", .available.join(", "))]
    VariantNotFound {
        variant: String,
        available: Vec<String>,
    },

    #[error("Failed to fetch source: {source}")]
    Fetch {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl MediaError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a fetch error from any transport error
    pub fn fetch<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Fetch {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a malformed identifier error
    pub fn malformed_id<V: Into<String>, R: Into<String>>(value: V, reason: R) -> Self {
        Self::MalformedId {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an image processing error
    pub fn processing<S: Into<String>>(message: S) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    /// Create an already exists (dedup) error
    pub fn already_exists<S: Into<String>>(id: S) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an upload failed error
    pub fn upload_failed<S: Into<String>>(reason: S) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    /// Whether repeating the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Fetch { .. } | Self::Backend { .. } | Self::UploadFailed { .. }
        )
    }

    /// Whether this is the "already exists" dedup signal
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<image::ImageError> for MediaError {
    fn from(error: image::ImageError) -> Self {
        Self::processing(error.to_string())
    }
}
