use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::{MediaError, MediaResult};

/// Stream of bytes for media content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Variant name every plan starts with and every accessor defaults to
pub const ORIGINAL_VARIANT: &str = "original";

/// Kind of media, derived from the family of the source content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
    File,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [Self::Image, Self::Audio, Self::Video, Self::File];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
        }
    }

    /// Parse the exact lowercase name used in keys and IDs
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Classify a declared content type by its family (the part before `/`).
    /// Unknown families are `File`; an empty content type is an input error.
    pub fn from_content_type(content_type: &str) -> MediaResult<Self> {
        let family = content_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match family.as_str() {
            "" => Err(MediaError::invalid("Missing content type")),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            _ => Ok(Self::File),
        }
    }

    /// Number of hash layers an identity of this type carries
    pub fn hash_layer_count(&self) -> usize {
        match self {
            Self::Image => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a logical media entry: a directory-like group of variants
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaEntryIdentifier {
    media_type: MediaType,
    hash_layers: Vec<String>,
}

impl MediaEntryIdentifier {
    /// Build an identifier, checking the layer count for the type and that every
    /// layer is a non-empty URL-safe segment
    pub fn new(media_type: MediaType, hash_layers: Vec<String>) -> MediaResult<Self> {
        if hash_layers.len() != media_type.hash_layer_count() {
            return Err(MediaError::malformed_id(
                hash_layers.join("/"),
                format!(
                    "{} identity needs {} hash layer(s), got {}",
                    media_type,
                    media_type.hash_layer_count(),
                    hash_layers.len()
                ),
            ));
        }
        if let Some(bad) = hash_layers.iter().find(|layer| !is_hash_layer(layer)) {
            return Err(MediaError::malformed_id(bad.clone(), "hash layer is not URL-safe base64"));
        }

        Ok(Self {
            media_type,
            hash_layers,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn hash_layers(&self) -> &[String] {
        &self.hash_layers
    }

    /// Layer 0: the exact digest for generic files, the coarse bucket digest for images
    pub fn coarse_layer(&self) -> &str {
        &self.hash_layers[0]
    }

    /// The last layer: the fine ranking digest for images
    pub fn fine_layer(&self) -> &str {
        &self.hash_layers[self.hash_layers.len() - 1]
    }

    pub fn with_variant<S: Into<String>>(&self, variant: S) -> MediaFileIdentifier {
        MediaFileIdentifier {
            entry: self.clone(),
            variant: variant.into(),
        }
    }
}

/// Identifies one concrete stored object: an entry plus a variant name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaFileIdentifier {
    pub entry: MediaEntryIdentifier,
    pub variant: String,
}

/// Process- and time-unique name of one insert's staging namespace.
///
/// Format: `{unix_millis}_{random}`. Never derived from content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StagingToken(String);

impl StagingToken {
    /// Generate a new token stamped with the current time
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Generate a new token stamped with the given time
    pub fn at(time: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", time.timestamp_millis(), Uuid::new_v4().simple()))
    }

    /// Wrap an existing token string (e.g. a directory found while listing)
    pub fn from_string(token: String) -> Self {
        Self(token)
    }

    /// Creation time embedded in the token, if it is well-formed
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let (millis, _) = self.0.split_once('_')?;
        Utc.timestamp_millis_opt(millis.parse().ok()?).single()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StagingToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StagingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hash layer is a non-empty base64url string
pub(crate) fn is_hash_layer(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A variant name is one key segment: no separators, no dot-only names
pub(crate) fn is_variant_name(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_families() {
        assert_eq!(MediaType::from_content_type("image/jpeg").unwrap(), MediaType::Image);
        assert_eq!(MediaType::from_content_type("Audio/MPEG").unwrap(), MediaType::Audio);
        assert_eq!(MediaType::from_content_type("video/mp4").unwrap(), MediaType::Video);
        assert_eq!(
            MediaType::from_content_type("text/plain; charset=utf-8").unwrap(),
            MediaType::File
        );
        assert_eq!(MediaType::from_content_type("application").unwrap(), MediaType::File);
        assert!(matches!(
            MediaType::from_content_type(""),
            Err(MediaError::Invalid { .. })
        ));
    }

    #[test]
    fn identifier_layer_count_is_type_determined() {
        assert!(MediaEntryIdentifier::new(MediaType::File, vec!["abc".into()]).is_ok());
        assert!(MediaEntryIdentifier::new(MediaType::File, vec![]).is_err());
        assert!(MediaEntryIdentifier::new(MediaType::Image, vec!["abc".into()]).is_err());
        assert!(MediaEntryIdentifier::new(MediaType::Audio, vec!["a".into(), "b".into()]).is_err());

        let image = MediaEntryIdentifier::new(MediaType::Image, vec!["c".into(), "f".into()]).unwrap();
        assert_eq!(image.coarse_layer(), "c");
        assert_eq!(image.fine_layer(), "f");
    }

    #[test]
    fn identifier_rejects_unsafe_layers() {
        assert!(MediaEntryIdentifier::new(MediaType::File, vec!["a/b".into()]).is_err());
        assert!(MediaEntryIdentifier::new(MediaType::File, vec!["a.b".into()]).is_err());
        assert!(MediaEntryIdentifier::new(MediaType::File, vec!["".into()]).is_err());
    }

    #[test]
    fn staging_token_embeds_creation_time() {
        let time = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let token = StagingToken::at(time);

        assert!(token.as_str().starts_with("1700000000123_"));
        assert_eq!(token.created_at(), Some(time));
        assert_ne!(StagingToken::at(time), token);
        assert_eq!(StagingToken::from_string("garbage".into()).created_at(), None);
    }

    #[test]
    fn variant_names() {
        assert!(is_variant_name("original"));
        assert!(is_variant_name("webp100w"));
        assert!(is_variant_name("thumb.png"));
        assert!(!is_variant_name("a/b"));
        assert!(!is_variant_name(".."));
        assert!(!is_variant_name(""));
    }
}
