//! Identifier codec: pure conversions between identities, storage keys and opaque IDs.
//!
//! Key layout under the store-wide prefix:
//!
//! ```text
//! {prefix}{type}/{layer0}[/{layer1}]/{variant}     final, content-addressed
//! {prefix}{staging_dir}/{token}/{variant}          staged, before identity is known
//! ```
//!
//! Opaque IDs join the type and layers with [`ID_DELIMITER`], which never appears in a
//! hash layer, so an ID fits in a single path segment or URL component.

use crate::types::{is_variant_name, MediaEntryIdentifier, MediaFileIdentifier, MediaType, StagingToken};
use crate::{MediaConfig, MediaError, MediaResult};

/// Delimiter between the components of an opaque ID
pub const ID_DELIMITER: char = '.';

/// Separator between key segments
pub const KEY_SEPARATOR: char = '/';

/// Encode an entry identifier as its opaque external ID
pub fn encode_id(identifier: &MediaEntryIdentifier) -> String {
    let mut id = identifier.media_type().as_str().to_string();
    for layer in identifier.hash_layers() {
        id.push(ID_DELIMITER);
        id.push_str(layer);
    }
    id
}

/// Decode an opaque ID back into an entry identifier
pub fn decode_id(id: &str) -> MediaResult<MediaEntryIdentifier> {
    let mut parts = id.split(ID_DELIMITER);
    let type_part = parts.next().unwrap_or_default();
    let media_type = MediaType::parse(type_part)
        .ok_or_else(|| MediaError::malformed_id(id, format!("unknown media type {:?}", type_part)))?;

    let layers: Vec<String> = parts.map(str::to_string).collect();
    if layers.is_empty() {
        return Err(MediaError::malformed_id(id, "no hash layers"));
    }

    MediaEntryIdentifier::new(media_type, layers)
        .map_err(|e| MediaError::malformed_id(id, e.to_string()))
}

/// Maps identities to keys under a fixed store-wide prefix
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    staging_dir: String,
}

impl KeyCodec {
    pub fn new<P: Into<String>, S: Into<String>>(prefix: P, staging_dir: S) -> Self {
        Self {
            prefix: prefix.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.prefix.clone(), config.staging_dir.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}{type}/{layer0}/{layer1}/…`
    pub fn entry_key(&self, identifier: &MediaEntryIdentifier) -> String {
        let mut key = format!("{}{}", self.prefix, identifier.media_type());
        for layer in identifier.hash_layers() {
            key.push(KEY_SEPARATOR);
            key.push_str(layer);
        }
        key
    }

    /// Listing prefix matching exactly the variants of one entry
    pub fn entry_prefix(&self, identifier: &MediaEntryIdentifier) -> String {
        format!("{}{}", self.entry_key(identifier), KEY_SEPARATOR)
    }

    /// Listing prefix matching every entry sharing the identifier's first layer
    pub fn bucket_prefix(&self, identifier: &MediaEntryIdentifier) -> String {
        format!(
            "{}{}{}{}{}",
            self.prefix,
            identifier.media_type(),
            KEY_SEPARATOR,
            identifier.coarse_layer(),
            KEY_SEPARATOR
        )
    }

    /// `entry_key + "/" + variant`
    pub fn file_key(&self, file: &MediaFileIdentifier) -> String {
        format!("{}{}{}", self.entry_key(&file.entry), KEY_SEPARATOR, file.variant)
    }

    /// Parse a final object key back into its file identifier
    pub fn parse_file_key(&self, key: &str) -> MediaResult<MediaFileIdentifier> {
        let relative = key
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| MediaError::malformed_id(key, "key is outside the store prefix"))?;

        let segments: Vec<&str> = relative.split(KEY_SEPARATOR).collect();
        let (type_segment, rest) = segments
            .split_first()
            .ok_or_else(|| MediaError::malformed_id(key, "empty key"))?;
        let media_type = MediaType::parse(type_segment)
            .ok_or_else(|| MediaError::malformed_id(key, format!("unknown media type {:?}", type_segment)))?;

        let (variant, layers) = match rest.split_last() {
            Some((variant, layers)) if !layers.is_empty() => (*variant, layers),
            _ => return Err(MediaError::malformed_id(key, "no hash layers")),
        };
        if !is_variant_name(variant) {
            return Err(MediaError::malformed_id(key, format!("invalid variant name {:?}", variant)));
        }

        let entry = MediaEntryIdentifier::new(media_type, layers.iter().map(|l| l.to_string()).collect())
            .map_err(|e| MediaError::malformed_id(key, e.to_string()))?;

        Ok(entry.with_variant(variant))
    }

    /// `{prefix}{staging_dir}/`
    pub fn staging_root(&self) -> String {
        format!("{}{}{}", self.prefix, self.staging_dir, KEY_SEPARATOR)
    }

    /// `{prefix}{staging_dir}/{token}/{variant}`
    pub fn staging_key(&self, token: &StagingToken, variant: &str) -> String {
        format!("{}{}{}{}", self.staging_root(), token, KEY_SEPARATOR, variant)
    }

    /// Recover the staging token from a staged object key
    pub fn parse_staging_key(&self, key: &str) -> Option<StagingToken> {
        let relative = key.strip_prefix(self.staging_root().as_str())?;
        let (token, _variant) = relative.split_once(KEY_SEPARATOR)?;
        Some(StagingToken::from_string(token.to_string()))
    }
}
