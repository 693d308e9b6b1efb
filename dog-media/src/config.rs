use crate::{MediaError, MediaResult, MediaType};

/// Size of 1 MiB in bytes
const MIB: u64 = 1024 * 1024;

/// Configuration for media operations
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Store-wide key prefix prepended verbatim to every key (e.g. `"media/"`)
    pub prefix: String,

    /// Directory (under `prefix`) holding staged uploads before their identity is known
    pub staging_dir: String,

    /// Absolute max size allowed for a single source (safety guard)
    pub max_source_bytes: u64,

    /// Rules for perceptual image hashing
    pub image_hashing: ImageHashRules,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            staging_dir: "temp".to_string(),
            max_source_bytes: 5 * 1024 * MIB, // 5GB
            image_hashing: ImageHashRules::default(),
        }
    }
}

/// Rules for perceptual image hashing
#[derive(Debug, Clone)]
pub struct ImageHashRules {
    /// Images whose declared size exceeds this are downsampled before hashing
    pub downsample_threshold_bytes: u64,

    /// Longest side (pixels) of a downsampled image; aspect ratio is preserved
    pub downsample_max_dimension: u32,

    /// Grid size of the coarse digest (`grid * grid` bits), used as the bucket key
    pub coarse_grid: u32,

    /// Grid size of the fine digest (`grid * grid` bits), used for ranking
    pub fine_grid: u32,
}

impl Default for ImageHashRules {
    fn default() -> Self {
        Self {
            downsample_threshold_bytes: MIB,
            downsample_max_dimension: 512,
            coarse_grid: 4,
            fine_grid: 16,
        }
    }
}

impl MediaConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with the key prefix taken from `MEDIA_STORE_PREFIX`, if set
    pub fn from_env() -> Self {
        match std::env::var("MEDIA_STORE_PREFIX") {
            Ok(prefix) => Self::default().with_prefix(prefix),
            Err(_) => Self::default(),
        }
    }

    /// Set the store-wide key prefix
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the staging directory name
    pub fn with_staging_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Set max source size
    pub fn with_max_source_bytes(mut self, bytes: u64) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    /// Set image hashing rules
    pub fn with_image_hashing(mut self, rules: ImageHashRules) -> Self {
        self.image_hashing = rules;
        self
    }

    /// Check that the configured keys can't collide with entry keys
    pub fn validate(&self) -> MediaResult<()> {
        // Keys end up verbatim in S3 copy sources, which are not percent-encoded
        if !self.prefix.chars().all(is_key_char) {
            return Err(MediaError::invalid(format!(
                "Key prefix {:?} may only contain ASCII letters, digits, '-', '_', '.' and '/'",
                self.prefix
            )));
        }
        if self.staging_dir.is_empty() || !self.staging_dir.chars().all(|c| c != '/' && is_key_char(c)) {
            return Err(MediaError::invalid(format!(
                "Staging directory {:?} must be a single non-empty key segment",
                self.staging_dir
            )));
        }
        if MediaType::parse(&self.staging_dir).is_some() {
            return Err(MediaError::invalid(format!(
                "Staging directory {:?} shadows a media type",
                self.staging_dir
            )));
        }
        if self.max_source_bytes == 0 {
            return Err(MediaError::invalid("max_source_bytes must be positive"));
        }

        let rules = &self.image_hashing;
        if rules.coarse_grid < 2 || rules.fine_grid < 2 {
            return Err(MediaError::invalid("Perceptual grids must be at least 2x2"));
        }
        if rules.downsample_max_dimension == 0 {
            return Err(MediaError::invalid("Downsample bound must be positive"));
        }
        Ok(())
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

impl ImageHashRules {
    /// Create new image hashing rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the downsample threshold
    pub fn with_downsample_threshold(mut self, bytes: u64) -> Self {
        self.downsample_threshold_bytes = bytes;
        self
    }

    /// Set the longest side of downsampled images
    pub fn with_downsample_max_dimension(mut self, pixels: u32) -> Self {
        self.downsample_max_dimension = pixels;
        self
    }

    /// Set coarse and fine grid sizes
    pub fn with_grids(mut self, coarse: u32, fine: u32) -> Self {
        self.coarse_grid = coarse;
        self.fine_grid = fine;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MediaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_dir, "temp");
        assert_eq!(config.image_hashing.coarse_grid * config.image_hashing.coarse_grid, 16);
        assert_eq!(config.image_hashing.fine_grid * config.image_hashing.fine_grid, 256);
    }

    #[test]
    fn staging_dir_must_not_shadow_entries() {
        assert!(MediaConfig::new().with_staging_dir("image").validate().is_err());
        assert!(MediaConfig::new().with_staging_dir("a/b").validate().is_err());
        assert!(MediaConfig::new().with_staging_dir("").validate().is_err());
        assert!(MediaConfig::new().with_staging_dir("uploads").validate().is_ok());
    }

    #[test]
    fn prefix_must_be_url_safe() {
        assert!(MediaConfig::new().with_prefix("media/v1.2/").validate().is_ok());
        assert!(MediaConfig::new().with_prefix("my media/").validate().is_err());
        assert!(MediaConfig::new().with_prefix("a+b/").validate().is_err());
        assert!(MediaConfig::new().with_prefix("100%/").validate().is_err());
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        let config = MediaConfig::new().with_image_hashing(ImageHashRules::new().with_grids(1, 16));
        assert!(config.validate().is_err());
    }
}
