use std::collections::HashMap;
use std::sync::Arc;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::{debug, instrument, warn};

use crate::keys::KeyCodec;
use crate::{MediaEntry, MediaEntryIdentifier, MediaError, MediaResult, MediaStore, MediaType, SearchHit};

/// Number of differing bits between two base64url digests, and the bit width
/// they were compared over. Bytes past the shorter digest count as differing.
pub fn hamming_distance(a: &str, b: &str) -> MediaResult<(u32, u32)> {
    let a = decode_digest(a)?;
    let b = decode_digest(b)?;
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    let shared: u32 = short
        .iter()
        .zip(long.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum();
    let surplus = ((long.len() - short.len()) * 8) as u32;

    Ok((shared + surplus, (long.len() * 8) as u32))
}

/// `1 - distance / bits`, in `[0, 1]`
pub fn similarity(a: &str, b: &str) -> MediaResult<f64> {
    let (distance, bits) = hamming_distance(a, b)?;
    if bits == 0 {
        return Ok(1.0);
    }
    Ok(1.0 - f64::from(distance) / f64::from(bits))
}

fn decode_digest(digest: &str) -> MediaResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(digest)
        .map_err(|e| MediaError::malformed_id(digest, format!("digest is not base64url: {}", e)))
}

/// Finds and ranks stored entries similar to a query identity
#[derive(Clone)]
pub struct SimilarityEngine {
    store: Arc<dyn MediaStore>,
    keys: KeyCodec,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn MediaStore>, keys: KeyCodec) -> Self {
        Self { store, keys }
    }

    /// Entries sharing the query's first layer, best match first.
    ///
    /// Generic files match exactly, so every hit has similarity 1.0. Images are
    /// bucketed by the coarse digest and ranked by fine-digest Hamming distance.
    #[instrument(skip(self, query), fields(media_type = %query.media_type()))]
    pub async fn search(&self, query: &MediaEntryIdentifier) -> MediaResult<Vec<SearchHit>> {
        if query.media_type() == MediaType::Image {
            // A bad query digest fails the search; bad stored digests only skip their entry
            decode_digest(query.fine_layer())?;
        }

        let entries = self.entries_under(&self.keys.bucket_prefix(query)).await?;
        debug!("Found {} candidate entries", entries.len());

        let mut hits = Vec::with_capacity(entries.len());
        for entry in entries {
            let similarity = match query.media_type() {
                MediaType::Image => {
                    match similarity(query.fine_layer(), entry.identifier().fine_layer()) {
                        Ok(similarity) => similarity,
                        Err(e) => {
                            warn!("Skipping candidate {}: {}", entry.id, e);
                            continue;
                        }
                    }
                }
                _ => 1.0,
            };
            hits.push(SearchHit { similarity, entry });
        }

        // Stable: ties keep listing order
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        Ok(hits)
    }

    /// List every final object under `prefix` and group the variants per entry
    pub(crate) async fn entries_under(&self, prefix: &str) -> MediaResult<Vec<MediaEntry>> {
        let objects = self.store.list(prefix).await?;
        Ok(group_by_entry(&self.keys, objects)
            .into_iter()
            .map(|(identifier, variants)| {
                MediaEntry::new(identifier, variants, self.keys.clone(), self.store.clone())
            })
            .collect())
    }
}

/// Collapse object keys into one `(entry, variants)` pair per entry, in
/// discovery order. Keys that don't parse are skipped.
fn group_by_entry(keys: &KeyCodec, objects: Vec<String>) -> Vec<(MediaEntryIdentifier, Vec<String>)> {
    let mut groups: Vec<(MediaEntryIdentifier, Vec<String>)> = Vec::new();
    let mut index: HashMap<MediaEntryIdentifier, usize> = HashMap::new();

    for key in objects {
        let file = match keys.parse_file_key(&key) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring unrecognized object {}: {}", key, e);
                continue;
            }
        };

        match index.get(&file.entry) {
            Some(&i) => groups[i].1.push(file.variant),
            None => {
                index.insert(file.entry.clone(), groups.len());
                groups.push((file.entry, vec![file.variant]));
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_examples() {
        // 00ff00 vs itself
        assert_eq!(hamming_distance("AP8A", "AP8A").unwrap(), (0, 24));
        // 0001 0010 0011 0100 0101 0110 0111 1000 vs 0000 0011 0010 0101 0100 0111 0110 1001
        assert_eq!(hamming_distance("EjRWeA", "AyVHaQ").unwrap(), (8, 32));
        // 0000 0010 0111 1111 vs 1111 1101 1000 0000
        assert_eq!(hamming_distance("An8", "_YA").unwrap(), (16, 16));
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("AP8A", "AP8A").unwrap(), 1.0);
        assert_eq!(similarity("An8", "_YA").unwrap(), 0.0);
        assert_eq!(similarity("EjRWeA", "AyVHaQ").unwrap(), 0.75);
    }

    #[test]
    fn unequal_lengths_count_surplus_as_different() {
        // 00ff vs 00ff00: the surplus byte is counted as 8 differing bits
        assert_eq!(hamming_distance("AP8", "AP8A").unwrap(), (8, 24));
    }

    #[test]
    fn invalid_digest_is_rejected() {
        assert!(hamming_distance("AP8A", "not base64!").is_err());
    }

    #[test]
    fn grouping_collapses_variants() {
        let keys = KeyCodec::new("", "temp");
        let objects = vec![
            "image/c/f1/original".to_string(),
            "image/c/f1/thumb".to_string(),
            "image/c/f1/webp100w".to_string(),
            "image/c/f2/original".to_string(),
            "image/c/garbage".to_string(),
        ];

        let groups = group_by_entry(&keys, objects);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.fine_layer(), "f1");
        assert_eq!(groups[0].1, vec!["original", "thumb", "webp100w"]);
        assert_eq!(groups[1].1, vec!["original"]);
    }
}
