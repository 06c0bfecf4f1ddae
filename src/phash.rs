//! Perceptual image hashing and near-duplicate detection.
//!
//! Hashes are 64-bit average hashes compared by Hamming distance. Lookup
//! uses multi-index hashing: a hash is cut into `max_distance + 1` bands,
//! so two hashes within `max_distance` bits of each other agree on at least
//! one whole band and meet in that band's bucket.

use crate::error::Result;
use crate::meta::{DuplicateImage, MetaDb};
use image::imageops::FilterType;
use image::DynamicImage;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const PERCEPTUAL_HASH_SIZE: u32 = 8;

/// Hash plus the decoded dimensions of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFingerprint {
    pub hash: u64,
    pub width: u32,
    pub height: u32,
}

/// Decode image bytes and fingerprint them
pub fn fingerprint_image(bytes: &[u8]) -> Result<ImageFingerprint> {
    let image = image::load_from_memory(bytes)?;
    Ok(ImageFingerprint {
        hash: compute_perceptual_hash(&image),
        width: image.width(),
        height: image.height(),
    })
}

/// 8x8 luma average hash
pub fn compute_perceptual_hash(image: &DynamicImage) -> u64 {
    let gray = image.to_luma8();
    let resized = image::imageops::resize(
        &gray,
        PERCEPTUAL_HASH_SIZE,
        PERCEPTUAL_HASH_SIZE,
        FilterType::Triangle,
    );
    let total: u32 = resized.pixels().map(|p| p[0] as u32).sum();
    let avg = total / (PERCEPTUAL_HASH_SIZE * PERCEPTUAL_HASH_SIZE);

    let mut hash: u64 = 0;
    for (idx, pixel) in resized.pixels().enumerate() {
        if pixel[0] as u32 >= avg {
            hash |= 1u64 << idx;
        }
    }
    hash
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Cut a hash into `band_count` contiguous bit ranges (the first
/// `64 % band_count` bands get one extra bit).
pub fn split_bands(hash: u64, band_count: u32) -> Vec<u64> {
    let band_count = band_count.clamp(1, 64);
    let base = 64 / band_count;
    let extra = 64 % band_count;

    let mut bands = Vec::with_capacity(band_count as usize);
    let mut offset = 0u32;
    for band in 0..band_count {
        let width = base + u32::from(band < extra);
        let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
        bands.push((hash >> offset) & mask);
        offset += width;
    }
    bands
}

/// A near-duplicate found among fingerprints
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DuplicatePair {
    pub object_id: String,
    pub duplicate_of: String,
    pub distance: u32,
}

impl From<DuplicatePair> for DuplicateImage {
    fn from(pair: DuplicatePair) -> Self {
        DuplicateImage::new(pair.object_id, pair.duplicate_of, pair.distance)
    }
}

/// Band-bucketed near-duplicate detection
#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector {
    max_distance: u32,
}

impl DuplicateDetector {
    pub fn new(max_distance: u32) -> Self {
        Self {
            max_distance: max_distance.min(63),
        }
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    pub fn band_count(&self) -> u32 {
        self.max_distance + 1
    }

    pub fn is_duplicate(&self, a: u64, b: u64) -> bool {
        hamming_distance(a, b) <= self.max_distance
    }

    /// Pairs within the threshold among `items`. Each later item is reported
    /// as a duplicate of the earlier one it matches.
    pub fn find_duplicates(&self, items: &[(String, u64)]) -> Vec<DuplicatePair> {
        let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
        let mut pairs = Vec::new();

        for (idx, (object_id, hash)) in items.iter().enumerate() {
            let bands = split_bands(*hash, self.band_count());

            let mut candidates = BTreeSet::new();
            for (band_no, value) in bands.iter().enumerate() {
                if let Some(seen) = buckets.get(&(band_no, *value)) {
                    candidates.extend(seen.iter().copied());
                }
            }

            for earlier in candidates {
                let (earlier_id, earlier_hash) = &items[earlier];
                let distance = hamming_distance(*hash, *earlier_hash);
                if distance <= self.max_distance && earlier_id != object_id {
                    pairs.push(DuplicatePair {
                        object_id: object_id.clone(),
                        duplicate_of: earlier_id.clone(),
                        distance,
                    });
                }
            }

            for (band_no, value) in bands.into_iter().enumerate() {
                buckets.entry((band_no, value)).or_default().push(idx);
            }
        }

        pairs
    }

    /// Pairs between `items` (all from `document_id`) and fingerprints already
    /// stored for other live documents
    pub async fn find_in_index(
        &self,
        db: &MetaDb,
        document_id: &str,
        items: &[(String, u64)],
    ) -> Result<Vec<DuplicatePair>> {
        let mut pairs = Vec::new();
        for (object_id, hash) in items {
            let matches = db
                .find_band_matches(*hash, self.band_count(), document_id)
                .await?;
            for row in matches {
                let distance = hamming_distance(*hash, row.phash as u64);
                if distance <= self.max_distance {
                    debug!(
                        object_id = %object_id,
                        duplicate_of = %row.object_id,
                        distance,
                        "Near-duplicate image in index"
                    );
                    pairs.push(DuplicatePair {
                        object_id: object_id.clone(),
                        duplicate_of: row.object_id,
                        distance,
                    });
                }
            }
        }
        pairs.sort();
        Ok(pairs)
    }
}
