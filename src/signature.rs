use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::perceptual;

/// The two perceptual descriptors computed for one image.
///
/// A signature is computed exactly once per path and never mutated; the
/// store only recomputes when it has no cached entry for the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    path: PathBuf,
    /// 64-bit gradient hash, compared by hamming distance.
    local_hash: Vec<u8>,
    /// Run-length-compressed luma grid, decompressed on demand.
    global_vector: Vec<u8>,
    #[serde(skip)]
    decompressed: OnceLock<Vec<u8>>,
}

impl Signature {
    pub fn new(path: &Path, local_hash: Vec<u8>, global_vector: Vec<u8>) -> Self {
        Self {
            path: path.to_path_buf(),
            local_hash,
            global_vector,
            decompressed: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn global(&self) -> &[u8] {
        self.decompressed
            .get_or_init(|| perceptual::decompress(&self.global_vector))
    }
}

/// Hamming distance between the local hashes, in [0, 64].
pub fn local_distance(a: &Signature, b: &Signature) -> u32 {
    a.local_hash
        .iter()
        .zip(&b.local_hash)
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum()
}

/// Structural distance scaled into the same [0, 64] integer range.
pub fn global_distance(a: &Signature, b: &Signature) -> u32 {
    (perceptual::structural_distance(a.global(), b.global()) * 64.0) as u32
}

/// Unified distance: the more optimistic of the two metrics.
///
/// The descriptors are complementary; one reads fine local gradients, the
/// other global structure. Requiring both to agree loses matches where one
/// metric is thrown off by a minor crop or rotation the other tolerates.
pub fn distance(a: &Signature, b: &Signature) -> u32 {
    local_distance(a, b).min(global_distance(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perceptual::compress;

    fn sig(path: &str, local: Vec<u8>, global: &[u8]) -> Signature {
        Signature::new(Path::new(path), local, compress(global))
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = sig("/a.jpg", vec![0xAB; 8], &[40; 81]);
        assert_eq!(distance(&a, &a), 0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = sig("/a.jpg", vec![0b1010_1010; 8], &[10; 81]);
        let b = sig("/b.jpg", vec![0b0101_0101; 8], &[200; 81]);
        assert_eq!(distance(&a, &b), distance(&b, &a));
        assert_eq!(local_distance(&a, &b), local_distance(&b, &a));
        assert_eq!(global_distance(&a, &b), global_distance(&b, &a));
    }

    #[test]
    fn unified_distance_takes_the_smaller_metric() {
        // Opposite local hashes but identical global vectors: the unified
        // distance follows the optimistic global metric.
        let a = sig("/a.jpg", vec![0x00; 8], &[120; 81]);
        let b = sig("/b.jpg", vec![0xFF; 8], &[120; 81]);
        assert_eq!(local_distance(&a, &b), 64);
        assert_eq!(global_distance(&a, &b), 0);
        assert_eq!(distance(&a, &b), 0);

        // And the other way around.
        let c = sig("/c.jpg", vec![0x0F; 8], &[0; 81]);
        let d = sig("/d.jpg", vec![0x0F; 8], &[255; 81]);
        assert_eq!(local_distance(&c, &d), 0);
        assert_eq!(distance(&c, &d), 0);
    }

    #[test]
    fn distances_stay_in_range() {
        let a = sig("/a.jpg", vec![0x00; 8], &[0; 81]);
        let b = sig("/b.jpg", vec![0xFF; 8], &[255; 81]);
        assert!(local_distance(&a, &b) <= 64);
        assert!(global_distance(&a, &b) <= 64);
        assert!(distance(&a, &b) <= 64);
    }
}
