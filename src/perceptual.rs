use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig};

use crate::error::Error;
use crate::signature::Signature;

/// Side length of the global structural vector grid.
const GRID_SIZE: u32 = 9;

fn hasher() -> Hasher {
    HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher()
}

/// Computes both perceptual descriptors for one image.
///
/// Returns `Ok(None)` when the image decodes but cannot be analyzed (zero
/// dimension); the path is left without a signature and retried on the next
/// run. Open and decode failures are hard errors.
pub fn compute_signature(path: &Path) -> Result<Option<Signature>, Error> {
    let img = ImageReader::open(path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode())
        .map_err(|source| Error::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })?;

    let Some(vector) = global_structural_vector(&img) else {
        log::debug!("cannot analyze {}, skipping", path.display());
        return Ok(None);
    };
    let hash = hasher().hash_image(&img);
    Ok(Some(Signature::new(
        path,
        hash.as_bytes().to_vec(),
        compress(&vector),
    )))
}

/// Average-luma grid over the whole frame: coarse global structure that is
/// robust to small local edits.
pub fn global_structural_vector(img: &DynamicImage) -> Option<Vec<u8>> {
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    let cells = img
        .resize_exact(GRID_SIZE, GRID_SIZE, FilterType::Triangle)
        .to_luma8();
    Some(cells.into_raw())
}

/// Normalized euclidean distance between two structural vectors, in [0, 1].
pub fn structural_distance(a: &[u8], b: &[u8]) -> f64 {
    let diff = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt();
    let norm = |v: &[u8]| v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt();
    let denom = norm(a) + norm(b);
    if denom == 0.0 { 0.0 } else { diff / denom }
}

/// Run-length encodes a structural vector as (count, value) byte pairs.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = data.iter();
    let Some(&first) = iter.next() else {
        return out;
    };
    let mut value = first;
    let mut count = 1u8;
    for &byte in iter {
        if byte == value && count < u8::MAX {
            count += 1;
        } else {
            out.push(count);
            out.push(value);
            value = byte;
            count = 1;
        }
    }
    out.push(count);
    out.push(value);
    out
}

pub fn decompress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for pair in data.chunks_exact(2) {
        out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
    }
    out
}

/// Reads image dimensions from the file header without a full decode.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    image::image_dimensions(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature;
    use image::{ImageBuffer, Luma, Rgb};
    use tempfile::TempDir;

    #[test]
    fn compress_round_trips() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![7],
            vec![0, 0, 0, 1, 2, 2, 2, 2, 3],
            vec![9u8; 600], // run longer than a single count byte
            (0..=255).collect(),
        ];
        for case in cases {
            assert_eq!(decompress(&compress(&case)), case);
        }
    }

    #[test]
    fn structural_distance_properties() {
        let a = vec![120u8; 81];
        let b = vec![10u8; 81];
        assert_eq!(structural_distance(&a, &a), 0.0);
        assert_eq!(structural_distance(&a, &b), structural_distance(&b, &a));
        let d = structural_distance(&a, &b);
        assert!(d > 0.0 && d <= 1.0);
        // Two all-zero vectors are identical, not undefined.
        assert_eq!(structural_distance(&[0; 81], &[0; 81]), 0.0);
    }

    #[test]
    fn signature_of_a_real_image_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gradient.png");
        let img = ImageBuffer::from_fn(32, 32, |x, y| Luma([(x * 4 + y * 4) as u8]));
        img.save(&path).unwrap();

        let first = compute_signature(&path).unwrap().expect("signature");
        let second = compute_signature(&path).unwrap().expect("signature");
        assert_eq!(signature::distance(&first, &second), 0);
    }

    #[test]
    fn identical_pixels_give_identical_signatures() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let img = ImageBuffer::from_fn(16, 16, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 128]));
        img.save(&a).unwrap();
        img.save(&b).unwrap();

        let sig_a = compute_signature(&a).unwrap().expect("signature");
        let sig_b = compute_signature(&b).unwrap().expect("signature");
        assert_eq!(signature::distance(&sig_a, &sig_b), 0);
    }

    #[test]
    fn unreadable_file_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-an-image.jpg");
        std::fs::write(&path, b"plain text").unwrap();
        let err = compute_signature(&path).unwrap_err();
        assert!(matches!(err, Error::UnreadableImage { .. }));
    }
}
