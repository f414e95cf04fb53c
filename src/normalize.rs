use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use exif::{In, Reader, Tag};
use image::DynamicImage;

/// Rewrites `path` to EXIF orientation 1 if needed, caching the result in
/// the backup directory so the EXIF scan runs once per file.
///
/// Returns the path the rest of the pipeline should use: the rewritten copy
/// when the image had to be rotated, the original otherwise. A zero-byte
/// marker in the backup directory records files that were already upright.
/// Files that cannot be inspected are used as-is.
pub fn normalize_orientation(backup_dir: &Path, path: &Path, ignore_cache: bool) -> PathBuf {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    if !matches!(extension.as_deref(), Some("jpg") | Some("jpeg")) {
        return path.to_path_buf();
    }

    let digest = blake3::hash(path.to_string_lossy().as_bytes());
    let cached = backup_dir.join(format!("{}.jpg", digest.to_hex()));
    if !ignore_cache && cached.exists() {
        let rewritten = fs::metadata(&cached).map(|meta| meta.len() > 0).unwrap_or(false);
        return if rewritten { cached } else { path.to_path_buf() };
    }

    match rewrite_upright(path, &cached) {
        Ok(true) => cached,
        Ok(false) => {
            // Zero-byte marker: orientation was already fine.
            let _ = File::create(&cached);
            path.to_path_buf()
        }
        Err(err) => {
            log::debug!("orientation check failed for {}: {err}", path.display());
            path.to_path_buf()
        }
    }
}

fn read_orientation(path: &Path) -> Option<u32> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    field.value.get_uint(0)
}

fn rewrite_upright(path: &Path, cached: &Path) -> Result<bool, image::ImageError> {
    let Some(orientation) = read_orientation(path) else {
        return Ok(false);
    };
    if !(2..=8).contains(&orientation) {
        return Ok(false);
    }
    let upright = apply_orientation(image::open(path)?, orientation);
    upright.save(cached)?;
    copy_file_times(path, cached);
    Ok(true)
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Carries the source's timestamps onto a copy so date-based cluster
/// ordering is unaffected. Failures are ignored; the copy itself succeeded.
pub(crate) fn copy_file_times(from: &Path, to: &Path) {
    let Ok(meta) = fs::metadata(from) else {
        return;
    };
    let mut times = fs::FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(file) = File::options().write(true).open(to) {
        let _ = file.set_times(times);
    }
}
