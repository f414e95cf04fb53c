use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

pub fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PHOTO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Recursively walk `root` collecting image files, pruning any directory
/// under one of the `ignore` prefixes. Results are sorted for deterministic
/// processing order.
pub fn scan_directory(root: &Path, ignore: &[PathBuf]) -> Vec<PathBuf> {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Scanning {}…", root.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut images = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !ignore.iter().any(|prefix| entry.path().starts_with(prefix)));
    for entry in walker.filter_map(Result::ok) {
        if entry.file_type().is_file() && is_photo(entry.path()) {
            images.push(entry.path().to_path_buf());
        }
        spinner.tick();
    }
    spinner.finish_and_clear();
    images.sort();
    images
}
