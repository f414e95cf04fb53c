use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unreadable image {}: {source}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fingerprint cache {} is corrupt: {source}", path.display())]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode fingerprint cache: {0}")]
    CacheEncode(#[source] bincode::Error),

    #[error("failed to encode duplicates file: {0}")]
    DuplicatesEncode(#[from] serde_json::Error),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to install interrupt handler: {0}")]
    InterruptHandler(#[from] ctrlc::Error),
}
