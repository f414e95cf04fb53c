pub mod batch;
pub mod duplicates;
pub mod error;
pub mod normalize;
pub mod perceptual;
pub mod planner;
pub mod progress;
pub mod scan;
pub mod signature;
pub mod store;

pub use error::Error;
