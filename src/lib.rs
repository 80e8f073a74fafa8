pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod signature;
pub mod similarity;
pub mod store;
pub mod types;
mod utils;

pub use cache::ImageCache;
pub use catalog::Catalog;
pub use config::{CacheConfig, EngineConfig, Opts};
pub use error::{DecodeError, PipelineError, RebuildError, StoreError};
pub use index::{BucketIndex, Match, SignatureIndex};
pub use loader::{FileLoader, ImageLoader};
pub use pipeline::{HashPipeline, RunStatus, RunSummary, SignatureMap};
pub use signature::{Signature, compute_signature};
pub use similarity::SimilarityEngine;
pub use store::{LmdbSimilarityStore, MemorySimilarityStore, SimilarityStore, StoreRebuild};
pub use types::{ImageId, NeighborRecord};
