pub mod dedup;
pub mod fetch;
pub mod geocoder;
pub mod ingest;
pub mod normalizer;
pub mod pipeline;
pub mod rate_limit;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod validator;

pub use pipeline::{Pipeline, PipelineDeps, ProcessStats, StageFlags};
