pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod replication;
pub mod schema;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
