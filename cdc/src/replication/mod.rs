mod apply;
mod consolidate;
mod discover;
mod history;
mod resolve;
mod schema_changes;
mod shard;

pub use apply::*;
pub use consolidate::*;
pub use discover::*;
pub use history::*;
pub use resolve::*;
pub use schema_changes::*;
pub use shard::*;
