//! Sheet access for tabula: data sources, the TTL cache in front of them
//! and the row operations that execute compiled query plans.

pub mod access;
pub mod cache;
pub mod fixtures;
pub mod ops;
pub mod source;

pub use access::{DataAccessError, DataAccessLayer, GetRequest, PlanOutput};
pub use cache::{CacheKey, CacheStats, DataCache, TtlPolicy};
pub use fixtures::{demo_dataset, demo_source};
pub use source::{DataSource, InMemoryDataSource, SheetGrid, SourceError};
