pub mod derive;
pub mod file;
pub mod memory;

pub use file::FileRecordLoader;
pub use memory::InMemoryRecordLoader;

use crate::error::Result;
use crate::models::RawTable;
use async_trait::async_trait;

/// Supplier of raw training tables.
///
/// Implementations report every failure to produce a table as
/// `AppError::DataUnavailable`.
#[async_trait]
pub trait RecordLoader: Send + Sync {
    /// Load the table named by `source`, with derived columns filled in
    async fn load(&self, source: &str) -> Result<RawTable>;
}
