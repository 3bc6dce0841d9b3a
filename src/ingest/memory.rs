use crate::error::{AppError, Result};
use crate::ingest::{derive::derive_table, RecordLoader};
use crate::models::RawTable;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Serves registered tables by source name (for tests and embedding)
#[derive(Clone, Default)]
pub struct InMemoryRecordLoader {
    tables: Arc<DashMap<String, RawTable>>,
}

impl InMemoryRecordLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the table served for `source`
    pub fn insert(&self, source: impl Into<String>, table: RawTable) {
        self.tables.insert(source.into(), table);
    }

    pub fn remove(&self, source: &str) -> Option<RawTable> {
        self.tables.remove(source).map(|(_, table)| table)
    }
}

#[async_trait]
impl RecordLoader for InMemoryRecordLoader {
    async fn load(&self, source: &str) -> Result<RawTable> {
        let mut table = self
            .tables
            .get(source)
            .map(|entry| entry.clone())
            .ok_or_else(|| AppError::DataUnavailable(format!("Unknown source '{}'", source)))?;

        derive_table(&mut table);
        Ok(table)
    }
}
