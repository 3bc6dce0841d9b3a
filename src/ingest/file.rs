use crate::error::{AppError, Result};
use crate::ingest::{derive::derive_table, RecordLoader};
use crate::models::{RawRecord, RawTable};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Loads `<data_dir>/<source>` as a JSON array (`.json`) or JSON lines
/// (`.jsonl`) of flat objects.
#[derive(Debug, Clone)]
pub struct FileRecordLoader {
    data_dir: PathBuf,
}

impl FileRecordLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn resolve(&self, source: &str) -> Result<PathBuf> {
        let relative = Path::new(source);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if source.is_empty() || escapes {
            return Err(AppError::DataUnavailable(format!(
                "source '{}' must be a relative path inside the data directory",
                source
            )));
        }
        Ok(self.data_dir.join(relative))
    }

    fn parse(source: &str, path: &Path, contents: &str) -> Result<Vec<RawRecord>> {
        let parse_err =
            |e: serde_json::Error| AppError::DataUnavailable(format!("Failed to parse '{}': {}", source, e));

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(contents).map_err(parse_err),
            Some("jsonl") => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str(line).map_err(parse_err))
                .collect(),
            _ => Err(AppError::DataUnavailable(format!(
                "unsupported source format for '{}'; expected .json or .jsonl",
                source
            ))),
        }
    }
}

#[async_trait]
impl RecordLoader for FileRecordLoader {
    async fn load(&self, source: &str) -> Result<RawTable> {
        let path = self.resolve(source)?;
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AppError::DataUnavailable(format!("Failed to read '{}': {}", source, e))
        })?;

        let mut table = RawTable::new(Self::parse(source, &path, &contents)?);
        derive_table(&mut table);

        tracing::debug!(source = %source, rows = table.len(), "Loaded raw records");
        Ok(table)
    }
}
