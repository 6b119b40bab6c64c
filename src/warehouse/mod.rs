// src/warehouse/mod.rs

pub mod arrow;
pub mod bigquery;
pub mod memory;
pub mod parquet;

pub use bigquery::BigQueryWarehouse;
pub use memory::MemoryWarehouse;

use ::arrow::record_batch::RecordBatch;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::error::PipelineError;

/// A fully qualified `project.dataset.table` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Parse `project.dataset.table`. Exactly three non-empty parts are accepted.
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [p, d, t] if !p.is_empty() && !d.is_empty() && !t.is_empty() => {
                Ok(Self::new(*p, *d, *t))
            }
            _ => Err(PipelineError::configuration(format!(
                "invalid table id {:?}, expected project.dataset.table",
                s
            ))),
        }
    }

    /// Same dataset, table name extended with `_<suffix>`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: format!("{}_{}", self.table, suffix),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// The data warehouse the pipeline reads from and writes to.
///
/// Both calls block the run until the warehouse has finished: `read_table`
/// returns the complete result set, `overwrite_table` returns only once the
/// write is confirmed.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a full scan of `table` and materialize every row.
    async fn read_table(&self, table: &TableId) -> Result<RecordBatch>;

    /// Replace the entire contents of `table` with `batch`, creating it if
    /// needed. Returns the number of rows the warehouse reports as written.
    async fn overwrite_table(&self, table: &TableId, batch: &RecordBatch) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id = TableId::parse("netflix-titles-463907.netflix_db.netflix_raw").unwrap();
        assert_eq!(id.project, "netflix-titles-463907");
        assert_eq!(id.dataset, "netflix_db");
        assert_eq!(id.table, "netflix_raw");
        assert_eq!(id.to_string(), "netflix-titles-463907.netflix_db.netflix_raw");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "a.b", "a..c", "a.b.c.d", ".b.c"] {
            assert!(TableId::parse(bad).is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_with_suffix() {
        let base = TableId::new("p", "d", "netflix_cleaned");
        assert_eq!(
            base.with_suffix("2024_03_05").to_string(),
            "p.d.netflix_cleaned_2024_03_05"
        );
    }
}
