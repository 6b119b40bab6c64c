// src/extract.rs

use arrow::{
    datatypes::{Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};

use crate::{
    error::PipelineError,
    warehouse::{TableId, Warehouse},
};

/// Trim, lowercase, and turn spaces into underscores: `" Release Year"` → `"release_year"`.
pub fn normalize_column_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Rename every column of `batch` with [`normalize_column_name`].
/// Data, types and row count are untouched.
pub fn normalize_columns(batch: &RecordBatch) -> Result<RecordBatch, PipelineError> {
    let schema = batch.schema();
    let mut seen = HashSet::new();
    let fields: Vec<_> = schema
        .fields()
        .iter()
        .map(|f| {
            let name = normalize_column_name(f.name());
            if !seen.insert(name.clone()) {
                warn!("duplicate column `{}` after normalizing names", name);
            }
            Field::clone(f).with_name(name)
        })
        .collect();

    let renamed = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        renamed,
        batch.columns().to_vec(),
        &options,
    )?)
}

/// Pull the full source table and normalize its column names.
pub async fn load_raw_data(
    warehouse: &dyn Warehouse,
    source: &TableId,
) -> Result<RecordBatch, PipelineError> {
    info!("Loading raw data from BigQuery");
    let raw = warehouse
        .read_table(source)
        .await
        .map_err(|e| PipelineError::DataAccess {
            table: source.to_string(),
            source: e,
        })?;

    let batch = normalize_columns(&raw)?;
    info!(
        "Loaded {} rows and {} columns",
        batch.num_rows(),
        batch.num_columns()
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::MemoryWarehouse;
    use anyhow::Result;
    use arrow::array::{ArrayRef, Int64Array, StringArray};

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("Release Year"), "release_year");
        assert_eq!(normalize_column_name("  Title "), "title");
        assert_eq!(normalize_column_name("Date Added On"), "date_added_on");
        assert_eq!(normalize_column_name("show_id"), "show_id");
    }

    #[test]
    fn test_normalize_column_name_idempotent() {
        for raw in ["Release Year", " COUNTRY", "listed in ", "type", "Duration  Min"] {
            let once = normalize_column_name(raw);
            assert_eq!(normalize_column_name(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_normalize_columns_keeps_data() -> Result<()> {
        let batch = RecordBatch::try_from_iter(vec![
            (
                " Title",
                Arc::new(StringArray::from(vec![Some("A"), None])) as ArrayRef,
            ),
            (
                "Release Year",
                Arc::new(Int64Array::from(vec![Some(2020), Some(2021)])) as ArrayRef,
            ),
        ])?;

        let out = normalize_columns(&batch)?;
        let names: Vec<String> = out
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["title", "release_year"]);
        assert_eq!(out.num_rows(), 2);
        assert_eq!(out.column(1).data_type(), batch.column(1).data_type());
        Ok(())
    }

    #[test]
    fn test_normalize_columns_zero_columns() -> Result<()> {
        let options = RecordBatchOptions::new().with_row_count(Some(3));
        let empty = RecordBatch::try_new_with_options(Arc::new(Schema::empty()), vec![], &options)?;
        let out = normalize_columns(&empty)?;
        assert_eq!(out.num_rows(), 3);
        assert_eq!(out.num_columns(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_raw_data_normalizes() -> Result<()> {
        let source = TableId::new("p", "d", "netflix_raw");
        let batch = RecordBatch::try_from_iter(vec![(
            "Show ID",
            Arc::new(StringArray::from(vec!["s1", "s2", "s3"])) as ArrayRef,
        )])?;
        let wh = MemoryWarehouse::new().with_table(&source, batch);

        let out = load_raw_data(&wh, &source).await?;
        assert_eq!(out.num_rows(), 3);
        assert_eq!(out.schema().field(0).name(), "show_id");
        Ok(())
    }

    #[tokio::test]
    async fn test_load_raw_data_missing_table() {
        let wh = MemoryWarehouse::new();
        let err = load_raw_data(&wh, &TableId::new("p", "d", "netflix_raw"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataAccess { .. }));
        assert!(err.to_string().contains("p.d.netflix_raw"));
    }
}
