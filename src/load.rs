// src/load.rs

use anyhow::anyhow;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use tracing::info;

use crate::{
    error::PipelineError,
    warehouse::{TableId, Warehouse},
};

/// Result of a confirmed destination write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub table: TableId,
    pub rows_written: u64,
}

/// `YYYY_MM_DD` for the run date.
pub fn version_suffix(run_date: NaiveDate) -> String {
    run_date.format("%Y_%m_%d").to_string()
}

/// The versioned destination for `run_date`: `<base>_<YYYY_MM_DD>`.
pub fn destination_table(base: &TableId, run_date: NaiveDate) -> TableId {
    base.with_suffix(&version_suffix(run_date))
}

/// Overwrite the run's destination table with `batch` and wait for the
/// warehouse to confirm every row landed.
pub async fn load_to_warehouse(
    warehouse: &dyn Warehouse,
    base: &TableId,
    run_date: NaiveDate,
    batch: &RecordBatch,
) -> Result<LoadOutcome, PipelineError> {
    let table = destination_table(base, run_date);
    info!("Uploading cleaned data to BigQuery table: {}", table);

    let write_error = |source: anyhow::Error| PipelineError::Write {
        table: table.to_string(),
        source,
    };

    let rows_written = warehouse
        .overwrite_table(&table, batch)
        .await
        .map_err(write_error)?;

    let expected = batch.num_rows() as u64;
    if rows_written != expected {
        return Err(write_error(anyhow!(
            "warehouse confirmed {} rows, expected {}",
            rows_written,
            expected
        )));
    }

    info!("Data uploaded to BigQuery successfully");
    Ok(LoadOutcome {
        table,
        rows_written,
    })
}
