use arrow::{
    array::{Array, StringArray},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;
use crate::transform::utils::{column_index, replace_column, string_column};

/// Replace nulls in `column` with the literal `fill`.
pub fn fill_nulls(
    batch: &RecordBatch,
    column: &str,
    fill: &str,
) -> Result<RecordBatch, PipelineError> {
    let idx = column_index(batch, column)?;
    let sarr = string_column(batch, idx)?;

    let missing = sarr.null_count();
    let filled: StringArray = sarr.iter().map(|opt| Some(opt.unwrap_or(fill))).collect();
    debug!(column, missing, fill, "filled nulls");

    replace_column(batch, idx, Arc::new(filled))
}
