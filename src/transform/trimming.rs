use arrow::{array::StringArray, record_batch::RecordBatch};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::transform::utils::{column_index, replace_column, string_column};

/// Strip leading/trailing whitespace from every value of `column`.
/// With `blank_as_null`, values that are empty after stripping become null.
pub fn trim_column(
    batch: &RecordBatch,
    column: &str,
    blank_as_null: bool,
) -> Result<RecordBatch, PipelineError> {
    let idx = column_index(batch, column)?;
    let sarr = string_column(batch, idx)?;

    let trimmed: StringArray = sarr
        .iter()
        .map(|opt| {
            opt.map(str::trim)
                .filter(|s| !(blank_as_null && s.is_empty()))
        })
        .collect();

    replace_column(batch, idx, Arc::new(trimmed))
}
