use arrow::{
    array::BooleanArray,
    compute::{and, filter_record_batch, is_not_null},
    record_batch::RecordBatch,
};

use crate::error::PipelineError;
use crate::transform::utils::column_index;

/// Keep only rows where every column in `required` is non-null.
pub fn drop_incomplete_rows(
    batch: &RecordBatch,
    required: &[&str],
) -> Result<RecordBatch, PipelineError> {
    let mut mask: Option<BooleanArray> = None;
    for name in required {
        let idx = column_index(batch, name)?;
        let present = is_not_null(batch.column(idx).as_ref())?;
        mask = Some(match mask {
            Some(m) => and(&m, &present)?,
            None => present,
        });
    }

    match mask {
        Some(m) => Ok(filter_record_batch(batch, &m)?),
        None => Ok(batch.clone()),
    }
}
