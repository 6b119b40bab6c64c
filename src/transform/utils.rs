use arrow::{
    array::{ArrayRef, StringArray},
    compute::cast,
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::sync::Arc;

use crate::error::PipelineError;

/// Position of `name` in the batch, or `MissingColumn`.
pub fn column_index(batch: &RecordBatch, name: &str) -> Result<usize, PipelineError> {
    batch
        .schema()
        .index_of(name)
        .map_err(|_| PipelineError::MissingColumn {
            column: name.to_string(),
        })
}

/// Column `idx` as a Utf8 array, casting non-string columns first.
pub fn string_column(batch: &RecordBatch, idx: usize) -> Result<StringArray, PipelineError> {
    let col = batch.column(idx);
    let utf8 = match col.data_type() {
        DataType::Utf8 => col.clone(),
        _ => cast(col, &DataType::Utf8)?,
    };
    utf8.as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| {
            ArrowError::CastError(format!("column {} did not cast to Utf8", idx)).into()
        })
}

/// Swap column `idx` for `array`, updating the field's type to match.
pub fn replace_column(
    batch: &RecordBatch,
    idx: usize,
    array: ArrayRef,
) -> Result<RecordBatch, PipelineError> {
    let schema = batch.schema();
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if i == idx {
                Field::clone(f)
                    .with_data_type(array.data_type().clone())
                    .with_nullable(true)
            } else {
                Field::clone(f)
            }
        })
        .collect();

    let mut columns = batch.columns().to_vec();
    columns[idx] = array;

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}
