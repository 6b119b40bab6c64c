use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array, Int64Builder, StringArray, UInt64Array},
    compute::cast,
    datatypes::DataType,
    error::ArrowError,
    record_batch::RecordBatch,
    util::display::array_value_to_string,
};
use std::sync::Arc;

use crate::config::CoercionPolicy;
use crate::error::PipelineError;
use crate::transform::utils::{column_index, replace_column};

/// Column values viewed through the widest type we can coerce from.
enum IntSource {
    Signed(Int64Array),
    Unsigned(UInt64Array),
    Float(Float64Array),
    Text(StringArray),
    Unsupported,
}

impl IntSource {
    fn from_array(col: &ArrayRef) -> Result<Self, PipelineError> {
        Ok(match col.data_type() {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => IntSource::Signed(downcast(&cast(col, &DataType::Int64)?)?),
            DataType::UInt64 => IntSource::Unsigned(downcast(col)?),
            DataType::Float16 | DataType::Float32 | DataType::Float64 => {
                IntSource::Float(downcast(&cast(col, &DataType::Float64)?)?)
            }
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                IntSource::Text(downcast(&cast(col, &DataType::Utf8)?)?)
            }
            _ => IntSource::Unsupported,
        })
    }

    /// Integer at `i`, or `None` when the (non-null) value is not one.
    fn value(&self, i: usize) -> Option<i64> {
        match self {
            IntSource::Signed(a) => Some(a.value(i)),
            IntSource::Unsigned(a) => i64::try_from(a.value(i)).ok(),
            IntSource::Float(a) => integral_f64(a.value(i)),
            IntSource::Text(a) => parse_int_text(a.value(i)),
            IntSource::Unsupported => None,
        }
    }
}

fn downcast<T: Array + Clone + 'static>(arr: &ArrayRef) -> Result<T, PipelineError> {
    arr.as_any().downcast_ref::<T>().cloned().ok_or_else(|| {
        ArrowError::CastError(format!("unexpected array type {}", arr.data_type())).into()
    })
}

/// Whole-number text only: `" 2020 "` is fine, `"2020.5"`, `""` and `"n/a"` are not.
pub fn parse_int_text(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

/// Finite floats with no fractional part that fit in an i64.
pub fn integral_f64(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Coerce `column` to Int64. Nulls stay null.
///
/// Under [`CoercionPolicy::Abort`] the first value that is not an integer
/// fails with `TypeCoercion`. Under [`CoercionPolicy::Quarantine`] such values
/// become null; the returned count says how many were nulled.
pub fn coerce_to_int64(
    batch: &RecordBatch,
    column: &str,
    policy: CoercionPolicy,
) -> Result<(RecordBatch, usize), PipelineError> {
    let idx = column_index(batch, column)?;
    let col = batch.column(idx);

    match col.data_type() {
        DataType::Int64 => return Ok((batch.clone(), 0)),
        DataType::Null => {
            let mut b = Int64Builder::with_capacity(col.len());
            b.append_nulls(col.len());
            let out = replace_column(batch, idx, Arc::new(b.finish()))?;
            return Ok((out, 0));
        }
        _ => {}
    }

    let source = IntSource::from_array(col)?;
    let mut b = Int64Builder::with_capacity(col.len());
    let mut quarantined = 0;

    for row in 0..col.len() {
        if col.is_null(row) {
            b.append_null();
            continue;
        }
        match source.value(row) {
            Some(v) => b.append_value(v),
            None => match policy {
                CoercionPolicy::Abort => {
                    return Err(PipelineError::TypeCoercion {
                        column: column.to_string(),
                        row,
                        value: array_value_to_string(col, row).unwrap_or_default(),
                    });
                }
                CoercionPolicy::Quarantine => {
                    b.append_null();
                    quarantined += 1;
                }
            },
        }
    }

    let out = replace_column(batch, idx, Arc::new(b.finish()))?;
    Ok((out, quarantined))
}
