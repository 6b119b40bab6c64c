// src/warehouse/arrow.rs

use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{
        ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringArray, StringBuilder,
        TimestampMicrosecondBuilder,
    },
    compute::{cast_with_options, CastOptions},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::bigquery::{TableFieldSchema, TableRow};

/// Timezone carried by BigQuery `TIMESTAMP` columns.
pub const UTC: &str = "UTC";

/// Map a BigQuery column type + mode into an Arrow DataType.
///
/// - INTEGER, INT64     → Int64
/// - FLOAT, FLOAT64     → Float64
/// - BOOLEAN, BOOL      → Boolean
/// - TIMESTAMP          → Timestamp(µs, "UTC")
/// - DATETIME           → Timestamp(µs)
/// - DATE               → Date32
/// - TIME               → Time64(µs)
/// - NUMERIC            → Decimal128(38, 9)
/// - REPEATED (any)     → Utf8 (JSON array)
/// - RECORD, STRUCT     → Utf8 (JSON object)
/// - fallback           → Utf8
pub fn map_to_arrow_type(ty: &str, mode: Option<&str>) -> DataType {
    if mode.is_some_and(|m| m.eq_ignore_ascii_case("REPEATED")) {
        return DataType::Utf8;
    }
    match ty.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => DataType::Int64,
        "FLOAT" | "FLOAT64" => DataType::Float64,
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
        "DATETIME" => DataType::Timestamp(TimeUnit::Microsecond, None),
        "DATE" => DataType::Date32,
        "TIME" => DataType::Time64(TimeUnit::Microsecond),
        "NUMERIC" | "DECIMAL" => DataType::Decimal128(38, 9),
        _ => DataType::Utf8,
    }
}

/// Build an Arrow schema from the query result's field list.
pub fn build_arrow_schema(fields: &[TableFieldSchema]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|f| Field::new(&f.name, map_to_arrow_type(&f.ty, f.mode.as_deref()), true))
            .collect::<Vec<_>>(),
    )
}

/// Convert REST rows (`{"f": [{"v": ...}]}`) into a single RecordBatch.
pub fn rows_to_record_batch(fields: &[TableFieldSchema], rows: &[TableRow]) -> Result<RecordBatch> {
    let schema = Arc::new(build_arrow_schema(fields));

    for (r, row) in rows.iter().enumerate() {
        if row.f.len() != fields.len() {
            return Err(anyhow!(
                "row {} has {} cells but the schema has {} fields",
                r,
                row.f.len(),
                fields.len()
            ));
        }
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (i, (bq_field, field)) in fields.iter().zip(schema.fields().iter()).enumerate() {
        let cells = rows.iter().map(|row| &row.f[i].v);
        let col = build_column(bq_field, field.data_type(), cells)
            .with_context(|| format!("converting column `{}`", field.name()))?;
        columns.push(col);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    RecordBatch::try_new_with_options(schema, columns, &options).context("assembling result batch")
}

fn build_column<'a>(
    field: &TableFieldSchema,
    ty: &DataType,
    cells: impl Iterator<Item = &'a Value>,
) -> Result<ArrayRef> {
    match ty {
        DataType::Int64 => {
            let mut b = Int64Builder::new();
            for v in cells {
                b.append_option(scalar_text(v).map(|s| s.parse::<i64>()).transpose()?);
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::new();
            for v in cells {
                b.append_option(scalar_text(v).map(|s| s.parse::<f64>()).transpose()?);
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::new();
            for v in cells {
                let parsed = match scalar_text(v) {
                    Some(s) if s.eq_ignore_ascii_case("true") => Some(true),
                    Some(s) if s.eq_ignore_ascii_case("false") => Some(false),
                    Some(s) => return Err(anyhow!("invalid boolean {:?}", s)),
                    None => None,
                };
                b.append_option(parsed);
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Timestamp(TimeUnit::Microsecond, Some(tz)) => {
            let mut b = TimestampMicrosecondBuilder::new().with_timezone(tz.clone());
            for v in cells {
                b.append_option(scalar_text(v).map(|s| parse_timestamp_micros(&s)).transpose()?);
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Timestamp(..)
        | DataType::Date32
        | DataType::Time64(_)
        | DataType::Decimal128(..) => {
            // BigQuery sends these as canonical text; let arrow's parser do the work
            let text: StringArray = cells.map(scalar_text).collect();
            let strict = CastOptions {
                safe: false,
                ..Default::default()
            };
            Ok(cast_with_options(&text, ty, &strict)?)
        }
        _ => {
            let nested = field.is_repeated() || field.is_record();
            let mut b = StringBuilder::new();
            for v in cells {
                match v {
                    Value::Null => b.append_null(),
                    Value::String(s) if !nested => b.append_value(s),
                    other if nested => b.append_value(plain_json(other, field).to_string()),
                    other => b.append_value(other.to_string()),
                }
            }
            Ok(Arc::new(b.finish()))
        }
    }
}

/// BigQuery sends every scalar as a JSON string; tolerate bare JSON scalars too.
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `TIMESTAMP` cell to epoch microseconds. Integer text is already micros
/// (`useInt64Timestamp`); float text such as `"1.6326288E9"` is seconds.
pub fn parse_timestamp_micros(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.contains(|c| matches!(c, '.' | 'e' | 'E')) {
        let secs: f64 = s
            .parse()
            .with_context(|| format!("invalid timestamp {:?}", s))?;
        Ok((secs * 1_000_000.0).round() as i64)
    } else {
        s.parse()
            .with_context(|| format!("invalid timestamp {:?}", s))
    }
}

/// Strip the REST `{"v": ..}` / `{"f": [..]}` wrappers from a nested cell:
/// repeated values become a JSON array, records a JSON object keyed by
/// sub-field name.
fn plain_json(v: &Value, field: &TableFieldSchema) -> Value {
    if !field.is_repeated() {
        return plain_element(v, field);
    }
    match v {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| plain_element(item.get("v").unwrap_or(&Value::Null), field))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn plain_element(v: &Value, field: &TableFieldSchema) -> Value {
    if !field.is_record() {
        return v.clone();
    }
    match v.get("f") {
        Some(Value::Array(cells)) => {
            let mut obj = Map::new();
            for (sub, cell) in field.fields.iter().zip(cells) {
                let inner = cell.get("v").unwrap_or(&Value::Null);
                obj.insert(sub.name.clone(), plain_json(inner, sub));
            }
            Value::Object(obj)
        }
        _ => v.clone(),
    }
}
