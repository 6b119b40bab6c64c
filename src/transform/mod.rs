//! Field-level cleaning of the normalized Netflix titles batch.

pub mod convert;
pub mod fill;
pub mod filter;
pub mod trimming;
pub mod utils;

use arrow::record_batch::RecordBatch;
use tracing::{info, warn};

use crate::config::CoercionPolicy;
use crate::error::PipelineError;

pub const COUNTRY: &str = "country";
pub const RATING: &str = "rating";
pub const TITLE: &str = "title";
pub const TYPE: &str = "type";
pub const RELEASE_YEAR: &str = "release_year";

pub const UNKNOWN_COUNTRY: &str = "Unknown";
pub const UNRATED: &str = "Unrated";

/// Apply the cleaning rules, in order:
///
/// 1. null `country` → `"Unknown"`
/// 2. null `rating` → `"Unrated"`
/// 3. strip `title` (blank titles become null)
/// 4. strip `type`
/// 5. coerce `release_year` to Int64 (see [`convert::coerce_to_int64`])
/// 6. drop rows with a null `title` or `release_year`
///
/// Coercion runs before the null filter, so under [`CoercionPolicy::Abort`]
/// one bad `release_year` anywhere fails the whole batch.
pub fn clean_data(
    batch: &RecordBatch,
    policy: CoercionPolicy,
) -> Result<RecordBatch, PipelineError> {
    info!("Cleaning data");

    let batch = fill::fill_nulls(batch, COUNTRY, UNKNOWN_COUNTRY)?;
    let batch = fill::fill_nulls(&batch, RATING, UNRATED)?;
    let batch = trimming::trim_column(&batch, TITLE, true)?;
    let batch = trimming::trim_column(&batch, TYPE, false)?;

    let (batch, quarantined) = convert::coerce_to_int64(&batch, RELEASE_YEAR, policy)?;
    if quarantined > 0 {
        warn!(
            "Quarantined {} rows with a non-integer {}",
            quarantined, RELEASE_YEAR
        );
    }

    let cleaned = filter::drop_incomplete_rows(&batch, &[TITLE, RELEASE_YEAR])?;
    info!(
        "Cleaned data: ({}, {})",
        cleaned.num_rows(),
        cleaned.num_columns()
    );
    Ok(cleaned)
}
