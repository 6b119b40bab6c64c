// src/pipeline.rs

use chrono::{DateTime, Local, NaiveDate};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

use crate::{
    config::{CoercionPolicy, Config},
    error::PipelineError,
    extract::load_raw_data,
    load::load_to_warehouse,
    transform::clean_data,
    warehouse::{TableId, Warehouse},
};

/// (rows, columns) at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub columns: usize,
}

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub elapsed: Duration,
    pub extracted: Shape,
    pub cleaned: Shape,
    pub destination: TableId,
    pub rows_written: u64,
}

/// Extract → clean → load, once.
pub struct Pipeline<'a> {
    warehouse: &'a dyn Warehouse,
    source: TableId,
    destination_base: TableId,
    coercion_policy: CoercionPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, source: TableId, destination_base: TableId) -> Self {
        Self {
            warehouse,
            source,
            destination_base,
            coercion_policy: CoercionPolicy::default(),
        }
    }

    pub fn from_config(warehouse: &'a dyn Warehouse, config: &Config) -> Self {
        Self::new(warehouse, config.source_table(), config.destination_base())
            .with_coercion_policy(config.coercion_policy)
    }

    pub fn with_coercion_policy(mut self, policy: CoercionPolicy) -> Self {
        self.coercion_policy = policy;
        self
    }

    /// Run every stage in sequence. The first failure ends the run; nothing
    /// is retried or rolled back.
    #[instrument(level = "debug", skip(self), fields(source = %self.source))]
    pub async fn run(&self, run_date: NaiveDate) -> Result<RunReport, PipelineError> {
        let started_at = Local::now();
        let start = Instant::now();

        let raw = load_raw_data(self.warehouse, &self.source).await?;
        let extracted = Shape {
            rows: raw.num_rows(),
            columns: raw.num_columns(),
        };

        let cleaned = clean_data(&raw, self.coercion_policy)?;
        drop(raw);
        let cleaned_shape = Shape {
            rows: cleaned.num_rows(),
            columns: cleaned.num_columns(),
        };

        let outcome =
            load_to_warehouse(self.warehouse, &self.destination_base, run_date, &cleaned).await?;

        Ok(RunReport {
            started_at,
            finished_at: Local::now(),
            elapsed: start.elapsed(),
            extracted,
            cleaned: cleaned_shape,
            destination: outcome.table,
            rows_written: outcome.rows_written,
        })
    }

    /// [`Pipeline::run`] with the run's outcome written to the log, success
    /// or failure. The typed result is handed back to the caller.
    pub async fn execute(&self, run_date: NaiveDate) -> Result<RunReport, PipelineError> {
        match self.run(run_date).await {
            Ok(report) => {
                info!("Pipeline completed successfully");
                info!(
                    "Pipeline completed in {:.2} seconds",
                    report.elapsed.as_secs_f64()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Pipeline failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::load::destination_table;
    use crate::logging::capture::Captured;
    use crate::warehouse::MemoryWarehouse;
    use anyhow::Result;
    use arrow::{
        array::{Array, ArrayRef, Int64Array, StringArray, TimestampMicrosecondArray},
        record_batch::RecordBatch,
    };
    use regex::Regex;
    use std::{collections::HashMap, sync::Arc};

    fn source() -> TableId {
        TableId::new("netflix-titles-463907", "netflix_db", "netflix_raw")
    }

    fn base() -> TableId {
        TableId::new("netflix-titles-463907", "netflix_db", "netflix_cleaned")
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    /// Raw export with the warehouse's original column headers.
    fn raw_titles(years: Vec<Option<&str>>) -> RecordBatch {
        let n = years.len();
        let titles: Vec<Option<String>> = (0..n)
            .map(|i| if i == 1 { None } else { Some(format!(" Title {} ", i)) })
            .collect();
        RecordBatch::try_from_iter(vec![
            (
                "Show ID",
                Arc::new(StringArray::from_iter_values((0..n).map(|i| format!("s{}", i))))
                    as ArrayRef,
            ),
            ("Title", Arc::new(StringArray::from(titles)) as ArrayRef),
            (
                "Type ",
                Arc::new(StringArray::from(vec![Some(" Movie "); n])) as ArrayRef,
            ),
            (
                " Country",
                Arc::new(StringArray::from(vec![None::<&str>; n])) as ArrayRef,
            ),
            (
                "Rating",
                Arc::new(StringArray::from(vec![Some("TV-MA"); n])) as ArrayRef,
            ),
            ("Release Year", Arc::new(StringArray::from(years)) as ArrayRef),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_run() -> Result<()> {
        let wh = MemoryWarehouse::new().with_table(
            &source(),
            raw_titles(vec![Some("2019"), Some("2020"), Some("2021"), None]),
        );

        let report = Pipeline::new(&wh, source(), base()).execute(run_date()).await?;

        // row 1 has no title, row 3 has no year
        assert_eq!(report.extracted, Shape { rows: 4, columns: 6 });
        assert_eq!(report.cleaned, Shape { rows: 2, columns: 6 });
        assert_eq!(report.rows_written, 2);
        assert_eq!(
            report.destination.to_string(),
            "netflix-titles-463907.netflix_db.netflix_cleaned_2024_03_05"
        );
        assert!(report.finished_at >= report.started_at);

        let stored = wh.table(&report.destination).unwrap();
        assert_eq!(stored.num_rows(), report.cleaned.rows);
        let names: Vec<String> = stored
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(
            names,
            vec!["show_id", "title", "type", "country", "rating", "release_year"]
        );
        let years = stored
            .column_by_name("release_year")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(years.values().to_vec(), vec![2019, 2021]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_same_day_replaces_table() -> Result<()> {
        let wh = MemoryWarehouse::new()
            .with_table(&source(), raw_titles(vec![Some("2019"), Some("2020")]));
        let pipeline = Pipeline::new(&wh, source(), base());

        pipeline.execute(run_date()).await?;
        let report = pipeline.execute(run_date()).await?;

        let stored = wh.table(&report.destination).unwrap();
        assert_eq!(stored.num_rows(), 1);
        assert_eq!(wh.table_names().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_year_aborts_without_writing() {
        let wh = MemoryWarehouse::new().with_table(
            &source(),
            raw_titles(vec![Some("2019"), Some("2020"), Some("not-a-number")]),
        );

        let err = Pipeline::new(&wh, source(), base())
            .execute(run_date())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::TypeCoercion { .. }));
        assert_eq!(err.kind(), ErrorKind::DataQuality);
        assert!(wh.table(&destination_table(&base(), run_date())).is_none());
    }

    #[tokio::test]
    async fn test_quarantine_policy_keeps_good_rows() -> Result<()> {
        let wh = MemoryWarehouse::new().with_table(
            &source(),
            raw_titles(vec![Some("2019"), Some("2020"), Some("not-a-number")]),
        );

        let report = Pipeline::new(&wh, source(), base())
            .with_coercion_policy(CoercionPolicy::Quarantine)
            .execute(run_date())
            .await?;
        assert_eq!(report.rows_written, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_source_is_data_access() {
        let wh = MemoryWarehouse::new();
        let err = Pipeline::new(&wh, source(), base())
            .execute(run_date())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataAccess);
        assert!(wh.table_names().is_empty());
    }

    #[test]
    fn test_from_config_uses_configured_tables() -> Result<()> {
        let vars: HashMap<String, String> = [
            ("CREDENTIALS_PATH", "sa.json"),
            ("OUTPUT_DIR", "out"),
            ("PROJECT_ID", "proj"),
            ("DATASET", "ds"),
            ("COERCION_POLICY", "quarantine"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = Config::from_vars(&vars)?;
        let wh = MemoryWarehouse::new();

        let pipeline = Pipeline::from_config(&wh, &config);
        assert_eq!(pipeline.source.to_string(), "proj.ds.netflix_raw");
        assert_eq!(pipeline.destination_base.to_string(), "proj.ds.netflix_cleaned");
        assert_eq!(pipeline.coercion_policy, CoercionPolicy::Quarantine);
        Ok(())
    }

    fn messages(events: &[(String, String)]) -> Vec<&str> {
        events.iter().map(|(_, m)| m.as_str()).collect()
    }

    #[tokio::test]
    async fn test_success_log_sequence() -> Result<()> {
        let captured = Captured::default();
        let _guard = tracing::subscriber::set_default(captured.subscriber());
        let wh = MemoryWarehouse::new().with_table(
            &source(),
            raw_titles(vec![Some("2019"), Some("2020"), Some("2021"), None]),
        );

        Pipeline::new(&wh, source(), base()).execute(run_date()).await?;

        let events = captured.events();
        assert!(events.iter().all(|(level, _)| level == "INFO"));
        let lines = messages(&events);
        assert_eq!(lines.len(), 8);
        assert_eq!(
            lines[..7],
            [
                "Loading raw data from BigQuery",
                "Loaded 4 rows and 6 columns",
                "Cleaning data",
                "Cleaned data: (2, 6)",
                "Uploading cleaned data to BigQuery table: \
                 netflix-titles-463907.netflix_db.netflix_cleaned_2024_03_05",
                "Data uploaded to BigQuery successfully",
                "Pipeline completed successfully",
            ]
        );
        let timing = Regex::new(r"^Pipeline completed in \d+\.\d{2} seconds$").unwrap();
        assert!(timing.is_match(lines[7]), "unexpected timing line {:?}", lines[7]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_log_sequence() {
        let captured = Captured::default();
        let _guard = tracing::subscriber::set_default(captured.subscriber());
        let wh = MemoryWarehouse::new().with_table(
            &source(),
            raw_titles(vec![Some("2019"), Some("2020"), Some("not-a-number")]),
        );

        let err = Pipeline::new(&wh, source(), base())
            .execute(run_date())
            .await
            .unwrap_err();

        let events = captured.events();
        assert_eq!(
            messages(&events),
            vec![
                "Loading raw data from BigQuery",
                "Loaded 3 rows and 6 columns",
                "Cleaning data",
                "Pipeline failed: cannot coerce value \"not-a-number\" in column \
                 `release_year` (row 2) to an integer",
            ]
        );
        let (level, message) = events.last().unwrap();
        assert_eq!(level, "ERROR");
        assert_eq!(message, &format!("Pipeline failed: {}", err));
    }

    #[tokio::test]
    async fn test_typed_extra_column_reaches_destination() -> Result<()> {
        let raw = raw_titles(vec![Some("2019"), Some("2020"), Some("2021")]);
        let added: ArrayRef = Arc::new(
            TimestampMicrosecondArray::from(vec![
                Some(1_632_628_800_000_000),
                None,
                Some(1_600_000_000_000_000),
            ])
            .with_timezone("UTC"),
        );
        let mut columns: Vec<(String, ArrayRef)> = raw
            .schema()
            .fields()
            .iter()
            .zip(raw.columns())
            .map(|(f, c)| (f.name().clone(), c.clone()))
            .collect();
        columns.push(("Date Added".to_string(), added.clone()));
        let raw = RecordBatch::try_from_iter(columns)?;
        let wh = MemoryWarehouse::new().with_table(&source(), raw);

        let report = Pipeline::new(&wh, source(), base()).execute(run_date()).await?;

        let stored = wh.table(&report.destination).unwrap();
        let out = stored.column_by_name("date_added").unwrap();
        assert_eq!(out.data_type(), added.data_type());
        // row 1 has no title and is dropped
        let out = out
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(
            out.iter().collect::<Vec<_>>(),
            vec![Some(1_632_628_800_000_000), Some(1_600_000_000_000_000)]
        );
        Ok(())
    }
}
