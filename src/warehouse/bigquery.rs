//! BigQuery REST v2 client.
//!
//! Reads go through `jobs.query` / `jobs.getQueryResults`, draining every page
//! before the rows are converted to Arrow. Writes upload the batch as Parquet
//! in a multipart `jobs.insert` load job with `WRITE_TRUNCATE`, then poll the
//! job until BigQuery reports it `DONE`.

use anyhow::{anyhow, bail, Context, Result};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{fmt, path::Path, sync::Arc, time::Duration};
use tracing::{debug, info};

use super::{arrow::rows_to_record_batch, parquet::write_parquet_to_memory, TableId, Warehouse};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";

/// How long each query call may wait server-side before returning an
/// incomplete response.
const QUERY_WAIT_MS: u64 = 10_000;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

// ─── REST payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub mode: Option<String>,
    /// Sub-fields of a `RECORD` column.
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

impl TableFieldSchema {
    pub fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }

    pub fn is_record(&self) -> bool {
        self.ty.eq_ignore_ascii_case("RECORD") || self.ty.eq_ignore_ascii_case("STRUCT")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub v: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    format_options: FormatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

/// Ask for `TIMESTAMP` cells as integer microseconds instead of float seconds.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatOptions {
    use_int64_timestamp: bool,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    #[serde(default)]
    pub job_complete: bool,
    pub job_reference: Option<JobReference>,
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    pub page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub state: String,
    pub error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatistics {
    pub output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobStatistics {
    pub load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_reference: JobReference,
    #[serde(default)]
    pub status: JobStatus,
    pub statistics: Option<JobStatistics>,
}

impl Job {
    pub fn is_done(&self) -> bool {
        self.status.state.eq_ignore_ascii_case("DONE")
    }

    /// Rows written by a finished load job, or the job's failure.
    pub fn load_outcome(&self) -> Result<u64> {
        if let Some(err) = &self.status.error_result {
            bail!("load job {} failed: {}", self.job_reference.job_id, err);
        }
        match self
            .statistics
            .as_ref()
            .and_then(|s| s.load.as_ref())
            .and_then(|l| l.output_rows.as_deref())
        {
            Some(n) => n
                .parse::<u64>()
                .with_context(|| format!("parsing outputRows {:?}", n)),
            None => Ok(0),
        }
    }
}

// ─── client ─────────────────────────────────────────────────────────

/// [`Warehouse`] backed by Google BigQuery.
pub struct BigQueryWarehouse {
    http: Client,
    auth: Arc<dyn TokenProvider>,
    project_id: String,
    location: Option<String>,
}

impl BigQueryWarehouse {
    pub fn new(
        auth: Arc<dyn TokenProvider>,
        project_id: impl Into<String>,
        location: Option<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            auth,
            project_id: project_id.into(),
            location,
        }
    }

    /// Authenticate with the service-account key file at `credentials_path`.
    pub fn from_credentials(
        credentials_path: impl AsRef<Path>,
        project_id: impl Into<String>,
        location: Option<String>,
    ) -> Result<Self> {
        let path = credentials_path.as_ref();
        let account = CustomServiceAccount::from_file(path).with_context(|| {
            format!("loading service account credentials from {}", path.display())
        })?;
        Ok(Self::new(Arc::new(account), project_id, location))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let token = self
            .auth
            .token(&[BIGQUERY_SCOPE])
            .await
            .context("fetching BigQuery access token")?;

        let resp = req
            .bearer_auth(token.as_str())
            .send()
            .await
            .with_context(|| format!("sending {}", what))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("reading {} response", what))?;

        if !status.is_success() {
            bail!("{} returned HTTP {}: {}", what, status, body.trim());
        }
        serde_json::from_str(&body).with_context(|| format!("decoding {} response", what))
    }

    fn load_job_config(&self, table: &TableId) -> Value {
        let mut job = json!({
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": table.project,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "sourceFormat": "PARQUET",
                    "writeDisposition": "WRITE_TRUNCATE",
                    "createDisposition": "CREATE_IF_NEEDED",
                }
            }
        });
        if let Some(location) = &self.location {
            job["jobReference"] = json!({
                "projectId": self.project_id,
                "location": location,
            });
        }
        job
    }
}

/// The two job calls the read and write loops are driven by.
#[async_trait]
pub(crate) trait JobApi: Send + Sync {
    /// `jobs.getQueryResults` for `job`, starting at `page_token`.
    async fn query_page(&self, job: &JobReference, page_token: Option<&str>)
        -> Result<QueryResults>;

    /// `jobs.get` for `job`.
    async fn job(&self, job: &JobReference) -> Result<Job>;
}

#[async_trait]
impl JobApi for BigQueryWarehouse {
    async fn query_page(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResults> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            API_BASE, job.project_id, job.job_id
        );
        let mut params = vec![
            ("timeoutMs", QUERY_WAIT_MS.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        self.send_json(self.http.get(&url).query(&params), "jobs.getQueryResults")
            .await
    }

    async fn job(&self, job: &JobReference) -> Result<Job> {
        let url = format!("{}/projects/{}/jobs/{}", API_BASE, job.project_id, job.job_id);
        let mut params = Vec::new();
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        self.send_json(self.http.get(&url).query(&params), "jobs.get")
            .await
    }
}

/// Follow a `jobs.query` response until the job is complete and every page
/// has been drained. The schema comes from the first completed page.
pub(crate) async fn drain_query(
    api: &dyn JobApi,
    mut page: QueryResults,
) -> Result<(TableSchema, Vec<TableRow>)> {
    let job = page
        .job_reference
        .clone()
        .ok_or_else(|| anyhow!("jobs.query response carried no job reference"))?;
    debug!(job_id = %job.job_id, "query submitted");

    let mut schema: Option<TableSchema> = None;
    let mut rows = Vec::new();
    loop {
        let mut page_token = None;
        if page.job_complete {
            if schema.is_none() {
                schema = page.schema.take();
            }
            rows.append(&mut page.rows);
            match page.page_token.take() {
                Some(token) => page_token = Some(token),
                None => break,
            }
            debug!(job_id = %job.job_id, rows = rows.len(), "fetching next page");
        }
        page = api.query_page(&job, page_token.as_deref()).await?;
    }

    let schema = schema.ok_or_else(|| anyhow!("query job {} returned no schema", job.job_id))?;
    Ok((schema, rows))
}

/// Poll `job` every `poll_interval` until BigQuery reports it `DONE`.
pub(crate) async fn wait_for_job(
    api: &dyn JobApi,
    mut job: Job,
    poll_interval: Duration,
) -> Result<Job> {
    while !job.is_done() {
        tokio::time::sleep(poll_interval).await;
        job = api.job(&job.job_reference).await?;
        debug!(job_id = %job.job_reference.job_id, state = %job.status.state, "polled load job");
    }
    Ok(job)
}

/// Build a `multipart/related` body: JSON job metadata followed by the media.
pub(crate) fn multipart_related(boundary: &str, metadata: &str, payload: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        m = metadata
    );
    let tail = format!("\r\n--{}--\r\n", boundary);

    let mut body = Vec::with_capacity(head.len() + payload.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(payload);
    body.extend_from_slice(tail.as_bytes());
    body
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn read_table(&self, table: &TableId) -> Result<RecordBatch> {
        let sql = format!("SELECT * FROM `{}`", table);
        let url = format!("{}/projects/{}/queries", API_BASE, self.project_id);
        let request = QueryRequest {
            query: &sql,
            use_legacy_sql: false,
            timeout_ms: QUERY_WAIT_MS,
            format_options: FormatOptions {
                use_int64_timestamp: true,
            },
            location: self.location.as_deref(),
        };

        let first: QueryResults = self
            .send_json(self.http.post(&url).json(&request), "jobs.query")
            .await?;
        let (schema, rows) = drain_query(self, first)
            .await
            .with_context(|| format!("reading {}", table))?;

        rows_to_record_batch(&schema.fields, &rows)
            .with_context(|| format!("materializing rows of {}", table))
    }

    async fn overwrite_table(&self, table: &TableId, batch: &RecordBatch) -> Result<u64> {
        let payload = write_parquet_to_memory(batch)?;
        let metadata = self.load_job_config(table).to_string();
        let boundary = format!("netflix_pipeline_{}", Utc::now().timestamp_micros());
        let body = multipart_related(&boundary, &metadata, &payload);

        let url = format!("{}/projects/{}/jobs", UPLOAD_BASE, self.project_id);
        let req = self
            .http
            .post(&url)
            .query(&[("uploadType", "multipart")])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);

        let job: Job = self.send_json(req, "jobs.insert").await?;
        info!(
            job_id = %job.job_reference.job_id,
            bytes = payload.len(),
            "load job submitted"
        );

        wait_for_job(self, job, POLL_INTERVAL).await?.load_outcome()
    }
}
