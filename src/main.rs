use chrono::Local;
use netflix_pipeline::{
    config::{Config, DEFAULT_CONFIG_FILE},
    error::PipelineError,
    logging,
    pipeline::Pipeline,
    warehouse::BigQueryWarehouse,
};
use std::process::ExitCode;
use tracing::{error, info};

/// Load settings, create the output directory and install the file logger.
fn setup() -> Result<Config, PipelineError> {
    let config = Config::load(DEFAULT_CONFIG_FILE)?;
    let log_path = config.prepare_output_dir()?;
    logging::init(&log_path).map_err(|e| PipelineError::configuration(format!("{:#}", e)))?;
    Ok(config)
}

/// The line to print by hand when no subscriber could be installed.
fn stderr_fallback(e: &PipelineError, console: anyhow::Result<()>) -> Option<String> {
    console.err().map(|log_err| {
        format!(
            "Pipeline failed: {} (console logging unavailable: {:#})",
            e, log_err
        )
    })
}

fn fail(e: PipelineError) -> ExitCode {
    error!("Pipeline failed: {}", e);
    ExitCode::from(e.kind().exit_code())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // ─── 1) config + logging ─────────────────────────────────────────
    let config = match setup() {
        Ok(config) => config,
        Err(e) => {
            // no log file yet
            if let Some(line) = stderr_fallback(&e, logging::init_console()) {
                eprintln!("{}", line);
                return ExitCode::from(e.kind().exit_code());
            }
            return fail(e);
        }
    };
    info!("Logging to {}", config.log_path().display());

    // ─── 2) warehouse client ─────────────────────────────────────────
    let warehouse = match BigQueryWarehouse::from_credentials(
        &config.credentials_path,
        &config.project_id,
        config.location.clone(),
    ) {
        Ok(wh) => wh,
        Err(source) => {
            return fail(PipelineError::DataAccess {
                table: config.source_table().to_string(),
                source,
            })
        }
    };

    // ─── 3) extract → transform → load ───────────────────────────────
    match Pipeline::from_config(&warehouse, &config)
        .execute(Local::now().date_naive())
        .await
    {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(e.kind().exit_code()),
    }
}
