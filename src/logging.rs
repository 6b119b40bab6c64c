//! Run logging: a file sink in `<ts> - LEVEL - message` form plus a console stream.

use anyhow::{Context, Result};
use chrono::Local;
use std::{fmt, fs::OpenOptions, path::Path, sync::Mutex};
use tracing::{level_filters::LevelFilter, Event, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log line layout: `2024-03-05 10:11:12,345 - INFO - Cleaning data`.
pub struct PipelineFormat;

impl<S, N> FormatEvent<S, N> for PipelineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} - {} - ",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the process subscriber: INFO+ to `log_path` (created/appended)
/// and `RUST_LOG`-filtered output on stderr.
pub fn init(log_path: &Path) -> Result<()> {
    tracing_subscriber::registry()
        .with(file_layer(log_path)?)
        .with(console_layer())
        .try_init()
        .context("installing tracing subscriber")
}

/// Console-only logging, for failures before the log file exists.
pub fn init_console() -> Result<()> {
    tracing_subscriber::registry()
        .with(console_layer())
        .try_init()
        .context("installing tracing subscriber")
}

/// INFO+ events in [`PipelineFormat`], appended to `log_path`.
pub fn file_layer<S>(log_path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    Ok(tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .event_format(PipelineFormat)
        .with_filter(LevelFilter::INFO))
}

fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env)
}
