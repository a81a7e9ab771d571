use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use feature_plugin::{message::Response, plugin::LogLevel};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

pub const LOG_FILE: &str = "aiflow.log";
pub const EVENT_FILE: &str = "aiflow-events.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: LogLevel, log_dir: Option<PathBuf>) -> Self {
        Self { log_level, log_dir }
    }
}

/// `RUST_LOG` wins over the configured level.
fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()))
}

/// Install the global subscriber.
///
/// With a log directory: a daily rolling text log plus a daily rolling JSON
/// file that only receives `target: "request"` events. Without one, or when
/// the directory cannot be used, everything goes to stderr (stdout carries
/// protocol replies).
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    match &config.log_dir {
        Some(dir) => match init_files(config.log_level, dir) {
            Ok(()) => Ok(()),
            Err(err) => {
                init_stderr(config.log_level)?;
                warn!("file logging unavailable, using stderr: {err:#}");
                Ok(())
            }
        },
        None => init_stderr(config.log_level),
    }
}

fn init_files(level: LogLevel, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let txt_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE)
        .build(dir)?;
    let txt_layer = fmt::layer()
        .with_writer(txt_appender)
        .with_ansi(false)
        .with_filter(env_filter(level));

    let json_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(EVENT_FILE)
        .build(dir)?;
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new("request=info"));

    Registry::default().with(txt_layer).with(json_layer).try_init()?;
    Ok(())
}

fn init_stderr(level: LogLevel) -> Result<()> {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(env_filter(level));
    Registry::default().with(layer).try_init()?;
    Ok(())
}

/// Request counters and latency, recorded through the global meter.
/// A no-op until somebody installs a meter provider.
#[derive(Clone)]
pub struct RequestMetrics {
    requests_started: Counter<u64>,
    requests_succeeded: Counter<u64>,
    requests_failed: Counter<u64>,
    request_latency_ms: Histogram<f64>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    pub fn new() -> Self {
        let meter = global::meter("aiflow-coordinator");
        let requests_started = meter
            .u64_counter("requests_started")
            .with_description("Total requests started")
            .build();
        let requests_succeeded = meter.u64_counter("requests_succeeded").build();
        let requests_failed = meter.u64_counter("requests_failed").build();
        let request_latency_ms = meter
            .f64_histogram("request_latency_ms")
            .with_description("Latency per request in ms")
            .with_unit("ms")
            .build();

        Self {
            requests_started,
            requests_succeeded,
            requests_failed,
            request_latency_ms,
        }
    }

    /// Time one coordinator request, then emit a `target: "request"` event.
    pub async fn instrument_request<Fut>(&self, name: &'static str, handler: Fut) -> Response
    where
        Fut: Future<Output = Response>,
    {
        let attrs = [KeyValue::new("type", name)];
        self.requests_started.add(1, &attrs);
        let start = Instant::now();

        let response = handler.await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.request_latency_ms.record(elapsed, &attrs);

        let ok = response.is_success();
        if ok {
            self.requests_succeeded.add(1, &attrs);
            info!("request `{}` succeeded in {:.1} ms", name, elapsed);
        } else {
            self.requests_failed.add(1, &attrs);
            warn!("request `{}` failed in {:.1} ms", name, elapsed);
        }

        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            request = name,
            latency_ms = elapsed,
            status = if ok { "ok" } else { "error" },
        );

        response
    }
}
