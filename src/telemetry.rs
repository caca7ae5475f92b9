//! Subscriber setup, request correlation ids and the metric names the
//! background loops report under.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub mod metric_names {
    pub const INGESTED_MESSAGES: &str = "gateway_ingested_messages_total";
    pub const DUPLICATE_MESSAGES: &str = "gateway_duplicate_messages_total";
    pub const AUTO_REPLY_OUTCOMES: &str = "gateway_auto_reply_outcomes_total";
    pub const AUTO_REPLY_LATENCY_MS: &str = "gateway_auto_reply_latency_ms";
    pub const QUEUE_POPS: &str = "gateway_queue_pops_total";
    pub const BROADCAST_TICK_MS: &str = "gateway_broadcast_tick_duration_ms";
    pub const BROADCASTS_CLAIMED: &str = "gateway_broadcasts_claimed_total";
    pub const DELIVERIES: &str = "gateway_broadcast_deliveries_total";
    pub const HUB_CLIENTS: &str = "gateway_hub_clients";
    pub const HUB_DROPPED_CLIENTS: &str = "gateway_hub_dropped_clients_total";
    pub const HUB_DROPPED_EVENTS: &str = "gateway_hub_dropped_events_total";
    pub const LIVE_SESSIONS: &str = "gateway_live_sessions";
}

/// Correlation id of the request being served.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber once and route `log::` records (sqlx among
/// them) through it.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Another LogTracer already installed is fine.
        if !type_name_of_val(log::logger()).contains("LogTracer") {
            eprintln!("Warning: log records will bypass tracing: {}", err);
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!("Warning: keeping the existing tracing subscriber: {}", err);
    }

    Ok(())
}

/// Assign every request a correlation id.
///
/// A well-formed `x-request-id` from the caller is reused, otherwise a fresh
/// id is minted. The id is exposed to extractors through request extensions,
/// to error bodies through the task-local context, and echoed on the response.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| is_acceptable_request_id(value))
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let context = TraceContext {
        trace_id: trace_id.clone(),
    };
    request.extensions_mut().insert(context.clone());

    let span = tracing::info_span!("request", trace_id = %trace_id);
    let mut response = tracing::Instrument::instrument(
        with_trace_context(context, next.run(request)),
        span,
    )
    .await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn is_acceptable_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Run `future` with `context` visible to [`current_trace_id`].
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}
