/*!
 * Structured Tracing
 * Subscriber setup and timing spans for engine operations
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - FLOWKERNEL_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling this more than once is harmless; only the first call installs
/// a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("FLOWKERNEL_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Timing span around one engine operation
///
/// Logs completion at debug level, or a warning when the operation
/// outlives its slow threshold.
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    slow_after: Duration,
}

impl OperationSpan {
    pub fn new(operation: &'static str, slow_after: Duration) -> Self {
        let span = span!(
            Level::DEBUG,
            "operation",
            operation = operation,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            slow_after,
        }
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration > self.slow_after {
            warn!(
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow operation detected"
            );
        } else {
            debug!(duration_us = duration.as_micros() as u64, "operation completed");
        }
    }
}

/// Helper to create an operation span
#[inline]
pub fn span_operation(name: &'static str, slow_after: Duration) -> OperationSpan {
    OperationSpan::new(name, slow_after)
}
