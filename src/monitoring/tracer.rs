/*!
 * Tracing
 * Subscriber setup and spans for structural datapath operations
 *
 * Domain teardown runs under an [`OperationSpan`] that records its
 * duration and result and flags slow completions, since it waits on the
 * alert thread. The enqueue/dequeue fast paths never log.
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Operations slower than this are logged at warn
const SLOW_OPERATION: Duration = Duration::from_millis(100);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - HQM_TRACE_JSON: Enable JSON output (default: false)
///
/// A second call is a no-op.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("HQM_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized with JSON output");
        }
    } else {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized");
        }
    }
}

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Span around one structural operation
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
    op_id: u64,
}

impl OperationSpan {
    pub fn new(operation: &'static str, domain: u32) -> Self {
        let op_id = NEXT_OP_ID.fetch_add(1, Ordering::Relaxed);
        let span = span!(
            Level::DEBUG,
            "operation",
            op_id,
            operation,
            domain,
            result = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            operation,
            op_id,
        }
    }

    pub fn op_id(&self) -> u64 {
        self.op_id
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Record the outcome of the operation and pass it through
    pub fn finish<T, E: std::fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => {
                self.span.record("result", "ok");
            }
            Err(e) => {
                self.span.record("result", tracing::field::display(e));
            }
        }
        result
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        let _entered = self.span.enter();

        if duration > SLOW_OPERATION {
            warn!(
                op_id = self.op_id,
                operation = self.operation,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "Slow operation"
            );
        } else {
            debug!(
                op_id = self.op_id,
                operation = self.operation,
                duration_us = duration.as_micros() as u64,
                "Operation completed"
            );
        }
    }
}

/// Convenience constructor
pub fn span_operation(operation: &'static str, domain: u32) -> OperationSpan {
    OperationSpan::new(operation, domain)
}
