//! Performance instrumentation: timed spans and transfer/dispatch events.
//!
//! Spans are gated by a process-wide switch that [`crate::init_global_tracing`]
//! sets from [`crate::TracingConfig`]. While disabled, [`PerformanceSpan`] is
//! inert and never reads the clock on drop.
//!
//! ```rust
//! use rnnr_tracing::performance::{PerformanceSpan, record_transfer};
//!
//! let span = PerformanceSpan::new("upload_weights", Some(100));
//! record_transfer(4096, "H2D", 12);
//! drop(span);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));
// u64::MAX encodes "no threshold".
static THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Turn performance spans on or off for the whole process.
pub fn set_enabled(enabled: bool, default_threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    THRESHOLD_US.store(default_threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans are currently recorded.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn default_threshold() -> Option<u64> {
    match THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        value => Some(value),
    }
}

/// RAII guard that measures its own lifetime and logs the duration on drop
/// when it meets the threshold.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Option<Instant>,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start timing `span_name`. A `threshold_us` of `None` falls back to the
    /// process default; when that is unset too every span is logged.
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = span_name.into();
        if !is_enabled() {
            return Self {
                name,
                threshold_us,
                start_time: None,
                span: tracing::Span::none(),
            };
        }

        let span = tracing::debug_span!("perf", name = %name);
        Self {
            name,
            threshold_us: threshold_us.or_else(default_threshold),
            start_time: Some(Instant::now()),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since creation, or zero for an inert span.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time
            .map(|start| start.elapsed().as_micros() as u64)
            .unwrap_or(0)
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if self.start_time.is_none() {
            return;
        }
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a host/device copy with its bandwidth.
///
/// `direction` is `"H2D"` or `"D2H"`.
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        direction = direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth_mbps,
        "data_transfer"
    );
}

/// Record one kernel launch with the number of work items it covered.
pub fn record_dispatch(kernel: &str, work_items: u64, duration_us: u64) {
    let items_per_sec = if duration_us > 0 {
        (work_items as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "dispatch",
        kernel = kernel,
        work_items = work_items,
        duration_us = duration_us,
        items_per_sec = items_per_sec,
        "kernel_dispatch"
    );
}
