//! Convenience macros for performance tracing.

/// Create a [`crate::performance::PerformanceSpan`] with optional fields.
///
/// ```rust
/// use rnnr_tracing::perf_span;
///
/// {
///     let _span = perf_span!("statement", index = 3, kernel = "add");
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        if $crate::performance::is_enabled() {
            $crate::debug!(name = $name, $($field = $value),+, "perf_span_start");
        }
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Time a block, log the duration at debug level and yield
/// `(result, duration_us)`.
///
/// ```rust
/// use rnnr_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(
            operation = $name,
            duration_us = duration_us,
            "timed_block_complete"
        );
        (result, duration_us)
    }};
}
