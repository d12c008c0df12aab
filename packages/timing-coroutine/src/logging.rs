//! Compile-time gated trace logging for the driver loop.

/// Emit per-step driver traces only when the `driver_debug_logs` Cargo feature is enabled.
///
/// With the feature disabled (default), this macro compiles to a no-op while
/// still type-checking format arguments.
#[macro_export]
macro_rules! driver_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "driver_debug_logs")]
        {
            log::trace!($($arg)*);
        }
        #[cfg(not(feature = "driver_debug_logs"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}
