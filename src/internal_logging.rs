#![allow(unused_macros)]

///
/// **Note**: these macros (`trace_core_info!`, `trace_core_warn!`,
/// `trace_core_debug!`, `trace_core_error!`) are for the crate's own
/// bookkeeping of best-effort failure paths (rejected re-parents, dropped
/// metrics, malformed distributed-trace payloads). They are not a general
/// logging facility and are not exposed to instrumentation callers.
///

/// Logs an informational internal event.
#[macro_export]
macro_rules! trace_core_info {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Logs a warning-level internal event (state violations, rejected operations).
#[macro_export]
macro_rules! trace_core_warn {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Logs a debug-level internal event (resource-exhaustion drops, data anomalies).
#[macro_export]
macro_rules! trace_core_debug {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Logs an error-level internal event (format violations in inbound payloads).
#[macro_export]
macro_rules! trace_core_error {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, "");
        }
        #[cfg(not(feature = "internal-logs"))]
        {
            let _ = ($name, $($value),+);
        }
    };
}
