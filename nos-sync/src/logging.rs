//! Unified logging support for nos-sync
//!
//! These macros forward to the `log` crate when the `log` feature is on.
//! Without it they expand to a `format_args!` that is type-checked and then
//! discarded, so arguments never turn into unused-variable warnings.

/// Unified trace-level logging
#[cfg(feature = "debug_subsystems")]
macro_rules! sync_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Unified debug-level logging
macro_rules! sync_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Unified warn-level logging
macro_rules! sync_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::warn!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Unified error-level logging
macro_rules! sync_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::error!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Trace only when `debug_subsystems` is enabled; acquire/release are too
/// hot to trace unconditionally
macro_rules! sync_lock_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "debug_subsystems")]
        $crate::logging::sync_trace!($($arg)*);
        #[cfg(not(feature = "debug_subsystems"))]
        { let _ = format_args!($($arg)*); }
    }};
}

pub(crate) use {sync_debug, sync_error, sync_lock_trace, sync_warn};
#[cfg(feature = "debug_subsystems")]
pub(crate) use sync_trace;
