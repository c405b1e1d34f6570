//! Tagged logging macros for rtsp-host
//!
//! Every macro takes a short tag ("RTSP", "DEC", "NET", ...) that becomes the
//! `log` target, so `RUST_LOG=DEC=debug` narrows output to one worker.
//! Verbose and debug logs additionally require the matching config flag.

/// Debug log - only emitted when debug mode is enabled
#[macro_export]
macro_rules! log_debug {
    ($tag:expr, $($arg:tt)*) => {
        if $crate::core::is_debug() {
            ::log::trace!(target: $tag, "{}", format_args!($($arg)*));
        }
    };
}

/// Verbose log - only emitted when verbose mode is enabled
#[macro_export]
macro_rules! log_verbose {
    ($tag:expr, $($arg:tt)*) => {
        if $crate::core::is_verbose() {
            ::log::debug!(target: $tag, "{}", format_args!($($arg)*));
        }
    };
}

/// Info log - always emitted
#[macro_export]
macro_rules! log_info {
    ($tag:expr, $($arg:tt)*) => {
        ::log::info!(target: $tag, "{}", format_args!($($arg)*))
    };
}

/// Warning log
#[macro_export]
macro_rules! log_warn {
    ($tag:expr, $($arg:tt)*) => {
        ::log::warn!(target: $tag, "{}", format_args!($($arg)*))
    };
}

/// Error log
#[macro_export]
macro_rules! log_error {
    ($tag:expr, $($arg:tt)*) => {
        ::log::error!(target: $tag, "{}", format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    // Call sites use the macros as match arm and closure bodies
    #[test]
    #[deny(semicolon_in_expressions_from_macros)]
    fn macros_expand_as_expressions() {
        for outcome in [Ok(1), Err("refused")] {
            match outcome {
                Ok(n) => log_info!("TEST", "value {}", n),
                Err(e) => log_warn!("TEST", "failed: {}", e),
            }
        }
        let report = |reason: &str| log_error!("TEST", "{}", reason);
        report("closed");
        let () = log_verbose!("TEST", "verbose");
        let () = log_debug!("TEST", "debug");
    }
}
