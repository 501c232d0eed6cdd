//! Internal logging helpers for structured Tessera events.

/// Single logging target for Tessera.
pub(crate) const LOG_TARGET: &str = "tessera";

macro_rules! tessera_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!($level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use tessera_log;
