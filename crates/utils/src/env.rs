//! Environment-driven configuration knobs.
//!
//! Every tunable in the workspace is read from a `TASKBOARD_*` variable with a
//! bounded fallback, so a malformed value never takes the process down.

use std::str::FromStr;

/// Read `name` and parse it, keeping the value only if `accept` holds.
///
/// Unset, unparsable, and rejected values all yield `default`. Rejected values are
/// logged so a typo in deployment config is visible.
pub fn parsed_or<T, F>(name: &str, default: T, accept: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&T) -> bool,
{
    let Ok(raw) = std::env::var(name) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if accept(&value) => value,
        _ => {
            tracing::warn!(
                variable = name,
                value = %raw,
                default = %default,
                "Ignoring invalid environment override"
            );
            default
        }
    }
}
