//! Duration strings such as `72h`, `1h30m`, `1.5h` or `250ms`
//!
//! Parsing is delegated to humantime, which also accepts its longer unit
//! names (`30min`, `2days`) and whitespace between spans. A leading `+` is
//! ignored and negative durations are rejected.

use std::time::Duration;

/// Parse a duration string
pub fn parse_duration(input: &str) -> Result<Duration, humantime::DurationError> {
    let s = input.trim();
    humantime::parse_duration(s.strip_prefix('+').unwrap_or(s))
}
