use chrono::Duration;

/// Fallback when a rule's window string does not parse.
pub fn default_window() -> Duration {
    Duration::minutes(5)
}

/// Parse a duration string like `30s`, `5m`, `1h` or `1h30m`.
///
/// Units are seconds, minutes and hours; segments may be concatenated.
/// Returns `None` on anything else (empty input, unknown unit, missing
/// digits, overflow).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: i64 = digits.parse().ok()?;
        digits.clear();
        let segment = match ch {
            's' => Duration::try_seconds(value)?,
            'm' => Duration::try_minutes(value)?,
            'h' => Duration::try_hours(value)?,
            _ => return None,
        };
        total = total.checked_add(&segment)?;
    }
    if !digits.is_empty() {
        // Trailing digits without a unit.
        return None;
    }
    if total <= Duration::zero() {
        return None;
    }
    Some(total)
}

/// Parse a rule window, defaulting to five minutes when the string is
/// malformed.
pub fn parse_window(s: &str) -> Duration {
    parse_duration(s).unwrap_or_else(default_window)
}
