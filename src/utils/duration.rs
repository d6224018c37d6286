use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};

/// Parses durations such as `1s`, `250ms`, `5m`, `1h30m` or `1d`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let input = raw.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }
    if input == "0" {
        return Ok(Duration::zero());
    }

    let mut rest = input;
    let mut total_ms = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {raw:?}: expected a number"));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {raw:?}: bad number {number:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_ms = match unit {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            "" => return Err(format!("invalid duration {raw:?}: missing unit")),
            other => return Err(format!("invalid duration {raw:?}: unknown unit {other:?}")),
        };
        total_ms += value * unit_ms;
        rest = tail;
    }
    if !total_ms.is_finite() || total_ms.abs() >= i64::MAX as f64 {
        return Err(format!("invalid duration {raw:?}: out of range"));
    }
    Duration::try_milliseconds(total_ms.round() as i64)
        .ok_or_else(|| format!("invalid duration {raw:?}: out of range"))
}

/// Compact rendering of a duration, e.g. `1h30m` or `1.5s`.
pub fn format_go_duration(duration: Duration) -> String {
    let total_ms = duration.num_milliseconds();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    if total_ms < 0 {
        out.push('-');
    }
    let ms = total_ms.unsigned_abs();
    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1_000 % 60;
    let millis = ms % 1_000;

    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    if millis > 0 {
        let frac = format!("{millis:03}");
        let _ = write!(out, "{seconds}.{}s", frac.trim_end_matches('0'));
    } else if seconds > 0 {
        let _ = write!(out, "{seconds}s");
    }
    out
}

pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC 3339 time {raw:?}: {err}"))
}
