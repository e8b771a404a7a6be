//! Display formatting helpers shared by the aggregator and the CLI.
//!
//! Output is ASCII only.
//!
//! Rules:
//! - Duration: <1s -> ms, 1s-1m -> X.Xs, 1m-1h -> Xm Ys, >1h -> Xh Ym
//! - Values: compact single-line JSON, strings unquoted
//! - Long cells are cut on a char boundary and end in "..."

use serde_json::Value;

/// Format a duration in milliseconds to human-readable form
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else if ms < 3_600_000 {
        let mins = ms / 60_000;
        let secs = (ms % 60_000) / 1000;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = ms / 3_600_000;
        let mins = (ms % 3_600_000) / 60_000;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}

/// Truncate to `max_chars`, adding "..." if anything was cut
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else if max_chars <= 3 {
        s.chars().take(max_chars).collect()
    } else {
        format!("{}...", s.chars().take(max_chars - 3).collect::<String>())
    }
}

/// One-line rendering of a JSON value
pub fn value_inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// `value_inline`, cut to fit a column
pub fn value_cell(value: &Value, max_chars: usize) -> String {
    truncate_str(&value_inline(value), max_chars)
}

/// Pad on the right to `width` chars
pub fn pad_right(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - len))
    }
}
