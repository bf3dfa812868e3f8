use chrono::TimeDelta;

/// Format an integer count with thousands separators.
///
/// # Examples
///
/// ```
/// use apu_core::formatting::format_count;
///
/// assert_eq!(format_count(0), "0");
/// assert_eq!(format_count(1_234), "1,234");
/// assert_eq!(format_count(1_234_567), "1,234,567");
/// ```
pub fn format_count(value: u64) -> String {
    group_thousands(&value.to_string())
}

/// Zero-padded two-digit hour, e.g. `7` → `"07"`.
pub fn format_hour(hour: u32) -> String {
    format!("{:02}", hour)
}

/// Compact duration such as `"500ms"`, `"45s"`, `"2m"`, `"1h 30m"` or `"2m 5s"`.
///
/// # Examples
///
/// ```
/// use apu_core::formatting::format_duration;
/// use chrono::TimeDelta;
///
/// assert_eq!(format_duration(TimeDelta::seconds(60)), "1m");
/// assert_eq!(format_duration(TimeDelta::seconds(125)), "2m 5s");
/// assert_eq!(format_duration(TimeDelta::minutes(90)), "1h 30m");
/// ```
pub fn format_duration(delta: TimeDelta) -> String {
    let total_ms = delta.num_milliseconds().max(0);
    if total_ms < 1_000 && total_ms != 0 {
        return format!("{}ms", total_ms);
    }
    let total_secs = total_ms / 1_000;
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// Insert `,` every three digits from the right.
fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
