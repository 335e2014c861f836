//! Display formatting for telemetry values

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Human-readable byte count, base 1024, at most two decimals.
///
/// `0` and non-finite values render as `0 Bytes`.
#[must_use]
pub fn format_bytes(bytes: f64) -> String {
    if bytes <= 0.0 || !bytes.is_finite() {
        return "0 Bytes".to_string();
    }
    let exponent = (bytes.ln() / 1024f64.ln()).floor().max(0.0) as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes / 1024f64.powi(exponent as i32);
    format!("{} {}", trim_decimals(value), UNITS[exponent])
}

/// Throughput as `<bytes>/s`
#[must_use]
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Uptime seconds as `{d}d {h}h {m}m {s}s`
#[must_use]
pub fn format_uptime(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "N/A".to_string();
    }
    let total = seconds.floor() as u64;
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let secs = total % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, secs)
}

fn trim_decimals(value: f64) -> String {
    let fixed = format!("{:.2}", value);
    if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        fixed
    }
}
