//! Human-readable formatting for status messages.

use std::time::Duration;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count with decimal units, e.g. `1.5 MB`.
pub fn bytes(n: u64) -> String {
    if n < 1000 {
        return format!("{} B", n);
    }
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a duration as `H:MM:SS`.
pub fn duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_small_values_are_exact() {
        assert_eq!(bytes(0), "0 B");
        assert_eq!(bytes(999), "999 B");
    }

    #[test]
    fn bytes_scale_up() {
        assert_eq!(bytes(1_500), "1.5 KB");
        assert_eq!(bytes(10_000_000), "10.0 MB");
        assert_eq!(bytes(2_500_000_000), "2.5 GB");
    }

    #[test]
    fn duration_as_clock() {
        assert_eq!(duration(Duration::from_secs(5)), "0:00:05");
        assert_eq!(duration(Duration::from_secs(3600)), "1:00:00");
        assert_eq!(duration(Duration::from_secs(3725)), "1:02:05");
    }
}
