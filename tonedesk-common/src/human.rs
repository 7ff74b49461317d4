//! Human-readable size and duration formatting for chat replies

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Format a byte count with binary (1024) steps, e.g. `"3.50 MB"`.
///
/// # Examples
///
/// ```
/// use tonedesk_common::human::format_size;
///
/// assert_eq!(format_size(512), "512.00 B");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in SIZE_UNITS {
        if value < 1024.0 {
            return format!("{:.2} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.2} TB", value)
}

/// Format seconds as `"1h 2m 3s"`, `"2m 3s"` or `"3s"`.
///
/// Negative and non-finite inputs render as `"0s"`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0s".to_string();
    }
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Text progress bar, `[=====     ]`
pub fn progress_bar(percentage: f64, length: usize) -> String {
    let clamped = if percentage.is_finite() {
        percentage.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let filled = ((length as f64) * clamped / 100.0) as usize;
    format!("[{}{}]", "=".repeat(filled), " ".repeat(length - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.00 GB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 * 1024), "5.00 TB");
    }

    #[test]
    fn test_format_duration_ranges() {
        assert_eq!(format_duration(42.9), "42s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3725.0), "1h 2m 5s");
    }

    #[test]
    fn test_format_duration_edge_cases() {
        assert_eq!(format_duration(-3.0), "0s");
        assert_eq!(format_duration(f64::NAN), "0s");
    }

    #[test]
    fn test_progress_bar_fill() {
        assert_eq!(progress_bar(50.0, 10), "[=====     ]");
        assert_eq!(progress_bar(150.0, 4), "[====]");
        assert_eq!(progress_bar(-5.0, 4), "[    ]");
    }
}
