//! Human-readable sizes and ratios for log lines.

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with base-1024 scaling and two decimals, e.g. `10.00 MB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Archive bytes as a percentage of source bytes, or `None` for an empty source.
pub fn compression_ratio(archive_bytes: u64, source_bytes: u64) -> Option<f64> {
    if source_bytes == 0 {
        None
    } else {
        Some(archive_bytes as f64 / source_bytes as f64 * 100.0)
    }
}

/// Formats [`compression_ratio`] as `42.10%`, or `N/A`.
pub fn format_ratio(archive_bytes: u64, source_bytes: u64) -> String {
    match compression_ratio(archive_bytes, source_bytes) {
        Some(ratio) => format!("{ratio:.2}%"),
        None => "N/A".to_string(),
    }
}

/// Converts a megabyte setting to bytes.
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}
