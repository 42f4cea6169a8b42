//! Unit conversion between the API (Hz) and the wire (MHz)

/// Hz per MHz
pub const HZ_PER_MHZ: f64 = 1_000_000.0;

/// Unix timestamp of the GPS epoch (1980-01-06T00:00:00Z)
pub const GPS_EPOCH_UNIX: i64 = 315_964_800;

/// Leap seconds between GPS time and UTC
pub const GPS_LEAP_SECONDS: i64 = 18;

/// Convert Unix seconds to GPS seconds
pub fn unix_to_gps(unix: f64) -> f64 {
    unix - GPS_EPOCH_UNIX as f64 + GPS_LEAP_SECONDS as f64
}

/// Convert GPS seconds to Unix seconds
pub fn gps_to_unix(gps: f64) -> f64 {
    gps + GPS_EPOCH_UNIX as f64 - GPS_LEAP_SECONDS as f64
}

/// Convert a wire MHz value to Hz, rounded to the millihertz
///
/// Rounding removes the binary noise of decimal MHz values such as `0.001`.
pub fn mhz_to_hz(mhz: f64) -> f64 {
    (mhz * HZ_PER_MHZ * 1_000.0).round() / 1_000.0
}

/// Convert Hz to MHz
pub fn hz_to_mhz(hz: f64) -> f64 {
    hz / HZ_PER_MHZ
}

/// Format Hz as a wire MHz value with 1 Hz resolution
pub fn format_mhz(hz: f64) -> String {
    format!("{:.6}", hz_to_mhz(hz))
}

/// Format a plain number without a trailing `.0` when integral
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Format Hz for log messages
pub fn display_hz(hz: f64) -> String {
    if hz.abs() >= HZ_PER_MHZ {
        format!("{:.6} MHz", hz_to_mhz(hz))
    } else if hz.abs() >= 1_000.0 {
        format!("{:.3} kHz", hz / 1_000.0)
    } else {
        format!("{hz:.0} Hz")
    }
}
