//! Timestamp and duration parsing utilities.
//!
//! Model output mixes clock-style timestamps (`HH:MM:SS`, `MM:SS`) with
//! loose duration phrases (`"45 minutes"`, `"~20 min"`, `"Unknown"`); the
//! merger needs both in seconds.

/// Maximum reasonable video duration (24 hours in seconds).
pub const MAX_VIDEO_DURATION_SECS: f64 = 86400.0;

/// Parse a clock-style timestamp string to total seconds.
///
/// Supports `HH:MM:SS`, `MM:SS` and bare `SS`, with optional fractional
/// seconds.
///
/// # Examples
/// ```
/// use vidsum_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    let fields: Vec<f64> = parts
        .iter()
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| TimestampError::InvalidValue(p.to_string()))
        })
        .collect::<Result<_, _>>()?;

    if fields.iter().any(|v| *v < 0.0) {
        return Err(TimestampError::Negative);
    }

    match fields.as_slice() {
        [s] => Ok(*s),
        [m, s] => Ok(m * 60.0 + s),
        [h, m, s] => Ok(h * 3600.0 + m * 60.0 + s),
        _ => Err(TimestampError::InvalidFormat(ts.to_string())),
    }
}

/// Format seconds into an `HH:MM:SS` string. Fractional seconds are
/// truncated.
pub fn format_seconds(total_secs: f64) -> String {
    let total = total_secs.max(0.0).floor() as u64;
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

/// Parse a loose duration expression to seconds.
///
/// Accepts everything [`parse_timestamp`] does, plus phrases the model
/// emits in metadata fields:
/// - `"45 minutes"`, `"20 min"`, `"~12 min"` (leading `~` ignored)
/// - a bare number, treated as minutes
/// - the literal `"Unknown"` (any case), which parses to 0
pub fn parse_duration(text: &str) -> f64 {
    let text = text.trim().trim_start_matches('~').trim();
    if text.is_empty() || text.eq_ignore_ascii_case("unknown") {
        return 0.0;
    }

    if text.contains(':') {
        return parse_timestamp(text).unwrap_or(0.0);
    }

    // "N minutes" / "N min" / bare "N" - all minutes.
    let numeric: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    match numeric.parse::<f64>() {
        Ok(n) if n >= 0.0 => n * 60.0,
        _ => 0.0,
    }
}

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampError {
    /// Timestamp string is empty
    Empty,
    /// Timestamp contains negative values
    Negative,
    /// A component is not numeric
    InvalidValue(String),
    /// Too many `:`-separated fields
    InvalidFormat(String),
}

impl std::fmt::Display for TimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Timestamp cannot be empty"),
            Self::Negative => write!(f, "Timestamp cannot be negative"),
            Self::InvalidValue(v) => write!(f, "Invalid timestamp component: {}", v),
            Self::InvalidFormat(ts) => write!(
                f,
                "Invalid timestamp format '{}'. Use HH:MM:SS, MM:SS, or SS",
                ts
            ),
        }
    }
}

impl std::error::Error for TimestampError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_hh_mm_ss() {
        assert_eq!(parse_timestamp("00:00:00").unwrap(), 0.0);
        assert_eq!(parse_timestamp("00:01:00").unwrap(), 60.0);
        assert_eq!(parse_timestamp("01:30:45").unwrap(), 5445.0);
    }

    #[test]
    fn test_parse_timestamp_mm_ss() {
        assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
        assert_eq!(parse_timestamp("53:53").unwrap(), 3233.0);
    }

    #[test]
    fn test_parse_timestamp_fractional() {
        let result = parse_timestamp("00:00:30.5").unwrap();
        assert!((result - 30.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_timestamp_errors() {
        assert!(matches!(parse_timestamp(""), Err(TimestampError::Empty)));
        assert!(matches!(
            parse_timestamp("abc"),
            Err(TimestampError::InvalidValue(_))
        ));
        assert!(matches!(
            parse_timestamp("1:2:3:4"),
            Err(TimestampError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_timestamp("-1:00"),
            Err(TimestampError::Negative)
        ));
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.0), "00:00:00");
        assert_eq!(format_seconds(90.0), "00:01:30");
        assert_eq!(format_seconds(3661.0), "01:01:01");
        assert_eq!(format_seconds(1314.0), "00:21:54");
    }

    #[test]
    fn test_parse_duration_table() {
        assert_eq!(parse_duration("05:30"), 330.0);
        assert_eq!(parse_duration("01:00:00"), 3600.0);
        assert_eq!(parse_duration("45 minutes"), 2700.0);
        assert_eq!(parse_duration("20 min"), 1200.0);
        assert_eq!(parse_duration("~12 min"), 720.0);
        assert_eq!(parse_duration("15"), 900.0);
        assert_eq!(parse_duration("Unknown"), 0.0);
        assert_eq!(parse_duration("unknown"), 0.0);
        assert_eq!(parse_duration(""), 0.0);
        assert_eq!(parse_duration("garbage"), 0.0);
    }

    #[test]
    fn test_format_then_parse_roundtrip() {
        for secs in [0.0, 59.0, 60.0, 3599.0, 3600.0, 5445.0] {
            let formatted = format_seconds(secs);
            assert_eq!(parse_timestamp(&formatted).unwrap(), secs);
        }
    }
}
