//! Capture interval parsing
//!
//! Accepts `Nh`, `Nm`, `Ns` and compound forms like `1h30m` or `5m0s`
//! (the shape Kubernetes `metav1.Duration` fields serialize to), or bare
//! seconds.

use std::time::Duration;

use crate::{Error, Result};

/// Capture interval used when a workload does not set one
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Parse a human-friendly duration string.
///
/// Examples: "1h" → 3600s, "30m" → 1800s, "1h30m" → 5400s, "90" → 90s.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::validation("invalid duration: empty string"));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || {
        Error::validation(format!(
            "invalid duration '{}', expected e.g. 1h, 30m, 90s, 1h30m",
            s
        ))
    };

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
        digits.clear();
    }

    // Trailing digits without a unit ("1h30")
    if !digits.is_empty() {
        return Err(invalid());
    }

    Ok(Duration::from_secs(total))
}

/// Parse an optional interval, falling back to [`DEFAULT_CAPTURE_INTERVAL`].
pub fn capture_interval_or_default(s: Option<&str>) -> Result<Duration> {
    match s {
        Some(s) => parse_duration(s),
        None => Ok(DEFAULT_CAPTURE_INTERVAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("5m0s").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration(" 2m30s ").unwrap(), Duration::from_secs(150));
    }

    #[test]
    fn test_bare_seconds() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_invalid() {
        for bad in ["", "abc", "5d", "1h30", "m", "-5m"] {
            let err = parse_duration(bad).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(
            capture_interval_or_default(None).unwrap(),
            DEFAULT_CAPTURE_INTERVAL
        );
        assert_eq!(
            capture_interval_or_default(Some("1m")).unwrap(),
            Duration::from_secs(60)
        );
    }
}
