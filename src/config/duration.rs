//! # Duration Parsing
//!
//! Parses Kubernetes-style duration strings used by the broker configuration.

use anyhow::Result;
use regex::Regex;
use std::time::Duration;

/// Parse Kubernetes duration string into `std::time::Duration`
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let duration_regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    let lowered = duration_trimmed.to_lowercase();
    let captures = duration_regex.captures(&lowered).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '30s', '15m', '1h')",
            duration_trimmed
        )
    })?;

    let number: u64 = captures["number"].parse().map_err(|e| {
        anyhow::anyhow!(
            "Invalid duration number '{}' in '{}': {}",
            &captures["number"],
            duration_trimmed,
            e
        )
    })?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{}'",
            duration_trimmed
        ));
    }

    let seconds = match &captures["unit"] {
        "s" => Some(number),
        "m" => number.checked_mul(60),
        "h" => number.checked_mul(60 * 60),
        "d" => number.checked_mul(24 * 60 * 60),
        unit => {
            return Err(anyhow::anyhow!(
                "Unsupported duration unit '{}' in '{}'",
                unit,
                duration_trimmed
            ))
        }
    }
    .ok_or_else(|| anyhow::anyhow!("Duration '{}' is too large", duration_trimmed))?;

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_duration_is_case_insensitive_and_trimmed() {
        assert_eq!(parse_duration(" 30M ").unwrap(), Duration::from_secs(1800));
    }

    #[test]
    fn test_parse_duration_rejects_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0m").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("15 minutes").is_err());
        assert!(parse_duration("-5m").is_err());
    }
}
