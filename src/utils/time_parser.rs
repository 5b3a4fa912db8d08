use chrono::{DateTime, Duration, Utc};

use crate::errors::{OctolinkError, Result};

/// 解析过期时间，支持：
/// - RFC3339 格式：2026-10-01T12:00:00Z
/// - 相对时间：1d, 2w, 1h30m, 2d12h（相对于 `now`）
pub fn parse_expire_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(OctolinkError::date_parse("expire_at is empty"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    let offset = parse_relative(input)?;
    now.checked_add_signed(offset)
        .ok_or_else(|| OctolinkError::date_parse(format!("expire_at '{}' is out of range", input)))
}

fn parse_relative(input: &str) -> Result<Duration> {
    let invalid = || {
        OctolinkError::date_parse(format!(
            "invalid expire_at '{}': expected RFC3339 or a relative span like 1d2h",
            input
        ))
    };

    let mut total = Duration::zero();
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(invalid());
        }
        let num: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if unit_len == 0 {
            return Err(invalid());
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        // "M" 是月，"m" 是分钟
        let span = match unit {
            "M" => Duration::try_days(num.saturating_mul(30)),
            _ => match unit.to_lowercase().as_str() {
                "s" | "sec" | "second" | "seconds" => Duration::try_seconds(num),
                "m" | "min" | "minute" | "minutes" => Duration::try_minutes(num),
                "h" | "hour" | "hours" => Duration::try_hours(num),
                "d" | "day" | "days" => Duration::try_days(num),
                "w" | "week" | "weeks" => Duration::try_weeks(num),
                "month" | "months" => Duration::try_days(num.saturating_mul(30)),
                "y" | "year" | "years" => Duration::try_days(num.saturating_mul(365)),
                _ => None,
            },
        }
        .ok_or_else(invalid)?;

        total = total.checked_add(&span).ok_or_else(invalid)?;
    }

    if total.is_zero() {
        return Err(OctolinkError::date_parse("expire_at span must not be zero"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339() {
        let now = Utc::now();
        let parsed = parse_expire_at("2025-12-31T23:59:59Z", now).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-12-31T23:59:59+00:00");

        let offset = parse_expire_at("2025-12-31T23:59:59+08:00", now).unwrap();
        assert_eq!(offset.to_rfc3339(), "2025-12-31T15:59:59+00:00");
    }

    #[test]
    fn test_relative() {
        let now = Utc::now();
        assert_eq!(parse_expire_at("1d", now).unwrap() - now, Duration::days(1));
        assert_eq!(parse_expire_at("2w", now).unwrap() - now, Duration::days(14));
        assert_eq!(
            parse_expire_at("1d2h30m", now).unwrap() - now,
            Duration::seconds(24 * 3600 + 2 * 3600 + 30 * 60)
        );
        assert_eq!(parse_expire_at("1M", now).unwrap() - now, Duration::days(30));
        assert_eq!(parse_expire_at("5m", now).unwrap() - now, Duration::minutes(5));
    }

    #[test]
    fn test_invalid() {
        let now = Utc::now();
        for input in ["invalid", "1x", "abc", "", "0d", "10", "d1"] {
            assert!(
                matches!(parse_expire_at(input, now), Err(OctolinkError::DateParse(_))),
                "{:?} should be rejected",
                input
            );
        }
    }
}
