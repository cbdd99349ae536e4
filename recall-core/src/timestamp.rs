use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Normalize a timestamp value from an export payload to UTC.
///
/// Export formats disagree wildly: ChatGPT and OpenWebUI write numeric Unix
/// epochs (sometimes fractional, sometimes milli- or nanoseconds), Claude
/// writes ISO-8601 strings. Scale inference for integers: values above 10^12
/// are nanoseconds, above 10^11 milliseconds, otherwise seconds.
///
/// Returns `None` for missing or unparseable values; callers fall back to
/// their own defaults rather than failing the import.
pub fn normalize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                from_epoch(f)
            } else {
                None
            }
        }
        Value::String(s) => parse_iso8601(s),
        _ => None,
    }
}

/// Convert a numeric epoch with scale inference to UTC.
pub fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let seconds = if raw > 1e12 {
        raw / 1e9
    } else if raw > 1e11 {
        raw / 1e3
    } else {
        raw
    };
    let secs = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Parse an ISO-8601 string, accepting both `Z` and explicit offsets, plus
/// the space-separated form some exports use.
pub fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Naive "YYYY-mm-dd HH:MM:SS" is treated as UTC.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn epoch_seconds() {
        let ts = normalize_timestamp(&json!(1_700_000_000)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn epoch_milliseconds_inferred() {
        let ts = normalize_timestamp(&json!(1_700_000_000_123_i64)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn epoch_nanoseconds_inferred() {
        let ts = normalize_timestamp(&json!(1_700_000_000_000_000_000_i64)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn fractional_epoch_seconds() {
        let ts = normalize_timestamp(&json!(1_700_000_000.5)).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn iso8601_zulu_and_offset() {
        let z = normalize_timestamp(&json!("2024-06-01T12:00:00Z")).unwrap();
        let off = normalize_timestamp(&json!("2024-06-01T14:00:00+02:00")).unwrap();
        assert_eq!(z, off);
    }

    #[test]
    fn naive_string_treated_as_utc() {
        let ts = normalize_timestamp(&json!("2024-06-01 12:00:00")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-06-01T12:00:00+00:00");
    }

    #[test]
    fn garbage_is_dropped() {
        assert!(normalize_timestamp(&json!("next tuesday")).is_none());
        assert!(normalize_timestamp(&json!(null)).is_none());
        assert!(normalize_timestamp(&json!(-5)).is_none());
        assert!(normalize_timestamp(&json!([1, 2])).is_none());
    }
}
