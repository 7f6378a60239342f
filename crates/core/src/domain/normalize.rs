use crate::domain::quote::{FieldValue, QuoteRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

pub const EARNINGS_ANNOUNCEMENT: &str = "earningsAnnouncement";
pub const TIMESTAMP: &str = "timestamp";

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    MissingField { field: &'static str },
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "quote record has no `{field}` field"),
            Self::InvalidField { field, value } => {
                write!(f, "quote field `{field}` is not a calendar time: {value:?}")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Converts `earningsAnnouncement` (ISO-8601 with offset) and `timestamp`
/// (Unix seconds) into UTC calendar time. Fields already holding a time, and
/// null fields, pass through unchanged, so normalizing twice is a no-op.
pub fn normalize(record: &QuoteRecord) -> Result<QuoteRecord, NormalizeError> {
    let announcement = normalize_field(record, EARNINGS_ANNOUNCEMENT, parse_announcement)?;
    let timestamp = normalize_field(record, TIMESTAMP, parse_epoch_seconds)?;

    let mut out = record.clone();
    out.set(EARNINGS_ANNOUNCEMENT, announcement);
    out.set(TIMESTAMP, timestamp);
    Ok(out)
}

fn normalize_field(
    record: &QuoteRecord,
    field: &'static str,
    parse: fn(&FieldValue) -> Option<DateTime<Utc>>,
) -> Result<FieldValue, NormalizeError> {
    let value = record
        .get(field)
        .ok_or(NormalizeError::MissingField { field })?;
    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    parse(value)
        .map(FieldValue::Time)
        .ok_or_else(|| NormalizeError::InvalidField {
            field,
            value: value.to_string(),
        })
}

fn parse_announcement(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Time(t) => Some(*t),
        FieldValue::Text(s) => parse_time_text(s),
        _ => None,
    }
}

fn parse_epoch_seconds(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Time(t) => Some(*t),
        FieldValue::Int(secs) => DateTime::<Utc>::from_timestamp(*secs, 0),
        FieldValue::Float(x) if x.fract() == 0.0 => DateTime::<Utc>::from_timestamp(*x as i64, 0),
        // CSV reloads hand back either the raw integer or an already converted time.
        FieldValue::Text(s) => match s.trim().parse::<i64>() {
            Ok(secs) => DateTime::<Utc>::from_timestamp(secs, 0),
            Err(_) => parse_time_text(s),
        },
        _ => None,
    }
}

/// Accepts the provider's `2024-01-25T21:00:00.000+0000`, RFC 3339, and the
/// `TIME_FORMAT` rendering written to CSV. A bare date is taken as UTC midnight.
pub fn parse_time_text(s: &str) -> Option<DateTime<Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }

    const WITH_OFFSET: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
    ];
    for fmt in WITH_OFFSET {
        if let Ok(dt) = DateTime::parse_from_str(t, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw_quote() -> QuoteRecord {
        [
            ("symbol", FieldValue::Text("AAPL".into())),
            ("price", FieldValue::Float(189.84)),
            (
                EARNINGS_ANNOUNCEMENT,
                FieldValue::Text("2024-01-25T21:00:00.000+0000".into()),
            ),
            ("sharesOutstanding", FieldValue::Int(15_552_752_000)),
            (TIMESTAMP, FieldValue::Int(1_705_700_000)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn converts_both_fields_to_utc() {
        let out = normalize(&raw_quote()).unwrap();

        let announced = Utc.with_ymd_and_hms(2024, 1, 25, 21, 0, 0).unwrap();
        assert_eq!(
            out.get(EARNINGS_ANNOUNCEMENT),
            Some(&FieldValue::Time(announced))
        );
        let ts = Utc.timestamp_opt(1_705_700_000, 0).unwrap();
        assert_eq!(out.get(TIMESTAMP), Some(&FieldValue::Time(ts)));
        assert_eq!(out.get("price"), Some(&FieldValue::Float(189.84)));
    }

    #[test]
    fn is_idempotent() {
        let once = normalize(&raw_quote()).unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn accepts_values_reloaded_from_csv() {
        let once = normalize(&raw_quote()).unwrap();
        let reloaded: QuoteRecord = once
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Text(v.to_string())))
            .collect();

        let again = normalize(&reloaded).unwrap();
        assert_eq!(again.get(TIMESTAMP), once.get(TIMESTAMP));
        assert_eq!(
            again.get(EARNINGS_ANNOUNCEMENT),
            once.get(EARNINGS_ANNOUNCEMENT)
        );
    }

    #[test]
    fn null_announcement_passes_through() {
        let mut rec = raw_quote();
        rec.set(EARNINGS_ANNOUNCEMENT, FieldValue::Null);
        let out = normalize(&rec).unwrap();
        assert_eq!(out.get(EARNINGS_ANNOUNCEMENT), Some(&FieldValue::Null));
    }

    #[test]
    fn missing_field_is_an_error() {
        let rec: QuoteRecord = [
            ("symbol", FieldValue::Text("RELIANCE.NS".into())),
            ("name", FieldValue::Text("Reliance Industries".into())),
        ]
        .into_iter()
        .collect();

        let err = normalize(&rec).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingField {
                field: EARNINGS_ANNOUNCEMENT
            }
        );
    }

    #[test]
    fn garbage_time_is_rejected() {
        let mut rec = raw_quote();
        rec.set(TIMESTAMP, FieldValue::Text("yesterday".into()));
        assert!(matches!(
            normalize(&rec),
            Err(NormalizeError::InvalidField { field: TIMESTAMP, .. })
        ));
    }
}
