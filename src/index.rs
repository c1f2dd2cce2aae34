use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_INDEX_PREFIX: &str = "semantic_logger";
pub const DEFAULT_DATE_PATTERN: &str = "%Y.%m.%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("invalid date pattern '{0}'")]
    InvalidDatePattern(String),
}

/// Derives the time-partitioned destination index for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNamer {
    prefix: String,
    date_pattern: String,
}

impl IndexNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            date_pattern: DEFAULT_DATE_PATTERN.to_string(),
        }
    }

    /// Replace the daily suffix pattern (chrono strftime syntax).
    pub fn with_date_pattern(mut self, pattern: impl Into<String>) -> Result<Self, IndexError> {
        let pattern = pattern.into();
        validate_date_pattern(&pattern)?;
        self.date_pattern = pattern;
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>-<date>` using the calendar date of `timestamp` in its own time zone.
    pub fn index_name<Tz>(&self, timestamp: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        format!("{}-{}", self.prefix, timestamp.format(&self.date_pattern))
    }
}

impl Default for IndexNamer {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_PREFIX)
    }
}

/// Daily index name with the default `%Y.%m.%d` suffix.
pub fn daily_index_name<Tz>(prefix: &str, timestamp: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    IndexNamer::new(prefix).index_name(timestamp)
}

/// Reject patterns chrono cannot render; formatting one would panic at runtime.
pub fn validate_date_pattern(pattern: &str) -> Result<(), IndexError> {
    if pattern.is_empty() || StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(IndexError::InvalidDatePattern(pattern.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Local, Utc};

    #[test]
    fn test_default_daily_index() {
        let ts = Local.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap();
        assert_eq!(
            IndexNamer::default().index_name(&ts),
            "semantic_logger-2024.03.07"
        );
    }

    #[test]
    fn test_month_and_day_are_zero_padded() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 23, 59, 59).unwrap();
        assert_eq!(daily_index_name("app", &ts), "app-2026.01.02");
    }

    #[test]
    fn test_uses_date_in_timestamp_zone() {
        // 23:30 UTC on the 7th is already the 8th at UTC+2
        let utc = Utc.with_ymd_and_hms(2024, 3, 7, 23, 30, 0).unwrap();
        let plus_two = utc.with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());

        assert_eq!(daily_index_name("logs", &utc), "logs-2024.03.07");
        assert_eq!(daily_index_name("logs", &plus_two), "logs-2024.03.08");
    }

    #[test]
    fn test_custom_date_pattern() {
        let namer = IndexNamer::new("audit").with_date_pattern("%Y-%m").unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 11, 30, 0, 0, 0).unwrap();
        assert_eq!(namer.index_name(&ts), "audit-2024-11");
    }

    #[test]
    fn test_invalid_date_pattern_rejected() {
        assert_eq!(
            IndexNamer::new("x").with_date_pattern("%Y%"),
            Err(IndexError::InvalidDatePattern("%Y%".to_string()))
        );
        assert!(validate_date_pattern("").is_err());
        assert!(validate_date_pattern(DEFAULT_DATE_PATTERN).is_ok());
    }
}
