//! SQLite adapters for the core store ports.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use slideboard_core::store::StoreError;
use thiserror::Error;

pub mod quote;
pub mod template;

pub use quote::SqlQuoteStore;
pub use template::SqlTemplateStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(sqlx::Error::Database(error))
                if error.is_unique_violation() =>
            {
                StoreError::Duplicate(error.message().to_owned())
            }
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// Fixed-width UTC form, so stored timestamps compare correctly as text.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(
    column: &str,
    value: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| decode_timestamp(column, &raw)).transpose()
}

pub(crate) fn decode_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("{column} `{value}`: {error}")))
}

pub(crate) fn decode_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} {value} is out of range")))
}

pub(crate) fn column<'r, T>(
    row: &'r sqlx::sqlite::SqliteRow,
    name: &str,
) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    use sqlx::Row;
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use slideboard_core::store::StoreError;

    use super::{decode_decimal, decode_timestamp, encode_timestamp, RepositoryError};

    #[test]
    fn timestamps_keep_a_sortable_fixed_width() {
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        let (early_text, late_text) = (encode_timestamp(early), encode_timestamp(late));

        assert_eq!(early_text, "2026-03-02T09:00:00.000000Z");
        assert_eq!(early_text.len(), late_text.len());
        assert!(early_text < late_text);
        assert_eq!(decode_timestamp("created_at", &late_text).expect("decode"), late);
    }

    #[test]
    fn malformed_money_is_a_decode_error() {
        let amount = decode_decimal("final_amount", "380.00").expect("decimal");
        assert_eq!(amount.to_string(), "380.00");
        let error = decode_decimal("final_amount", "3,80").expect_err("bad decimal");
        assert!(matches!(StoreError::from(error), StoreError::Decode(_)));
    }

    #[test]
    fn decode_errors_name_the_column() {
        let error = decode_timestamp("valid_until", "yesterday").expect_err("bad timestamp");
        assert!(matches!(
            error,
            RepositoryError::Decode(ref message) if message.starts_with("valid_until")
        ));
    }
}
