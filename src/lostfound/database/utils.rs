use chrono::{DateTime, Utc};
use sqlx::Row;

/// Parses an INTEGER column holding milliseconds since the Unix epoch.
pub(crate) fn parse_timestamp<'r, R>(
    row: &'r R,
    column_name: &'r str,
) -> Result<DateTime<Utc>, sqlx::Error>
where
    R: Row,
    &'r str: sqlx::ColumnIndex<R>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    let timestamp_ms: i64 = row.try_get(column_name)?;
    DateTime::from_timestamp_millis(timestamp_ms)
        .filter(|_| timestamp_ms >= 0)
        .ok_or_else(|| sqlx::Error::ColumnDecode {
            index: column_name.to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid timestamp",
            )),
        })
}
