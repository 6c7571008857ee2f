//! Conversion of MySQL rows to storage form.

use entity_storage::{Row, StorageDatetime, StorageError, ZERO_SQLTIME};
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

const ZERO_SQLDATE: &str = "0000-00-00";

/// Convert every column of a row to its storage string.
pub(crate) fn row_to_map(row: &MySqlRow) -> Result<Row, StorageError> {
    let mut values = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        values.insert(column.name().to_string(), column_to_string(row, idx)?);
    }
    Ok(values)
}

/// Storage string of one column; `None` for NULL.
pub(crate) fn column_to_string(row: &MySqlRow, idx: usize) -> Result<Option<String>, StorageError> {
    let raw = row.try_get_raw(idx).map_err(StorageError::storage)?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_string();

    // Handle based on MySQL type
    let value = match type_name.as_str() {
        "BOOLEAN" => {
            let v: bool = row.try_get(idx).map_err(StorageError::storage)?;
            let literal = if v { "1" } else { "0" };
            literal.to_string()
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            let v: i64 = row.try_get_unchecked(idx).map_err(StorageError::storage)?;
            v.to_string()
        }
        s if s.ends_with("UNSIGNED") => {
            let v: u64 = row.try_get_unchecked(idx).map_err(StorageError::storage)?;
            v.to_string()
        }
        "FLOAT" | "DOUBLE" => {
            let v: f64 = row.try_get_unchecked(idx).map_err(StorageError::storage)?;
            v.to_string()
        }
        // Zero dates do not decode; they keep their literal form
        "DATETIME" | "TIMESTAMP" => match row.try_get::<chrono::NaiveDateTime, _>(idx) {
            Ok(v) => StorageDatetime::from(v).to_sql(),
            Err(e) => zero_date_or(row, idx, e, ZERO_SQLTIME)?,
        },
        "DATE" => match row.try_get::<chrono::NaiveDate, _>(idx) {
            Ok(v) => v.format("%Y-%m-%d").to_string(),
            Err(e) => zero_date_or(row, idx, e, ZERO_SQLDATE)?,
        },
        s if s.contains("BLOB") || s.contains("BINARY") => {
            let v: Vec<u8> = row.try_get_unchecked(idx).map_err(StorageError::storage)?;
            bytes_to_string(v)?
        }
        _ => {
            // Default: treat as string (VARCHAR, TEXT, CHAR, DECIMAL, JSON, ENUM, etc.)
            let v: String = row.try_get_unchecked(idx).map_err(StorageError::storage)?;
            v
        }
    };

    Ok(Some(value))
}

/// Zero literal when the undecodable column holds a MySQL zero date, else the
/// decode error.
fn zero_date_or(
    row: &MySqlRow,
    idx: usize,
    error: sqlx::Error,
    literal: &str,
) -> Result<String, StorageError> {
    let bytes: Vec<u8> = row.try_get_unchecked(idx).map_err(StorageError::storage)?;
    if is_zero_date(&bytes) {
        Ok(literal.to_string())
    } else {
        Err(StorageError::storage(error))
    }
}

/// True for a zero date in either protocol: text `0000-00-00...`, or a binary
/// value with no components or all-zero year, month and day.
fn is_zero_date(bytes: &[u8]) -> bool {
    if bytes.starts_with(ZERO_SQLDATE.as_bytes()) {
        return true;
    }
    match bytes.split_first() {
        None => true,
        Some((len, rest)) => *len == 0 || (rest.len() >= 4 && rest[..4].iter().all(|b| *b == 0)),
    }
}

fn bytes_to_string(bytes: Vec<u8>) -> Result<String, StorageError> {
    String::from_utf8(bytes)
        .map_err(|e| StorageError::decode(format!("Binary column is not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dates_are_recognised_in_both_protocols() {
        assert!(is_zero_date(b"0000-00-00 00:00:00"));
        assert!(is_zero_date(b"0000-00-00"));
        assert!(is_zero_date(&[]));
        assert!(is_zero_date(&[0]));
        assert!(is_zero_date(&[7, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn real_dates_are_not_zero() {
        assert!(!is_zero_date(b"2009-04-09 23:24:53"));
        // 2009-04-09 in binary form: length, year (LE), month, day
        assert!(!is_zero_date(&[4, 0xD9, 0x07, 4, 9]));
        assert!(!is_zero_date(&[4, 0, 0]));
    }

    #[test]
    fn binary_columns_must_be_utf8() {
        assert_eq!(bytes_to_string(b"plain".to_vec()).unwrap(), "plain");

        let err = bytes_to_string(vec![0x66, 0xFF, 0x6F]).unwrap_err();
        assert!(err.is_decode_failure());
    }
}
