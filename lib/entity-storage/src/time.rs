use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::StorageError;

/// Storage form of the zero datetime.
pub const ZERO_SQLTIME: &str = "0000-00-00 00:00:00";

/// Storage form of the zero epoch.
pub const ZERO_EPOCH: &str = "0";

const SQL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Storage timestamp with second precision.
//
// Relational stores allow a zero datetime that has no calendar equivalent, so
// it is carried as an explicit variant and written back as the same literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageDatetime {
    #[default]
    Zero,
    At(NaiveDateTime),
}

impl StorageDatetime {
    pub fn now() -> Self {
        StorageDatetime::At(datetime_seconds())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, StorageDatetime::Zero)
    }

    pub fn inner(&self) -> Option<&NaiveDateTime> {
        match self {
            StorageDatetime::Zero => None,
            StorageDatetime::At(dt) => Some(dt),
        }
    }

    /// Unix timestamp in seconds; the zero datetime maps to 0.
    pub fn timestamp(&self) -> i64 {
        match self {
            StorageDatetime::Zero => 0,
            StorageDatetime::At(dt) => dt.and_utc().timestamp(),
        }
    }

    /// Parse an SQL datetime (`YYYY-MM-DD HH:MM:SS` or a bare date).
    ///
    /// Empty input and the zero literal yield [`StorageDatetime::Zero`].
    pub fn from_sql(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        if raw.is_empty() || raw == ZERO_SQLTIME || raw == "0000-00-00" {
            return Ok(StorageDatetime::Zero);
        }

        let parsed = NaiveDateTime::parse_from_str(raw, SQL_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map(|date| date.and_time(chrono::NaiveTime::MIN))
            })
            .map_err(|e| StorageError::decode(format!("Invalid datetime '{}': {}", raw, e)))?;

        Ok(StorageDatetime::At(truncate_seconds(parsed)))
    }

    pub fn to_sql(&self) -> String {
        match self {
            StorageDatetime::Zero => ZERO_SQLTIME.to_string(),
            StorageDatetime::At(dt) => dt.format(SQL_FORMAT).to_string(),
        }
    }

    /// Parse a unix timestamp string. Empty input and `0` yield the zero datetime.
    pub fn from_epoch(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        if raw.is_empty() || raw == ZERO_EPOCH {
            return Ok(StorageDatetime::Zero);
        }

        let seconds: i64 = raw
            .parse()
            .map_err(|e| StorageError::decode(format!("Invalid epoch '{}': {}", raw, e)))?;
        let dt = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| StorageError::decode(format!("Epoch out of range: {}", seconds)))?;

        Ok(StorageDatetime::At(dt.naive_utc()))
    }

    pub fn to_epoch(&self) -> String {
        match self {
            StorageDatetime::Zero => ZERO_EPOCH.to_string(),
            StorageDatetime::At(dt) => dt.and_utc().timestamp().to_string(),
        }
    }
}

impl std::fmt::Display for StorageDatetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

impl From<NaiveDateTime> for StorageDatetime {
    fn from(dt: NaiveDateTime) -> Self {
        StorageDatetime::At(truncate_seconds(dt))
    }
}

impl From<DateTime<Utc>> for StorageDatetime {
    fn from(dt: DateTime<Utc>) -> Self {
        StorageDatetime::At(truncate_seconds(dt.naive_utc()))
    }
}

// Serialized in storage form so cached and wire representations agree
impl Serialize for StorageDatetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_sql())
    }
}

impl<'de> Deserialize<'de> for StorageDatetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StorageDatetime::from_sql(&s).map_err(serde::de::Error::custom)
    }
}

fn truncate_seconds(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

fn datetime_seconds() -> NaiveDateTime {
    let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(time) => time,
        Err(_) => std::time::Duration::from_secs(0),
    };

    match DateTime::from_timestamp(now.as_secs() as i64, 0) {
        Some(time) => time.naive_utc(),
        None => DateTime::<Utc>::from_timestamp_nanos(0).naive_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_literal_round_trips() {
        let zero = StorageDatetime::from_sql(ZERO_SQLTIME).unwrap();
        assert!(zero.is_zero());
        assert_eq!(zero.to_sql(), ZERO_SQLTIME);
        assert_eq!(StorageDatetime::from_sql("").unwrap(), StorageDatetime::Zero);
    }

    #[test]
    fn bare_date_is_midnight() {
        let dt = StorageDatetime::from_sql("2009-04-09").unwrap();
        assert_eq!(dt.to_sql(), "2009-04-09 00:00:00");
    }

    #[test]
    fn epoch_and_sql_agree() {
        let dt = StorageDatetime::from_epoch("1239319493").unwrap();
        assert_eq!(dt.to_sql(), "2009-04-09 23:24:53");
        assert_eq!(dt.to_epoch(), "1239319493");
        assert_eq!(StorageDatetime::from_epoch("").unwrap().to_epoch(), ZERO_EPOCH);
    }
}
