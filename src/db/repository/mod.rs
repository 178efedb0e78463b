//! Repository layer: entity-scoped database operations on a borrowed
//! connection. Callers own locking and transaction boundaries beyond a
//! single call.

mod exam;
mod patient;
mod reading;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::DatabaseError;

pub use exam::*;
pub use patient::*;
pub use reading::*;

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp {s}: {e}")))
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
