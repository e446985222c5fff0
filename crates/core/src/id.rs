//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a datarun (the unit of supervised work).
///
/// Dataruns are keyed by the integer primary key of the job table, so this is
/// a thin newtype over `i64` rather than a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatarunId(i64);

impl DatarunId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for DatarunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for DatarunId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<DatarunId> for i64 {
    fn from(value: DatarunId) -> Self {
        value.0
    }
}

impl FromStr for DatarunId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| DomainError::invalid_id(format!("DatarunId: {}", e)))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_ids() {
        assert_eq!("42".parse::<DatarunId>().unwrap(), DatarunId::new(42));
        assert_eq!(" 7 ".parse::<DatarunId>().unwrap(), DatarunId::new(7));
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let err = "abc".parse::<DatarunId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn displays_as_plain_integer() {
        assert_eq!(DatarunId::new(9001).to_string(), "9001");
    }
}
