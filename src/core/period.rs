//! Period Identifiers
//!
//! A period id is a 14-digit token `YYYYMMDDHHMMSS` that both names one
//! round and encodes the UTC instant at which that round ends.
//!
//! The token is always UTC and never carries an offset. Because every field
//! is zero-padded, lexicographic order of ids equals chronological order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of characters in a period id.
pub const PERIOD_ID_LEN: usize = 14;

/// Errors from decoding wire tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Token is not 14 digits or names an impossible calendar instant.
    #[error("malformed period id: {0:?}")]
    MalformedPeriodId(String),

    /// Free-form boundary stamp could not be parsed.
    #[error("malformed stamp: {0:?}")]
    MalformedStamp(String),
}

/// Validated 14-digit period identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodId {
    raw: String,
    instant: DateTime<Utc>,
}

impl PeriodId {
    /// Parse and validate a period id token.
    pub fn parse(token: &str) -> Result<Self, CodecError> {
        let malformed = || CodecError::MalformedPeriodId(token.to_string());

        if token.len() != PERIOD_ID_LEN || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        // All bytes are ASCII digits, so slicing on byte offsets is safe.
        let field = |range: std::ops::Range<usize>| -> u32 {
            token[range].bytes().fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
        };

        let year = field(0..4) as i32;
        let date = NaiveDate::from_ymd_opt(year, field(4..6), field(6..8)).ok_or_else(malformed)?;
        let naive = date
            .and_hms_opt(field(8..10), field(10..12), field(12..14))
            .ok_or_else(malformed)?;

        Ok(Self {
            raw: token.to_string(),
            instant: Utc.from_utc_datetime(&naive),
        })
    }

    /// Encode an instant as a period id, dropping sub-second precision.
    ///
    /// Years outside `0..=9999` cannot be represented in 14 digits.
    pub fn from_instant(instant: DateTime<Utc>) -> Result<Self, CodecError> {
        let raw = instant.format("%Y%m%d%H%M%S").to_string();
        Self::parse(&raw)
    }

    /// The UTC instant this id encodes.
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// The id of the round that ended `duration_secs` before this one.
    pub fn predecessor(&self, duration_secs: u32) -> Result<Self, CodecError> {
        Self::from_instant(self.instant - Duration::seconds(i64::from(duration_secs)))
    }

    /// The raw 14-digit token.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for PeriodId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeriodId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeriodId> for String {
    fn from(id: PeriodId) -> Self {
        id.raw
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeriodId({})", self.raw)
    }
}
