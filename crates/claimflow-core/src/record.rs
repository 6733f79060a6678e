//! Claim Record Data Structure
//!
//! This module defines `ClaimRecord` - one typed row of the claims source file -
//! together with the entity identifier it belongs to.
//!
//! ## What is a Claim Record?
//! Each row of the source file describes one insurance claim filed for a pet:
//! - **pet_id**: The entity that owns the claim history (routing key)
//! - **claim_id**: Unique claim identifier within the pet's history
//! - **claim_amount_cents**: Claimed amount in minor units
//! - **claim_date**: When the claim was filed; doubles as the claim revision
//!
//! ## Design Decisions
//! - Monetary amounts are integer cents so merge comparisons are exact
//! - Timestamps are `DateTime<Utc>`; date-only inputs mean midnight UTC
//! - `EntityId` wraps a UUID so routing can use its canonical byte layout
//!
//! ## Example
//! ```ignore
//! let amount = parse_amount_cents("ClaimAmount", "125.50")?;
//! assert_eq!(amount, 12_550);
//! assert_eq!(format_amount_cents(amount), "125.50");
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of the entity (pet) that owns a claim history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Canonical byte representation used for routing.
    ///
    /// The first three UUID fields are little-endian, matching the GUID
    /// layout the claims producers have always hashed over.
    pub fn routing_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A single decoded row of the claims file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Policy the claim was filed under
    pub policy_number: String,

    /// Pet (entity) the claim belongs to
    pub pet_id: EntityId,

    /// Claim identifier, unique within a pet's history
    pub claim_id: String,

    /// Policy holder name
    pub customer_name: String,

    /// Claimed amount in cents
    pub claim_amount_cents: i64,

    /// Date the loss occurred
    pub date_of_loss: DateTime<Utc>,

    /// Date the claim was filed (claim revision timestamp)
    pub claim_date: DateTime<Utc>,

    /// Claim status ("Submitted", "Approved", ...)
    pub status: String,

    /// Free-text description
    pub description: String,

    /// Policy term the claim applies to
    #[serde(default)]
    pub term_number: Option<i32>,

    /// Approved amount in cents, once adjudicated
    #[serde(default)]
    pub approved_amount_cents: Option<i64>,

    /// Treating veterinarian
    #[serde(default)]
    pub veterinarian: Option<String>,
}

impl ClaimRecord {
    /// The entity this record updates.
    pub fn entity_id(&self) -> EntityId {
        self.pet_id
    }
}

/// Parse a decimal amount ("125.5", "-3", "$1,200.00") into cents.
///
/// More than two fractional digits are accepted only when the extra digits
/// are zeros; anything else would silently lose money.
pub fn parse_amount_cents(column: &'static str, raw: &str) -> Result<i64> {
    let invalid = || Error::InvalidField {
        column,
        value: raw.to_string(),
    };

    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };

    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > 2 && frac[2..].chars().any(|c| c != '0') {
        return Err(invalid());
    }

    let whole_value: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut frac_digits: String = frac.chars().take(2).collect();
    while frac_digits.len() < 2 {
        frac_digits.push('0');
    }
    let frac_value: i64 = frac_digits.parse().map_err(|_| invalid())?;

    let cents = whole_value
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(invalid)?;
    Ok(if negative { -cents } else { cents })
}

/// Format cents as a plain decimal string with two fractional digits.
pub fn format_amount_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a timestamp in any of the formats found in claims exports.
pub fn parse_timestamp(column: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    let value = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
    }

    Err(Error::InvalidField {
        column,
        value: raw.to_string(),
    })
}

/// Format a timestamp the way the codec writes it (RFC 3339, second precision).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount_cents("ClaimAmount", "125.50").unwrap(), 12_550);
        assert_eq!(parse_amount_cents("ClaimAmount", "125.5").unwrap(), 12_550);
        assert_eq!(parse_amount_cents("ClaimAmount", "125").unwrap(), 12_500);
        assert_eq!(parse_amount_cents("ClaimAmount", "$1,200.00").unwrap(), 120_000);
        assert_eq!(parse_amount_cents("ClaimAmount", "-3.07").unwrap(), -307);
        assert_eq!(parse_amount_cents("ClaimAmount", ".75").unwrap(), 75);
        assert_eq!(parse_amount_cents("ClaimAmount", "10.500").unwrap(), 1_050);
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(parse_amount_cents("ClaimAmount", "").is_err());
        assert!(parse_amount_cents("ClaimAmount", "abc").is_err());
        assert!(parse_amount_cents("ClaimAmount", "1.2.3").is_err());
        assert!(parse_amount_cents("ClaimAmount", "10.555").is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount_cents(12_550), "125.50");
        assert_eq!(format_amount_cents(5), "0.05");
        assert_eq!(format_amount_cents(-307), "-3.07");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("ClaimDate", "2024-03-01").unwrap(), midnight);
        assert_eq!(parse_timestamp("ClaimDate", "03/01/2024").unwrap(), midnight);

        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("ClaimDate", "2024-03-01T12:30:00Z").unwrap(), noon);
        assert_eq!(parse_timestamp("ClaimDate", "2024-03-01 12:30:00").unwrap(), noon);
        assert_eq!(
            parse_timestamp("ClaimDate", "2024-03-01T14:30:00+02:00").unwrap(),
            noon
        );

        assert!(parse_timestamp("ClaimDate", "yesterday").is_err());
    }

    #[test]
    fn test_entity_id_routing_bytes_are_guid_ordered() {
        let id: EntityId = "00010203-0405-0607-0809-0a0b0c0d0e0f".parse().unwrap();
        let bytes = id.routing_bytes();
        assert_eq!(&bytes[..4], &[0x03, 0x02, 0x01, 0x00]);
        assert_eq!(&bytes[4..6], &[0x05, 0x04]);
        assert_eq!(&bytes[8..], &[0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]);
    }
}
