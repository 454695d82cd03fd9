//! Human-readable size parsing and representation.
//!
//! Supports the size strings container tooling commonly accepts:
//! - Decimal (powers of 1000): "20MB", "1G", "1.5gb", "500k"
//! - Binary (powers of 1024): "512Mi", "1GiB", "2 KiB"
//! - Plain byte counts: "20000000"
//!
//! Any string containing an `i` is read with binary multipliers, everything
//! else with decimal ones. Units are case-insensitive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VolumeError, VolumeResult};

/// A size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Create a size from a byte count.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create a size from mebibytes (MiB).
    #[must_use]
    pub const fn mebibytes(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    /// Create a size from gibibytes (GiB).
    #[must_use]
    pub const fn gibibytes(gib: u64) -> Self {
        Self(gib * 1024 * 1024 * 1024)
    }

    /// Get the size in bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Parse a human-readable size string.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidSize`] for malformed values, unknown
    /// units and negative numbers.
    pub fn parse(s: &str) -> VolumeResult<Self> {
        let invalid = || VolumeError::InvalidSize {
            value: s.to_string(),
        };

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        if number.is_empty() {
            return Err(invalid());
        }

        let value: f64 = number.parse().map_err(|_| invalid())?;
        let binary = unit.contains(['i', 'I']);
        let base: u64 = if binary { 1024 } else { 1000 };

        let unit = unit.strip_prefix(' ').unwrap_or(unit).to_ascii_lowercase();
        let unit = unit.strip_suffix('b').unwrap_or(&unit);
        let unit = unit.strip_suffix('i').unwrap_or(unit);
        if binary && unit.is_empty() {
            // "i" or "ib" without a magnitude letter
            return Err(invalid());
        }

        let exponent = match unit {
            "" => 0,
            "k" => 1,
            "m" => 2,
            "g" => 3,
            "t" => 4,
            "p" => 5,
            _ => return Err(invalid()),
        };

        #[allow(clippy::cast_precision_loss)]
        let bytes = value * base.pow(exponent) as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(invalid());
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bytes = bytes as u64;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GI: u64 = 1024 * 1024 * 1024;
        const MI: u64 = 1024 * 1024;
        const KI: u64 = 1024;

        if self.0 >= GI && self.0 % GI == 0 {
            write!(f, "{}GiB", self.0 / GI)
        } else if self.0 >= MI && self.0 % MI == 0 {
            write!(f, "{}MiB", self.0 / MI)
        } else if self.0 >= KI && self.0 % KI == 0 {
            write!(f, "{}KiB", self.0 / KI)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

impl FromStr for ByteSize {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> u64 {
        ByteSize::parse(s).unwrap().as_bytes()
    }

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(parse("20000000"), 20_000_000);
        assert_eq!(parse(" 1024 "), 1024);
        assert_eq!(parse("1024b"), 1024);
    }

    #[test]
    fn parse_decimal() {
        assert_eq!(parse("1k"), 1000);
        assert_eq!(parse("20MB"), 20_000_000);
        assert_eq!(parse("50m"), 50_000_000);
        assert_eq!(parse("1G"), 1_000_000_000);
        assert_eq!(parse("1gb"), 1_000_000_000);
        assert_eq!(parse("2 T"), 2_000_000_000_000);
    }

    #[test]
    fn parse_binary() {
        assert_eq!(parse("1Ki"), 1024);
        assert_eq!(parse("512Mi"), 512 * 1024 * 1024);
        assert_eq!(parse("1GiB"), 1024 * 1024 * 1024);
        assert_eq!(parse("1gib"), 1024 * 1024 * 1024);
        assert_eq!(parse("2 KiB"), 2048);
    }

    #[test]
    fn parse_fractional() {
        assert_eq!(parse("1.5G"), 1_500_000_000);
        assert_eq!(parse("0.5GiB"), 512 * 1024 * 1024);
    }

    #[test]
    fn parse_invalid() {
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("G").is_err());
        assert!(ByteSize::parse("-1G").is_err());
        assert!(ByteSize::parse("12X").is_err());
        assert!(ByteSize::parse("1i").is_err());
        assert!(ByteSize::parse("1.2.3M").is_err());
        assert!(ByteSize::parse("1GBB").is_err());
    }

    #[test]
    fn display() {
        assert_eq!(ByteSize::gibibytes(1).to_string(), "1GiB");
        assert_eq!(ByteSize::mebibytes(512).to_string(), "512MiB");
        assert_eq!(ByteSize::bytes(1024).to_string(), "1KiB");
        assert_eq!(ByteSize::bytes(20_000_000).to_string(), "20000000B");
    }
}
