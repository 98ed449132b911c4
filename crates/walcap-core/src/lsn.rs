//! LSN (Log Sequence Number) type for PostgreSQL replication.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A position in the server's write-ahead log.
///
/// Serializes as the `X/Y` text form Postgres prints (`0/16B3748`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    /// Parse LSN from "X/Y" format.
    pub fn parse(lsn: &str) -> Result<Self> {
        let (high, low) = lsn
            .split_once('/')
            .ok_or_else(|| Error::InvalidLsn(lsn.to_string()))?;

        let high = u64::from_str_radix(high, 16).map_err(|_| Error::InvalidLsn(lsn.to_string()))?;
        let low = u64::from_str_radix(low, 16).map_err(|_| Error::InvalidLsn(lsn.to_string()))?;
        if high > u32::MAX as u64 || low > u32::MAX as u64 {
            return Err(Error::InvalidLsn(lsn.to_string()));
        }

        Ok(Lsn((high << 32) | low))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Lsn::parse(s)
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Lsn::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsn() {
        assert_eq!(Lsn::parse("0/16B3748").unwrap(), Lsn(0x16B3748));
        assert_eq!(Lsn::parse("1/16B3748").unwrap(), Lsn(0x100000000 + 0x16B3748));
        assert!(Lsn::parse("invalid").is_err());
        assert!(Lsn::parse("1/2/3").is_err());
        assert!(Lsn::parse("100000000/0").is_err());
    }

    #[test]
    fn test_format_lsn() {
        assert_eq!(Lsn(0x16B3748).to_string(), "0/16B3748");
        assert_eq!(Lsn(0x100000000 + 0x16B3748).to_string(), "1/16B3748");
        assert_eq!(Lsn::ZERO.to_string(), "0/0");
    }

    #[test]
    fn test_lsn_ordering() {
        assert!(Lsn(0x100) < Lsn(0x108));
        assert!(Lsn::parse("1/0").unwrap() > Lsn::parse("0/FFFFFFFF").unwrap());
    }

    #[test]
    fn test_lsn_serde_text_form() {
        let json = serde_json::to_string(&Lsn(0x16B3748)).unwrap();
        assert_eq!(json, "\"0/16B3748\"");
        let back: Lsn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Lsn(0x16B3748));
    }
}
