//! Unix timestamps for payment validity windows.
//!
//! All timestamps on the x402 v2 wire are Unix seconds encoded as decimal
//! strings, preserving precision in JSON where `Number` cannot safely carry
//! all 64-bit integers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::SystemTime;

/// Seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// # Serialization
///
/// Serialized as a stringified integer: `"1740672160"`. Deserialization
/// rejects signs, non-digits, and leading zeros other than a bare `"0"`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// The current system time.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set before the Unix epoch.
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        Self(now)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds from `earlier` to `self`, or `None` if `self` is earlier.
    pub fn seconds_since(&self, earlier: UnixTimestamp) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }

    pub fn saturating_sub(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) || (s.len() > 1 && s.starts_with('0')) {
            return Err(serde::de::Error::custom(
                "timestamp must be a decimal string without leading zeros",
            ));
        }
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp out of range"))?;
        Ok(UnixTimestamp(ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ts = UnixTimestamp::from_secs(1740672160);
        let serialized = serde_json::to_string(&ts).unwrap();
        assert_eq!(serialized, "\"1740672160\"");
        let deserialized: UnixTimestamp = serde_json::from_str(&serialized).unwrap();
        assert_eq!(ts, deserialized);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(serde_json::from_str::<UnixTimestamp>("\"-5\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("\"+5\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("\"007\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("\"\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("1740672160").is_err());
    }

    #[test]
    fn test_zero_is_allowed() {
        let ts: UnixTimestamp = serde_json::from_str("\"0\"").unwrap();
        assert_eq!(ts.as_secs(), 0);
    }

    #[test]
    fn test_seconds_since() {
        let earlier = UnixTimestamp::from_secs(100);
        let later = UnixTimestamp::from_secs(160);
        assert_eq!(later.seconds_since(earlier), Some(60));
        assert_eq!(earlier.seconds_since(later), None);
    }
}
