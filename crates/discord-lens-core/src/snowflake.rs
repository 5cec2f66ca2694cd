//! Discord snowflake identifiers.
//!
//! A snowflake is a 64-bit integer rendered as a 17–20 digit decimal string.
//! The high 42 bits hold milliseconds since the Discord epoch; the low bits
//! are worker/process/sequence counters. Anything that fails the digit-length
//! check is rejected with [`Error::Validation`] before any lookup happens.
//!
//! Also hosts the default-avatar derivation used when an entity has no
//! custom image hash. Two formulas exist in the wild and they disagree for
//! legacy (non-zero discriminator) accounts, so the choice is an explicit
//! [`AvatarIndexStrategy`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Milliseconds between the Unix epoch and the Discord epoch (2015-01-01).
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

const MIN_DIGITS: usize = 17;
const MAX_DIGITS: usize = 20;

/// A validated snowflake. Keeps the original string form for display and
/// map keys, and the numeric value for bit arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake {
    raw: String,
    value: u64,
}

impl Snowflake {
    /// Validate and parse a snowflake string.
    pub fn parse(s: &str) -> Result<Self> {
        let len = s.len();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&len) || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Validation(format!(
                "'{}' is not a valid snowflake ({}-{} digits)",
                s, MIN_DIGITS, MAX_DIGITS
            )));
        }
        let value = s
            .parse::<u64>()
            .map_err(|_| Error::Validation(format!("'{}' does not fit in 64 bits", s)))?;
        Ok(Self {
            raw: s.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Creation time encoded in the high bits.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let ms = (self.value >> 22) + DISCORD_EPOCH_MS;
        DateTime::from_timestamp_millis(ms as i64)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Snowflake {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Snowflake::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// How to pick one of Discord's built-in avatars for an entity without a
/// custom image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarIndexStrategy {
    /// `(id >> 22) % 6` for every account.
    #[default]
    Snowflake,
    /// `discriminator % 5` for legacy accounts; accounts on the new
    /// username system (discriminator `"0"` or absent) use the snowflake
    /// formula.
    Discriminator,
}

impl AvatarIndexStrategy {
    pub fn index(&self, id: &Snowflake, discriminator: Option<&str>) -> u64 {
        match self {
            AvatarIndexStrategy::Snowflake => (id.value() >> 22) % 6,
            AvatarIndexStrategy::Discriminator => match discriminator
                .filter(|d| !is_pomelo_discriminator(d))
                .and_then(|d| d.parse::<u64>().ok())
            {
                Some(n) => n % 5,
                None => (id.value() >> 22) % 6,
            },
        }
    }
}

fn is_pomelo_discriminator(d: &str) -> bool {
    d.is_empty() || d.bytes().all(|b| b == b'0')
}

impl FromStr for AvatarIndexStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snowflake" => Ok(Self::Snowflake),
            "discriminator" => Ok(Self::Discriminator),
            other => Err(Error::Config(format!(
                "unknown avatar index strategy '{}': use snowflake or discriminator",
                other
            ))),
        }
    }
}
