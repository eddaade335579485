//! Time-ordered 64-bit identifiers ("snowflakes").
//!
//! Every remote entity (guild, channel, role, user, message) is keyed by a
//! [`Snowflake`]. The raw value packs four subfields:
//!
//! ```text
//!  63                          22 21     17 16     12 11          0
//! +------------------------------+---------+---------+-------------+
//! | timestamp (ms since epoch)   | worker  | process | sequence    |
//! |           42 bits            | 5 bits  | 5 bits  |   12 bits   |
//! +------------------------------+---------+---------+-------------+
//! ```
//!
//! The timestamp is an offset from [`DISCORD_EPOCH_MS`], so ordering by raw
//! value is ordering by creation time.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The first millisecond of 2015 (UTC), the zero point of every timestamp.
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Smallest raw value considered a real identifier (non-zero timestamp).
pub const EPOCH_FLOOR: u64 = 1 << TIMESTAMP_SHIFT;

const TIMESTAMP_SHIFT: u32 = 22;
const WORKER_SHIFT: u32 = 17;
const PROCESS_SHIFT: u32 = 12;
const TIMESTAMP_MASK: u64 = (1 << 42) - 1;
const WORKER_MASK: u64 = 0x1F;
const PROCESS_MASK: u64 = 0x1F;
const SEQUENCE_MASK: u64 = 0xFFF;
const INTERNAL_MASK: u64 = (1 << TIMESTAMP_SHIFT) - 1;

/// `<@id>`, `<@!id>` (legacy nickname form) and `<@&id>`.
#[allow(clippy::expect_used)]
static GENERIC_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@([!&])?(\d+)>$").expect("valid mention pattern"));

/// `<#id>`.
#[allow(clippy::expect_used)]
static CHANNEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<#(\d+)>$").expect("valid channel pattern"));

/// The decoded subfields of a snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnowflakeParts {
    /// Absolute creation time in Unix milliseconds.
    pub timestamp_ms: u64,
    /// Internal worker id (5 bits).
    pub worker_id: u8,
    /// Internal process id (5 bits).
    pub process_id: u8,
    /// Per-process increment (12 bits).
    pub sequence: u16,
}

/// What kind of entity a mention string referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MentionKind {
    /// A bare numeric id; could be anything.
    Ambiguous,
    /// `<@id>` or `<@!id>`.
    User,
    /// `<@&id>`.
    Role,
    /// `<#id>`.
    Channel,
}

/// Error returned by [`Snowflake::from_str`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid snowflake: {input:?}")]
pub struct ParseSnowflakeError {
    /// The rejected input.
    pub input: String,
}

/// Split a raw value into its subfields.
#[allow(clippy::cast_possible_truncation)]
pub const fn decode(raw: u64) -> SnowflakeParts {
    SnowflakeParts {
        // (raw >> 22) < 2^42, so adding the epoch cannot overflow.
        timestamp_ms: (raw >> TIMESTAMP_SHIFT).saturating_add(DISCORD_EPOCH_MS),
        worker_id: ((raw >> WORKER_SHIFT) & WORKER_MASK) as u8,
        process_id: ((raw >> PROCESS_SHIFT) & PROCESS_MASK) as u8,
        sequence: (raw & SEQUENCE_MASK) as u16,
    }
}

/// Pack subfields into a raw value. Out-of-range subfields are masked, and
/// timestamps before the epoch clamp to zero.
pub const fn encode(timestamp_ms: u64, worker_id: u8, process_id: u8, sequence: u16) -> u64 {
    let offset = timestamp_ms.saturating_sub(DISCORD_EPOCH_MS) & TIMESTAMP_MASK;
    (offset << TIMESTAMP_SHIFT)
        | ((worker_id as u64 & WORKER_MASK) << WORKER_SHIFT)
        | ((process_id as u64 & PROCESS_MASK) << PROCESS_SHIFT)
        | (sequence as u64 & SEQUENCE_MASK)
}

/// A 64-bit time-ordered identifier. Equality and ordering use the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Wrap a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Build a snowflake from decoded parts.
    pub const fn from_parts(parts: SnowflakeParts) -> Self {
        Self(encode(
            parts.timestamp_ms,
            parts.worker_id,
            parts.process_id,
            parts.sequence,
        ))
    }

    /// Build a snowflake for a point in time.
    ///
    /// With `max_internal_bits` the low 22 bits are all set, producing the
    /// largest id that could have been created in that millisecond; without
    /// it they are zero. The pair brackets every id from that millisecond,
    /// which is how "messages before/after time T" queries are expressed.
    pub fn from_timestamp(time: DateTime<Utc>, max_internal_bits: bool) -> Self {
        let ms = u64::try_from(time.timestamp_millis()).unwrap_or(0);
        let base = encode(ms, 0, 0, 0);
        if max_internal_bits {
            Self(base | INTERNAL_MASK)
        } else {
            Self(base)
        }
    }

    /// Decode into subfields.
    pub const fn parts(self) -> SnowflakeParts {
        decode(self.0)
    }

    /// Whether the value is at or above [`EPOCH_FLOOR`].
    pub const fn is_valid(self) -> bool {
        self.0 >= EPOCH_FLOOR
    }

    /// Creation time embedded in the id.
    pub fn created_at(self) -> DateTime<Utc> {
        let ms = i64::try_from(self.parts().timestamp_ms).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Parse a decimal string. Never fails loudly: malformed input is `None`.
    pub fn try_parse(input: &str) -> Option<Self> {
        input.parse::<u64>().ok().map(Self)
    }

    /// Extract an id from a bare number or a user, role or channel mention.
    ///
    /// Patterns are tried in a fixed order: bare number first (reported as
    /// [`MentionKind::Ambiguous`]), then the `<@..>` family, then `<#..>`.
    pub fn try_extract_from_mention(input: &str) -> Option<(Self, MentionKind)> {
        if let Some(id) = Self::try_parse(input) {
            return Some((id, MentionKind::Ambiguous));
        }

        if let Some(caps) = GENERIC_MENTION.captures(input) {
            let id = caps.get(2).and_then(|m| Self::try_parse(m.as_str()))?;
            let kind = match caps.get(1).map(|m| m.as_str()) {
                Some("&") => MentionKind::Role,
                _ => MentionKind::User,
            };
            return Some((id, kind));
        }

        let caps = CHANNEL_MENTION.captures(input)?;
        let id = caps.get(1).and_then(|m| Self::try_parse(m.as_str()))?;
        Some((id, MentionKind::Channel))
    }

    /// Format as a user mention (`<@id>`).
    pub fn user_mention(self) -> String {
        format!("<@{}>", self.0)
    }

    /// Format as a role mention (`<@&id>`).
    pub fn role_mention(self) -> String {
        format!("<@&{}>", self.0)
    }

    /// Format as a channel mention (`<#id>`).
    pub fn channel_mention(self) -> String {
        format!("<#{}>", self.0)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = ParseSnowflakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| ParseSnowflakeError {
            input: s.to_owned(),
        })
    }
}

impl From<u64> for Snowflake {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Snowflake> for u64 {
    fn from(id: Snowflake) -> Self {
        id.0
    }
}

// The wire format carries ids as decimal strings so that JavaScript clients
// do not lose precision; integers are still accepted on input.
impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

struct SnowflakeVisitor;

impl Visitor<'_> for SnowflakeVisitor {
    type Value = Snowflake;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snowflake as a decimal string or unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Snowflake(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(Snowflake)
            .map_err(|_err| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Snowflake::try_parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}
