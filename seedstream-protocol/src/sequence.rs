use crate::error::{ProtocolError, Result};

/// A SeedLink packet sequence number.
///
/// Sequence numbers are 24-bit unsigned values transmitted as 6 hex digits
/// in the frame header and in `DATA`/`FETCH` commands. The wire value wraps
/// modulo 2^24. [`SequenceNumber::UNSET`] stands in for the "no sequence
/// known" state (historically written as `-1`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// Sentinel: no sequence number known.
    pub const UNSET: Self = Self(u32::MAX);

    /// Largest representable wire value (6 hex digits).
    pub const MAX: u32 = 0xFF_FFFF;

    pub fn new(value: u32) -> Self {
        Self(value & Self::MAX)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Returns true unless this is the [`UNSET`](Self::UNSET) sentinel.
    pub fn is_set(self) -> bool {
        self != Self::UNSET
    }

    /// Parse the 6-hex-digit wire representation (e.g. `"00001A"`).
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidSequence(format!(
                "expected 6 hex digits, got {hex:?}"
            )));
        }
        let value = u32::from_str_radix(hex, 16)
            .map_err(|_| ProtocolError::InvalidSequence(format!("invalid hex: {hex:?}")))?;
        Ok(Self(value))
    }

    /// Serialize to the 6-uppercase-hex-digit wire representation.
    ///
    /// The sentinel has no wire form; callers check [`is_set`](Self::is_set)
    /// first.
    pub fn to_hex(self) -> String {
        debug_assert!(self.is_set());
        format!("{:06X}", self.0 & Self::MAX)
    }

    /// The next sequence number, wrapping modulo 2^24.
    pub fn successor(self) -> Self {
        Self((self.0 + 1) & Self::MAX)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::UNSET {
            write!(f, "UNSET")
        } else {
            write!(f, "{}", self.to_hex())
        }
    }
}
