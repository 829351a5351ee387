//! Shared primitive types used across every module: the sticky fault set
//! and the 32-byte hash digest.

/// Sticky single-bit fault conditions (spec.md §3 `FaultFlags`).
///
/// Once a fault is set it stays set until [`FaultFlags::clear`] is called
/// explicitly. A result with any hard fault set — everything except
/// [`thermal_drift`][Self::thermal_drift] — is invalid for certification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FaultFlags {
    /// An accumulator saturated during arithmetic.
    pub overflow: bool,
    /// An unexpected negative value was produced where none was possible.
    pub underflow: bool,
    /// A division by zero was attempted.
    pub div_zero: bool,
    /// A timer read failed, or a monotonicity violation was observed.
    pub timer_error: bool,
    /// An output hash mismatch was observed (determinism broken).
    pub verify_fail: bool,
    /// CPU frequency dropped more than 5% during the run. Warning only.
    pub thermal_drift: bool,
}

impl FaultFlags {
    /// `true` if any fault other than [`thermal_drift`][Self::thermal_drift]
    /// is set — such a result must not be used as certification evidence.
    pub fn has_hard_fault(&self) -> bool {
        self.overflow
            || self.underflow
            || self.div_zero
            || self.timer_error
            || self.verify_fail
    }

    /// `true` if the warning-only `thermal_drift` bit is set.
    pub fn has_warning(&self) -> bool {
        self.thermal_drift
    }

    /// Resets every bit.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Unions `other`'s set bits into `self`, leaving already-set bits
    /// untouched (sticky-OR merge, as the runner does between its own
    /// faults and the stats engine's faults).
    pub fn merge(&mut self, other: &FaultFlags) {
        self.overflow |= other.overflow;
        self.underflow |= other.underflow;
        self.div_zero |= other.div_zero;
        self.timer_error |= other.timer_error;
        self.verify_fail |= other.verify_fail;
        self.thermal_drift |= other.thermal_drift;
    }
}

/// A 32-byte SHA-256 digest (spec.md §3 `Hash`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// 64 lowercase hex characters.
    pub fn to_hex(&self) -> arrayvec::ArrayString<64> {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = arrayvec::ArrayString::<64>::new();
        for byte in self.0 {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
        out
    }

    /// Parses 64 hex characters (mixed case accepted). Fails on any
    /// non-hex character or on a length other than 64.
    pub fn from_hex(s: &str) -> Option<Hash> {
        let bytes = s.as_bytes();
        if bytes.len() != 64 {
            return None;
        }
        fn nibble(c: u8) -> Option<u8> {
            match c {
                b'0'..=b'9' => Some(c - b'0'),
                b'a'..=b'f' => Some(c - b'a' + 10),
                b'A'..=b'F' => Some(c - b'A' + 10),
                _ => None,
            }
        }
        let mut out = [0u8; 32];
        for i in 0..32 {
            let hi = nibble(bytes[i * 2])?;
            let lo = nibble(bytes[i * 2 + 1])?;
            out[i] = (hi << 4) | lo;
        }
        Some(Hash(out))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid hex hash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_fault_excludes_thermal_drift() {
        let mut f = FaultFlags::default();
        f.thermal_drift = true;
        assert!(!f.has_hard_fault());
        assert!(f.has_warning());

        f.overflow = true;
        assert!(f.has_hard_fault());
    }

    #[test]
    fn clear_resets_all_bits() {
        let mut f = FaultFlags {
            overflow: true,
            underflow: true,
            div_zero: true,
            timer_error: true,
            verify_fail: true,
            thermal_drift: true,
        };
        f.clear();
        assert_eq!(f, FaultFlags::default());
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash([0xab; 32]);
        let hex = h.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.chars().next().unwrap(), 'a');
        let back = Hash::from_hex(&hex).unwrap();
        assert!(back == h);
    }

    #[test]
    fn from_hex_rejects_bad_length_and_chars() {
        assert!(Hash::from_hex("abcd").is_none());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn nist_empty_string_vector() {
        let hex = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let h = Hash::from_hex(hex).unwrap();
        assert_eq!(h.to_hex().as_str(), hex);
    }
}
