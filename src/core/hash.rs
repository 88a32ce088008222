use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("expected {expected} hex digits, found {found}")]
    HexLength { expected: usize, found: usize },

    #[error("invalid hex digit {0:?}")]
    HexDigit(char),

    #[error("bits set beyond the {0}-bit hash length")]
    Overflow(usize),

    #[error("expected {expected} bits, found {found}")]
    BitLength { expected: usize, found: usize },

    #[error("bit values must be 0, 1, true or false")]
    BitValue,

    #[error("hash must be a hex string or an array of bits")]
    Type,
}

/// Fixed-length perceptual hash, packed least-significant bit first.
///
/// The text form matches the `imagehash` hex encoding: the bit string read
/// most significant first, as `ceil(bits / 4)` hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitHash {
    bits: usize,
    words: Box<[u64]>,
}

fn hex_width(bits: usize) -> usize {
    bits.div_ceil(4)
}

impl BitHash {
    pub fn zero(bits: usize) -> Self {
        Self {
            bits,
            words: vec![0; bits.div_ceil(64)].into_boxed_slice(),
        }
    }

    pub fn from_hex(hex: &str, bits: usize) -> Result<Self, HashError> {
        let hex = hex.trim();
        let expected = hex_width(bits);
        let found = hex.chars().count();
        if found != expected {
            return Err(HashError::HexLength { expected, found });
        }

        let mut hash = Self::zero(bits);
        for (k, c) in hex.chars().rev().enumerate() {
            let nibble = c.to_digit(16).ok_or(HashError::HexDigit(c))? as u64;
            if nibble == 0 {
                continue;
            }
            let pos = 4 * k;
            let width = (u64::BITS - nibble.leading_zeros()) as usize;
            if pos + width > bits {
                return Err(HashError::Overflow(bits));
            }
            hash.words[pos / 64] |= nibble << (pos % 64);
        }
        Ok(hash)
    }

    /// Builds a hash from bits given most significant first (row-major order
    /// of the flattened hash matrix).
    pub fn from_bits<I>(bits: usize, values: I) -> Result<Self, HashError>
    where
        I: IntoIterator<Item = bool>,
    {
        let values: Vec<bool> = values.into_iter().collect();
        if values.len() != bits {
            return Err(HashError::BitLength {
                expected: bits,
                found: values.len(),
            });
        }
        let mut hash = Self::zero(bits);
        for (idx, set) in values.into_iter().enumerate() {
            if set {
                hash.set(bits - 1 - idx);
            }
        }
        Ok(hash)
    }

    /// Accepts either the hex string form or a JSON array of 0/1 or booleans.
    pub fn from_json(value: &Value, bits: usize) -> Result<Self, HashError> {
        match value {
            Value::String(hex) => Self::from_hex(hex, bits),
            Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| match item {
                        Value::Bool(b) => Ok(*b),
                        Value::Number(n) => match n.as_u64() {
                            Some(0) => Ok(false),
                            Some(1) => Ok(true),
                            _ => Err(HashError::BitValue),
                        },
                        _ => Err(HashError::BitValue),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Self::from_bits(bits, values)
            }
            _ => Err(HashError::Type),
        }
    }

    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn bit(&self, pos: usize) -> bool {
        (self.words[pos / 64] >> (pos % 64)) & 1 == 1
    }

    fn set(&mut self, pos: usize) {
        self.words[pos / 64] |= 1 << (pos % 64);
    }

    /// Flips one bit; used to derive nearby hashes.
    pub fn with_flipped(&self, pos: usize) -> Self {
        let mut out = self.clone();
        out.words[pos / 64] ^= 1 << (pos % 64);
        out
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn hamming(&self, other: &BitHash) -> u32 {
        debug_assert_eq!(self.bits, other.bits, "hash lengths differ");
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Bits `[start, start + len)` packed into fresh words, for bucketing.
    pub fn segment(&self, start: usize, len: usize) -> Vec<u64> {
        let mut out = vec![0u64; len.div_ceil(64)];
        for offset in 0..len {
            if self.bit(start + offset) {
                out[offset / 64] |= 1 << (offset % 64);
            }
        }
        out
    }

    pub fn to_hex(&self) -> String {
        let width = hex_width(self.bits);
        let mut out = String::with_capacity(width);
        for k in (0..width).rev() {
            let pos = 4 * k;
            let nibble = (self.words[pos / 64] >> (pos % 64)) & 0xF;
            out.push(char::from_digit(nibble as u32, 16).unwrap_or('0'));
        }
        out
    }
}

impl fmt::Display for BitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for BitHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BitHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        let bits = hex.trim().len() * 4;
        BitHash::from_hex(&hex, bits).map_err(serde::de::Error::custom)
    }
}

/// Distance between two hashes viewed as 0/1 vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// `sqrt(hamming)`, the L2 distance between bit vectors
    #[default]
    Euclidean,
    Hamming,
}

impl Metric {
    pub fn for_hamming(&self, hamming: u32) -> f64 {
        match self {
            Metric::Euclidean => (hamming as f64).sqrt(),
            Metric::Hamming => hamming as f64,
        }
    }

    pub fn distance(&self, a: &BitHash, b: &BitHash) -> f64 {
        self.for_hamming(a.hamming(b))
    }

    /// Largest Hamming distance whose metric distance is still `<= threshold`,
    /// capped at `bits`.
    pub fn hamming_bound(&self, threshold: f64, bits: usize) -> u32 {
        let cap = bits as u32;
        if threshold.is_nan() || threshold < 0.0 {
            return 0;
        }
        let estimate = match self {
            Metric::Euclidean => threshold * threshold,
            Metric::Hamming => threshold,
        };
        let mut bound = estimate.floor().min(cap as f64) as u32;
        while bound < cap && self.for_hamming(bound + 1) <= threshold {
            bound += 1;
        }
        while bound > 0 && self.for_hamming(bound) > threshold {
            bound -= 1;
        }
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_imagehash_hex() {
        let hash = BitHash::from_hex("ff00000000000001", 64).unwrap();
        assert_eq!(hash.count_ones(), 9);
        assert!(hash.bit(0));
        assert!(hash.bit(63));
        assert!(!hash.bit(8));
        assert_eq!(hash.to_hex(), "ff00000000000001");
    }

    #[test]
    fn test_wide_hash_spans_words() {
        let hex = format!("8{}1", "0".repeat(62));
        let hash = BitHash::from_hex(&hex, 256).unwrap();
        assert!(hash.bit(255));
        assert!(hash.bit(0));
        assert_eq!(hash.count_ones(), 2);
        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn test_rejects_wrong_length_and_digits() {
        assert_eq!(
            BitHash::from_hex("abc", 64),
            Err(HashError::HexLength {
                expected: 16,
                found: 3
            })
        );
        assert_eq!(
            BitHash::from_hex("zz00000000000000", 64),
            Err(HashError::HexDigit('z'))
        );
    }

    #[test]
    fn test_rejects_padding_bits() {
        // 6 bits take two hex digits; the top two bits must stay clear.
        assert!(BitHash::from_hex("3f", 6).is_ok());
        assert_eq!(BitHash::from_hex("7f", 6), Err(HashError::Overflow(6)));
    }

    #[test]
    fn test_bit_array_matches_hex() {
        let mut bits = vec![0u8; 16];
        bits[0] = 1;
        bits[15] = 1;
        let from_array = BitHash::from_json(&json!(bits), 16).unwrap();
        assert_eq!(from_array, BitHash::from_hex("8001", 16).unwrap());

        let from_bools = BitHash::from_json(&json!([true, false, false, false]), 4).unwrap();
        assert_eq!(from_bools.to_hex(), "8");
    }

    #[test]
    fn test_json_type_errors() {
        assert_eq!(BitHash::from_json(&json!(42), 64), Err(HashError::Type));
        assert_eq!(
            BitHash::from_json(&json!([0, 2, 1, 1]), 4),
            Err(HashError::BitValue)
        );
        assert_eq!(
            BitHash::from_json(&json!([0, 1]), 4),
            Err(HashError::BitLength {
                expected: 4,
                found: 2
            })
        );
    }

    #[test]
    fn test_distance_reflexive_and_symmetric() {
        let a = BitHash::from_hex("f0f0f0f0f0f0f0f0", 64).unwrap();
        let b = BitHash::from_hex("f0f0f0f0f0f0f0ff", 64).unwrap();
        for metric in [Metric::Euclidean, Metric::Hamming] {
            assert_eq!(metric.distance(&a, &a), 0.0);
            assert_eq!(metric.distance(&a, &b), metric.distance(&b, &a));
            assert!(metric.distance(&a, &b) > 0.0);
        }
        assert_eq!(Metric::Hamming.distance(&a, &b), 4.0);
        assert_eq!(Metric::Euclidean.distance(&a, &b), 2.0);
    }

    #[test]
    fn test_hamming_bound() {
        assert_eq!(Metric::Euclidean.hamming_bound(2.0, 64), 4);
        assert_eq!(Metric::Euclidean.hamming_bound(3.0, 64), 9);
        assert_eq!(Metric::Euclidean.hamming_bound(5f64.sqrt(), 64), 5);
        assert_eq!(Metric::Hamming.hamming_bound(2.5, 64), 2);
        assert_eq!(Metric::Hamming.hamming_bound(100.0, 64), 64);
        assert_eq!(Metric::Hamming.hamming_bound(0.0, 64), 0);
    }

    #[test]
    fn test_segment_extracts_bits() {
        let hash = BitHash::from_hex("00000000000000f0", 64).unwrap();
        assert_eq!(hash.segment(4, 4), vec![0xF]);
        assert_eq!(hash.segment(0, 4), vec![0]);
        assert_eq!(hash.segment(2, 8), vec![0b111100]);
    }

    #[test]
    fn test_serde_uses_hex() {
        let hash = BitHash::from_hex("0123456789abcdef", 64).unwrap();
        let encoded = serde_json::to_string(&hash).unwrap();
        assert_eq!(encoded, "\"0123456789abcdef\"");
        let decoded: BitHash = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, hash);
    }
}
