//! AOB pattern grammar
//!
//! A pattern is a whitespace-separated list of tokens, each either two hex
//! digits (case-insensitive) or the wildcard `??`. At least one token.

use std::fmt;
use std::str::FromStr;

use memlua_sdk::{BridgeError, BridgeResult};

/// One pattern position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternByte {
    /// Must equal this byte
    Byte(u8),
    /// Matches any byte
    Wildcard,
}

impl PatternByte {
    /// True if `b` satisfies this position
    pub fn matches(self, b: u8) -> bool {
        match self {
            PatternByte::Byte(expected) => expected == b,
            PatternByte::Wildcard => true,
        }
    }
}

/// Parsed byte pattern with wildcards
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AobPattern {
    bytes: Vec<PatternByte>,
}

impl AobPattern {
    /// Parse pattern text
    pub fn parse(text: &str) -> BridgeResult<Self> {
        let mut bytes = Vec::new();
        for token in text.split_whitespace() {
            bytes.push(parse_token(token)?);
        }
        if bytes.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "pattern is empty".to_string(),
            ));
        }
        Ok(Self { bytes })
    }

    /// Check pattern text without keeping the result
    pub fn validate(text: &str) -> BridgeResult<()> {
        Self::parse(text).map(|_| ())
    }

    /// Pattern positions
    pub fn bytes(&self) -> &[PatternByte] {
        &self.bytes
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a parsed pattern has at least one position
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of wildcard positions
    pub fn wildcards(&self) -> usize {
        self.bytes
            .iter()
            .filter(|b| matches!(b, PatternByte::Wildcard))
            .count()
    }

    /// True if `data` starts with a match
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(data)
                .all(|(p, b)| p.matches(*b))
    }

    /// Offsets of every match in `data`, overlapping matches included
    pub fn find_all(&self, data: &[u8]) -> Vec<usize> {
        if data.len() < self.bytes.len() {
            return Vec::new();
        }
        (0..=data.len() - self.bytes.len())
            .filter(|&offset| self.matches(&data[offset..]))
            .collect()
    }
}

fn parse_token(token: &str) -> BridgeResult<PatternByte> {
    if token == "??" {
        return Ok(PatternByte::Wildcard);
    }
    if token.len() == 2 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(b) = u8::from_str_radix(token, 16) {
            return Ok(PatternByte::Byte(b));
        }
    }
    Err(BridgeError::InvalidArgument(format!(
        "invalid pattern token {:?}: expected two hex digits or ??",
        token
    )))
}

impl FromStr for AobPattern {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match b {
                PatternByte::Byte(v) => write!(f, "{:02X}", v)?,
                PatternByte::Wildcard => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_wildcards() {
        assert!(AobPattern::validate("?? ?? AB").is_ok());
        assert!(AobPattern::validate("48 8b 05").is_ok());
        assert!(AobPattern::validate("  de\tad  ").is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed() {
        for bad in ["", "   ", "ZZ", "A", "ABC", "?", "???", "4 8"] {
            assert!(
                matches!(AobPattern::validate(bad), Err(BridgeError::InvalidArgument(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_canonical_form() {
        let p: AobPattern = "48 8b ?? 0a".parse().unwrap();
        assert_eq!(p.to_string(), "48 8B ?? 0A");
        assert_eq!(p.len(), 4);
        assert_eq!(p.wildcards(), 1);
    }

    #[test]
    fn test_matching() {
        let p = AobPattern::parse("AA ?? CC").unwrap();
        assert!(p.matches(&[0xAA, 0x00, 0xCC, 0xFF]));
        assert!(!p.matches(&[0xAA, 0x00]));
        assert_eq!(
            p.find_all(&[0xAA, 0x01, 0xCC, 0xAA, 0xCC, 0xCC]),
            vec![0, 3]
        );
        assert!(p.find_all(&[0xAA]).is_empty());
    }
}
