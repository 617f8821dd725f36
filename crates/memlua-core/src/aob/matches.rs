//! Match snapshots

use std::fmt;

use memlua_sdk::{BridgeError, BridgeResult, LuaStack, ValueKind};

/// Machine address
pub type Address = u64;

/// Parse an address printed as hex, with or without a `0x` prefix
pub fn parse_address(text: &str) -> Option<Address> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    Address::from_str_radix(digits, 16).ok()
}

/// Address held in a slot: an integer or a hex string
pub(crate) fn address_at(stack: &mut dyn LuaStack, index: i32) -> Option<Address> {
    match stack.value_kind(index) {
        ValueKind::Number => Some(stack.to_integer(index) as Address),
        ValueKind::String => parse_address(&stack.to_string_lossy(index)),
        _ => None,
    }
}

/// One matching address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AobMatch {
    address: Address,
}

impl AobMatch {
    /// Match at `address`
    pub const fn new(address: Address) -> Self {
        Self { address }
    }

    /// Matching address
    pub const fn address(&self) -> Address {
        self.address
    }
}

impl fmt::Display for AobMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.address)
    }
}

impl fmt::UpperHex for AobMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.address, f)
    }
}

impl fmt::LowerHex for AobMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.address, f)
    }
}

/// Immutable set of addresses found by one scan, in the order reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    matches: Vec<AobMatch>,
}

impl MatchSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set of the given addresses
    pub fn from_addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            matches: addresses.into_iter().map(AobMatch::new).collect(),
        }
    }

    /// Number of matches
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// True when nothing matched
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Matches in order
    pub fn iter(&self) -> std::slice::Iter<'_, AobMatch> {
        self.matches.iter()
    }

    /// First match
    pub fn first(&self) -> Option<AobMatch> {
        self.matches.first().copied()
    }

    /// Addresses in order
    pub fn addresses(&self) -> Vec<Address> {
        self.matches.iter().map(AobMatch::address).collect()
    }

    /// True if `address` is in the set
    pub fn contains(&self, address: Address) -> bool {
        self.matches.iter().any(|m| m.address == address)
    }

    /// The single match; `AmbiguousResult` on zero or several
    pub fn unique(&self) -> BridgeResult<AobMatch> {
        match self.matches.as_slice() {
            [only] => Ok(*only),
            [] => Err(BridgeError::AmbiguousResult("no matches".to_string())),
            _ => Err(BridgeError::AmbiguousResult(
                "multiple matches, expected exactly one".to_string(),
            )),
        }
    }

    /// Upper-case hex form of every address
    pub fn to_hex_strings(&self) -> Vec<String> {
        self.matches.iter().map(|m| m.to_string()).collect()
    }
}

impl IntoIterator for MatchSet {
    type Item = AobMatch;
    type IntoIter = std::vec::IntoIter<AobMatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.into_iter()
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a AobMatch;
    type IntoIter = std::slice::Iter<'a, AobMatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.iter()
    }
}

impl FromIterator<Address> for MatchSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        Self::from_addresses(iter)
    }
}
