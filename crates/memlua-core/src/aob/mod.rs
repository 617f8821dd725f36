//! Array-of-bytes pattern matching
//!
//! - [`AobPattern`]: the pattern grammar, also matchable locally
//! - [`AobScanner`]: scans through the remote `AOBScan*` entry points
//! - [`MatchSet`]: the resulting address snapshot

mod matches;
mod pattern;
mod scanner;

pub(crate) use matches::address_at;
pub use matches::{parse_address, Address, AobMatch, MatchSet};
pub use pattern::{AobPattern, PatternByte};
pub use scanner::{decode_matches, scan_call, Alignment, AobScanOptions, AobScanner};
