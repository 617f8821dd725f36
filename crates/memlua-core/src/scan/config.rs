//! Scan configuration and the engine's scan enumerations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use memlua_sdk::{BridgeError, BridgeResult};

/// Protection filter applied when none is configured
pub const DEFAULT_PROTECTION: &str = "+W*X-C";

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident = $code:literal => $($alias:literal)|+ ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $code, )*
        }

        impl $name {
            /// Wire value passed to the engine
            pub const fn code(self) -> i32 {
                self as i32
            }

            /// Variant for a wire value
            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    $( $code => Some($name::$variant), )*
                    _ => None,
                }
            }
        }

        impl FromStr for $name {
            type Err = BridgeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.trim().to_ascii_lowercase();
                match lowered.as_str() {
                    $( $($alias)|+ => Ok($name::$variant), )*
                    _ => Err(BridgeError::InvalidArgument(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self)
            }
        }
    };
}

wire_enum! {
    /// Comparison performed by a scan
    ScanType {
        /// Unknown initial value (matches everything)
        Unknown = 0 => "unknown",
        /// Equal to `value`
        ExactValue = 1 => "exact" | "exactvalue" | "exact-value",
        /// Between `value` and `value2`, inclusive
        ValueBetween = 2 => "between" | "valuebetween" | "value-between",
        /// Greater than `value`
        BiggerThan = 3 => "bigger" | "biggerthan" | "bigger-than",
        /// Smaller than `value`
        SmallerThan = 4 => "smaller" | "smallerthan" | "smaller-than",
        /// Greater than the previous value
        IncreasedValue = 5 => "increased" | "increasedvalue" | "increased-value",
        /// Previous value plus `value`
        IncreasedValueBy = 6 => "increased-by" | "increasedvalueby" | "increased-value-by",
        /// Smaller than the previous value
        DecreasedValue = 7 => "decreased" | "decreasedvalue" | "decreased-value",
        /// Previous value minus `value`
        DecreasedValueBy = 8 => "decreased-by" | "decreasedvalueby" | "decreased-value-by",
        /// Different from the previous value
        Changed = 9 => "changed",
        /// Same as the previous value
        Unchanged = 10 => "unchanged",
    }
}

impl ScanType {
    /// Needs the values of a previous scan
    pub const fn needs_previous(self) -> bool {
        matches!(
            self,
            ScanType::IncreasedValue
                | ScanType::IncreasedValueBy
                | ScanType::DecreasedValue
                | ScanType::DecreasedValueBy
                | ScanType::Changed
                | ScanType::Unchanged
        )
    }

    /// Needs `value`
    pub const fn needs_value(self) -> bool {
        matches!(
            self,
            ScanType::ExactValue
                | ScanType::ValueBetween
                | ScanType::BiggerThan
                | ScanType::SmallerThan
                | ScanType::IncreasedValueBy
                | ScanType::DecreasedValueBy
        )
    }
}

wire_enum! {
    /// Type of the scanned value
    ValueType {
        /// 1 byte
        Byte = 0 => "byte" | "u8",
        /// 2 bytes
        Word = 1 => "word" | "2bytes" | "i16",
        /// 4 bytes
        Dword = 2 => "dword" | "4bytes" | "i32",
        /// 8 bytes
        Qword = 3 => "qword" | "8bytes" | "i64",
        /// 32-bit float
        Single = 4 => "single" | "float" | "f32",
        /// 64-bit float
        Double = 5 => "double" | "f64",
        /// Text
        String = 6 => "string" | "text",
        /// UTF-16 text
        UnicodeString = 7 => "unicode" | "unicodestring" | "unicode-string",
        /// Byte pattern
        ByteArray = 8 => "bytes" | "bytearray" | "byte-array" | "aob",
        /// Bit pattern
        Binary = 9 => "binary",
        /// Every numeric type at once
        All = 10 => "all",
        /// Pointer-sized unsigned integer
        Pointer = 12 => "pointer" | "ptr",
    }
}

impl ValueType {
    /// Size in bytes of fixed-width types
    pub const fn size(self) -> Option<usize> {
        match self {
            ValueType::Byte => Some(1),
            ValueType::Word => Some(2),
            ValueType::Dword | ValueType::Single => Some(4),
            ValueType::Qword | ValueType::Double | ValueType::Pointer => Some(8),
            _ => None,
        }
    }
}

wire_enum! {
    /// Float comparison mode
    Rounding {
        /// Round to the precision of the input
        Rounded = 0 => "rounded",
        /// Anything within one unit of the input
        ExtremeRounded = 1 => "extreme" | "extremerounded" | "extreme-rounded",
        /// Truncate to the precision of the input
        Truncated = 2 => "truncated",
    }
}

wire_enum! {
    /// Address alignment filter
    AlignmentType {
        /// Every address
        NotAligned = 0 => "none" | "notaligned" | "not-aligned",
        /// Addresses divisible by the (hex) parameter
        Aligned = 1 => "aligned",
        /// Addresses whose hex form ends with the parameter
        LastDigits = 2 => "lastdigits" | "last-digits",
    }
}

impl Default for AlignmentType {
    fn default() -> Self {
        AlignmentType::NotAligned
    }
}

impl Serialize for AlignmentType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            AlignmentType::NotAligned => "none",
            AlignmentType::Aligned => "aligned",
            AlignmentType::LastDigits => "last-digits",
        })
    }
}

impl<'de> Deserialize<'de> for AlignmentType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Check a protection filter such as `+W-C` or `*X`.
///
/// Each flag is a `+`, `-` or `*` prefix followed by `W`, `X` or `C`.
/// An empty string is valid and leaves regions unfiltered.
pub fn validate_protection(flags: &str) -> BridgeResult<()> {
    let invalid = || BridgeError::InvalidArgument(format!("invalid protection flags: {:?}", flags));
    let mut chars = flags.chars();
    while let Some(prefix) = chars.next() {
        if !matches!(prefix, '+' | '-' | '*') {
            return Err(invalid());
        }
        match chars.next() {
            Some(c) if matches!(c.to_ascii_uppercase(), 'W' | 'X' | 'C') => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

/// Parameters of a first or next scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfiguration {
    /// Value compared against (text form, parsed by the engine)
    pub value: String,
    /// Upper bound for `ValueBetween`
    pub value2: String,
    /// Comparison
    pub scan_type: ScanType,
    /// Type of the scanned value
    pub value_type: ValueType,
    /// Float comparison mode
    pub rounding: Rounding,
    /// First address scanned
    pub start_address: u64,
    /// Last address scanned
    pub end_address: u64,
    /// Region protection filter
    pub protection_flags: String,
    /// Alignment filter
    pub alignment_type: AlignmentType,
    /// Alignment parameter (hex divisor or digit suffix)
    pub alignment_param: String,
    /// `value` is hexadecimal
    pub is_hex: bool,
    /// Strings are UTF-16
    pub is_utf16: bool,
    /// String comparison is case sensitive
    pub is_case_sensitive: bool,
    /// "By" comparisons are percentages
    pub is_percentage: bool,
}

impl Default for ScanConfiguration {
    fn default() -> Self {
        Self {
            value: String::new(),
            value2: String::new(),
            scan_type: ScanType::ExactValue,
            value_type: ValueType::Dword,
            rounding: Rounding::Rounded,
            start_address: 0,
            end_address: u64::MAX,
            protection_flags: DEFAULT_PROTECTION.to_string(),
            alignment_type: AlignmentType::NotAligned,
            alignment_param: String::new(),
            is_hex: false,
            is_utf16: false,
            is_case_sensitive: false,
            is_percentage: false,
        }
    }
}

impl ScanConfiguration {
    /// Start building a configuration from the defaults
    pub fn builder() -> ScanConfigurationBuilder {
        ScanConfigurationBuilder::default()
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> BridgeResult<()> {
        if self.start_address > self.end_address {
            return Err(BridgeError::InvalidArgument(format!(
                "start address {:#x} is above end address {:#x}",
                self.start_address, self.end_address
            )));
        }
        if self.scan_type.needs_value() && self.value.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} scan requires a value",
                self.scan_type
            )));
        }
        if self.scan_type == ScanType::ValueBetween && self.value2.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "ValueBetween scan requires a second value".to_string(),
            ));
        }
        validate_protection(&self.protection_flags)?;
        match self.alignment_type {
            AlignmentType::NotAligned => {}
            AlignmentType::Aligned => {
                match u64::from_str_radix(self.alignment_param.trim(), 16) {
                    Ok(d) if d > 0 => {}
                    _ => {
                        return Err(BridgeError::InvalidArgument(format!(
                            "alignment divisor must be a non-zero hex number: {:?}",
                            self.alignment_param
                        )))
                    }
                }
            }
            AlignmentType::LastDigits => {
                let digits = self.alignment_param.trim();
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(BridgeError::InvalidArgument(format!(
                        "last digits must be hex digits: {:?}",
                        self.alignment_param
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`ScanConfiguration`]
#[derive(Debug, Clone, Default)]
pub struct ScanConfigurationBuilder {
    config: ScanConfiguration,
}

impl ScanConfigurationBuilder {
    /// Value compared against
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.config.value = value.into();
        self
    }

    /// Second value for `ValueBetween`
    pub fn value2(mut self, value: impl Into<String>) -> Self {
        self.config.value2 = value.into();
        self
    }

    /// Comparison
    pub fn scan_type(mut self, scan_type: ScanType) -> Self {
        self.config.scan_type = scan_type;
        self
    }

    /// Value type
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.config.value_type = value_type;
        self
    }

    /// Float comparison mode
    pub fn rounding(mut self, rounding: Rounding) -> Self {
        self.config.rounding = rounding;
        self
    }

    /// Address range, inclusive
    pub fn range(mut self, start: u64, end: u64) -> Self {
        self.config.start_address = start;
        self.config.end_address = end;
        self
    }

    /// Region protection filter
    pub fn protection(mut self, flags: impl Into<String>) -> Self {
        self.config.protection_flags = flags.into();
        self
    }

    /// Alignment filter
    pub fn alignment(mut self, alignment_type: AlignmentType, param: impl Into<String>) -> Self {
        self.config.alignment_type = alignment_type;
        self.config.alignment_param = param.into();
        self
    }

    /// Hexadecimal input
    pub fn hex(mut self, yes: bool) -> Self {
        self.config.is_hex = yes;
        self
    }

    /// UTF-16 strings
    pub fn utf16(mut self, yes: bool) -> Self {
        self.config.is_utf16 = yes;
        self
    }

    /// Case-sensitive strings
    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.config.is_case_sensitive = yes;
        self
    }

    /// Percentage "by" comparisons
    pub fn percentage(mut self, yes: bool) -> Self {
        self.config.is_percentage = yes;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> BridgeResult<ScanConfiguration> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = ScanConfiguration::default();
        assert_eq!(config.start_address, 0);
        assert_eq!(config.end_address, u64::MAX);
        assert_eq!(config.scan_type, ScanType::ExactValue);
        assert_eq!(config.value_type, ValueType::Dword);
        assert_eq!(config.protection_flags, "+W*X-C");
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(ScanType::Unchanged.code(), 10);
        assert_eq!(ValueType::Pointer.code(), 12);
        assert_eq!(ValueType::from_code(11), None);
        assert_eq!(Rounding::Truncated.code(), 2);
        assert_eq!(AlignmentType::LastDigits.code(), 2);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Dword".parse::<ValueType>().unwrap(), ValueType::Dword);
        assert_eq!("increased-by".parse::<ScanType>().unwrap(), ScanType::IncreasedValueBy);
        assert!("quad".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_builder_validates_range() {
        let err = ScanConfiguration::builder()
            .value("1")
            .range(0x2000, 0x1000)
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));

        let config = ScanConfiguration::builder()
            .value("1")
            .range(0x1000, 0x1000)
            .build()
            .unwrap();
        assert_eq!(config.start_address, 0x1000);
    }

    #[test]
    fn test_value_requirements() {
        assert!(ScanConfiguration::builder().build().is_err());
        assert!(ScanConfiguration::builder()
            .scan_type(ScanType::Unknown)
            .build()
            .is_ok());
        assert!(ScanConfiguration::builder()
            .scan_type(ScanType::ValueBetween)
            .value("1")
            .build()
            .is_err());
    }

    #[test]
    fn test_protection_flags() {
        assert!(validate_protection("+W-C").is_ok());
        assert!(validate_protection("*X").is_ok());
        assert!(validate_protection("").is_ok());
        assert!(validate_protection("W").is_err());
        assert!(validate_protection("+Q").is_err());
        assert!(validate_protection("+W-").is_err());
    }

    #[test]
    fn test_alignment_parameter() {
        let aligned = ScanConfiguration::builder()
            .value("1")
            .alignment(AlignmentType::Aligned, "10");
        assert!(aligned.build().is_ok());
        let zero = ScanConfiguration::builder()
            .value("1")
            .alignment(AlignmentType::Aligned, "0");
        assert!(zero.build().is_err());
        let digits = ScanConfiguration::builder()
            .value("1")
            .alignment(AlignmentType::LastDigits, "0G");
        assert!(digits.build().is_err());
    }
}
