//! StackValue: snapshot of one engine stack slot
//!
//! The engine's stack is dynamically typed. A `StackValue` is what a slot
//! held at the moment it was read; identity is positional, so the same slot
//! may read differently after the engine runs again (e.g. a number coerced
//! to a string in place).
//!
//! # Type codes
//!
//! ```text
//! none(-1) nil(0) boolean(1) lightuserdata(2) number(3) string(4)
//! table(5) function(6) userdata(7) thread(8)
//! ```

use std::fmt;

/// Dynamic type of a stack slot, using the engine's numeric type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ValueKind {
    /// Index is outside the current frame
    None = -1,
    /// nil
    Nil = 0,
    /// boolean
    Boolean = 1,
    /// Raw pointer without engine-side storage
    LightUserdata = 2,
    /// integer or float
    Number = 3,
    /// byte string
    String = 4,
    /// table
    Table = 5,
    /// engine or host function
    Function = 6,
    /// full userdata (engine-managed object)
    Userdata = 7,
    /// coroutine
    Thread = 8,
}

impl ValueKind {
    /// Map an engine type code; unknown codes read as `None`
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => ValueKind::Nil,
            1 => ValueKind::Boolean,
            2 => ValueKind::LightUserdata,
            3 => ValueKind::Number,
            4 => ValueKind::String,
            5 => ValueKind::Table,
            6 => ValueKind::Function,
            7 => ValueKind::Userdata,
            8 => ValueKind::Thread,
            _ => ValueKind::None,
        }
    }

    /// Engine type code
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Type name as the engine spells it
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::None => "no value",
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::LightUserdata | ValueKind::Userdata => "userdata",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Thread => "thread",
        }
    }

    /// True for nil and for indices outside the frame
    pub const fn is_none_or_nil(self) -> bool {
        matches!(self, ValueKind::None | ValueKind::Nil)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owned snapshot of a stack slot.
///
/// Reference types (tables, functions, userdata) are represented by the
/// engine's pointer identity; they cannot be pushed back from a snapshot.
#[derive(Clone, PartialEq)]
pub enum StackValue {
    /// nil (also used for "no value")
    Nil,
    /// boolean
    Bool(bool),
    /// integer subtype of number
    Integer(i64),
    /// float subtype of number
    Number(f64),
    /// byte string (not necessarily UTF-8)
    Str(Vec<u8>),
    /// table identity
    Table(usize),
    /// function identity
    Function(usize),
    /// light or full userdata pointer
    Opaque(usize),
}

impl StackValue {
    /// Kind of the slot this value was read from
    pub const fn kind(&self) -> ValueKind {
        match self {
            StackValue::Nil => ValueKind::Nil,
            StackValue::Bool(_) => ValueKind::Boolean,
            StackValue::Integer(_) | StackValue::Number(_) => ValueKind::Number,
            StackValue::Str(_) => ValueKind::String,
            StackValue::Table(_) => ValueKind::Table,
            StackValue::Function(_) => ValueKind::Function,
            StackValue::Opaque(_) => ValueKind::Userdata,
        }
    }

    /// Check if value is nil
    pub const fn is_nil(&self) -> bool {
        matches!(self, StackValue::Nil)
    }

    /// Extract boolean value
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            StackValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract integer value (floats with an exact integer value convert)
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            StackValue::Integer(i) => Some(*i),
            StackValue::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    /// Extract float value (integers widen)
    pub fn as_number(&self) -> Option<f64> {
        match self {
            StackValue::Integer(i) => Some(*i as f64),
            StackValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract string bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StackValue::Str(b) => Some(b),
            _ => None,
        }
    }

    /// Extract string as UTF-8 if valid
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Get type name for debugging
    pub const fn type_name(&self) -> &'static str {
        self.kind().name()
    }
}

impl Default for StackValue {
    fn default() -> Self {
        StackValue::Nil
    }
}

impl fmt::Debug for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackValue::Nil => write!(f, "StackValue::Nil"),
            StackValue::Bool(b) => write!(f, "StackValue::Bool({})", b),
            StackValue::Integer(i) => write!(f, "StackValue::Integer({})", i),
            StackValue::Number(n) => write!(f, "StackValue::Number({})", n),
            StackValue::Str(s) => write!(f, "StackValue::Str({:?})", String::from_utf8_lossy(s)),
            StackValue::Table(p) => write!(f, "StackValue::Table({:#x})", p),
            StackValue::Function(p) => write!(f, "StackValue::Function({:#x})", p),
            StackValue::Opaque(p) => write!(f, "StackValue::Opaque({:#x})", p),
        }
    }
}

impl From<bool> for StackValue {
    fn from(b: bool) -> Self {
        StackValue::Bool(b)
    }
}

impl From<i64> for StackValue {
    fn from(i: i64) -> Self {
        StackValue::Integer(i)
    }
}

impl From<f64> for StackValue {
    fn from(n: f64) -> Self {
        StackValue::Number(n)
    }
}

impl From<&str> for StackValue {
    fn from(s: &str) -> Self {
        StackValue::Str(s.as_bytes().to_vec())
    }
}

impl From<String> for StackValue {
    fn from(s: String) -> Self {
        StackValue::Str(s.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_roundtrip() {
        for code in -1..=8 {
            assert_eq!(ValueKind::from_code(code).code(), code);
        }
        assert_eq!(ValueKind::from_code(42), ValueKind::None);
    }

    #[test]
    fn test_numeric_extractors() {
        assert_eq!(StackValue::Integer(7).as_number(), Some(7.0));
        assert_eq!(StackValue::Number(8.0).as_integer(), Some(8));
        assert_eq!(StackValue::Number(8.5).as_integer(), None);
        assert_eq!(StackValue::from("x").as_integer(), None);
    }

    #[test]
    fn test_type_discrimination() {
        assert!(StackValue::Nil.is_nil());
        assert_eq!(StackValue::Bool(true).kind(), ValueKind::Boolean);
        assert_eq!(StackValue::Integer(1).kind(), ValueKind::Number);
        assert_eq!(StackValue::Table(0x10).type_name(), "table");
        assert_eq!(StackValue::Opaque(0x10).type_name(), "userdata");
    }

    #[test]
    fn test_debug_format() {
        let s = format!("{:?}", StackValue::Str(b"abc".to_vec()));
        assert!(s.contains("abc"));
        let s = format!("{:?}", StackValue::Table(255));
        assert!(s.contains("0xff"));
    }
}
