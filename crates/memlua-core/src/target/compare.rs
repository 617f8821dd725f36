//! Value matching for the simulated memory scanner

use memlua_sdk::{BridgeError, BridgeResult};

use crate::aob::AobPattern;
use crate::scan::{Rounding, ScanType, ValueType};

/// Numeric reading of a memory cell or a user value
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Int(i128),
    Float(f64),
}

impl Scalar {
    fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }
}

/// Inputs of one scan pass
#[derive(Debug, Clone)]
pub(crate) struct ScanRequest {
    pub scan_type: ScanType,
    pub value_type: ValueType,
    pub rounding: Rounding,
    pub value: String,
    pub value2: String,
    pub is_hex: bool,
    pub is_utf16: bool,
    pub case_sensitive: bool,
    pub percentage: bool,
}

/// What a cell is compared against
#[derive(Debug, Clone)]
enum Needle {
    Any,
    Scalar { first: Scalar, second: Scalar, decimals: usize },
    Text { encoded: Vec<u8>, case_sensitive: bool },
    Pattern(AobPattern),
    None,
}

/// Compiled comparison for one pass
#[derive(Debug, Clone)]
pub(crate) struct Matcher {
    scan_type: ScanType,
    value_type: ValueType,
    rounding: Rounding,
    percentage: bool,
    needle: Needle,
}

impl Matcher {
    /// Compile a request
    pub fn new(request: &ScanRequest) -> BridgeResult<Self> {
        let value_type = request.value_type;
        let needle = match value_type {
            ValueType::Binary | ValueType::All => {
                return Err(BridgeError::InvalidArgument(format!(
                    "{} scans are not supported by the simulated target",
                    value_type
                )))
            }
            ValueType::String | ValueType::UnicodeString | ValueType::ByteArray => {
                if !matches!(request.scan_type, ScanType::ExactValue | ScanType::Changed | ScanType::Unchanged) {
                    return Err(BridgeError::InvalidArgument(format!(
                        "{} scan is not supported for {} values",
                        request.scan_type, value_type
                    )));
                }
                if request.scan_type == ScanType::ExactValue {
                    text_needle(request)?
                } else {
                    Needle::None
                }
            }
            _ if request.scan_type.needs_value() => {
                let first = parse_scalar(&request.value, value_type, request.is_hex)?;
                let second = if request.scan_type == ScanType::ValueBetween {
                    parse_scalar(&request.value2, value_type, request.is_hex)?
                } else {
                    first
                };
                Needle::Scalar {
                    first,
                    second,
                    decimals: decimals(&request.value),
                }
            }
            _ if request.scan_type == ScanType::Unknown => Needle::Any,
            _ => Needle::None,
        };

        Ok(Self {
            scan_type: request.scan_type,
            value_type,
            rounding: request.rounding,
            percentage: request.percentage,
            needle,
        })
    }

    /// Bytes a candidate cell spans; `None` for patterns wider than a cell
    pub fn width(&self) -> usize {
        match (&self.needle, self.value_type.size()) {
            (Needle::Text { encoded, .. }, _) => encoded.len(),
            (Needle::Pattern(pattern), _) => pattern.len(),
            (_, Some(size)) => size,
            _ => 1,
        }
    }

    /// First pass: does the cell at the start of `data` match
    pub fn first(&self, data: &[u8]) -> bool {
        match &self.needle {
            Needle::Any => data.len() >= self.width(),
            Needle::Pattern(pattern) => pattern.matches(data),
            Needle::Text {
                encoded,
                case_sensitive,
            } => text_matches(data, encoded, *case_sensitive),
            Needle::Scalar { .. } => decode(self.value_type, data)
                .map_or(false, |current| self.against_input(current)),
            Needle::None => false,
        }
    }

    /// Later pass: compare `current` bytes with the `previous` snapshot
    pub fn next(&self, current: &[u8], previous: &[u8]) -> bool {
        match self.scan_type {
            ScanType::Changed => !self.same(current, previous),
            ScanType::Unchanged => self.same(current, previous),
            ScanType::Unknown => true,
            _ => {
                if matches!(self.needle, Needle::Text { .. } | Needle::Pattern(_)) {
                    return self.first(current);
                }
                let (Some(cur), Some(prev)) =
                    (decode(self.value_type, current), decode(self.value_type, previous))
                else {
                    return false;
                };
                match self.scan_type {
                    ScanType::IncreasedValue => cur.as_f64() > prev.as_f64(),
                    ScanType::DecreasedValue => cur.as_f64() < prev.as_f64(),
                    ScanType::IncreasedValueBy => self.moved_by(cur, prev, 1.0),
                    ScanType::DecreasedValueBy => self.moved_by(cur, prev, -1.0),
                    _ => self.against_input(cur),
                }
            }
        }
    }

    fn same(&self, current: &[u8], previous: &[u8]) -> bool {
        match (decode(self.value_type, current), decode(self.value_type, previous)) {
            (Some(Scalar::Float(a)), Some(Scalar::Float(b))) => a == b || (a.is_nan() && b.is_nan()),
            _ => current == previous,
        }
    }

    fn against_input(&self, current: Scalar) -> bool {
        let Needle::Scalar {
            first,
            second,
            decimals,
        } = self.needle
        else {
            return false;
        };
        match self.scan_type {
            ScanType::ExactValue => self.equals(current, first, decimals),
            ScanType::ValueBetween => {
                let (low, high) = if first.as_f64() <= second.as_f64() {
                    (first, second)
                } else {
                    (second, first)
                };
                match (current, low, high) {
                    (Scalar::Int(c), Scalar::Int(l), Scalar::Int(h)) => l <= c && c <= h,
                    _ => low.as_f64() <= current.as_f64() && current.as_f64() <= high.as_f64(),
                }
            }
            ScanType::BiggerThan => greater(current, first),
            ScanType::SmallerThan => greater(first, current),
            _ => false,
        }
    }

    fn moved_by(&self, current: Scalar, previous: Scalar, sign: f64) -> bool {
        let Needle::Scalar {
            first, decimals, ..
        } = self.needle
        else {
            return false;
        };
        if self.percentage {
            let threshold = previous.as_f64() * (1.0 + sign * first.as_f64() / 100.0);
            return if sign > 0.0 {
                current.as_f64() >= threshold
            } else {
                current.as_f64() <= threshold
            };
        }
        let expected = match (previous, first) {
            (Scalar::Int(p), Scalar::Int(d)) if sign > 0.0 => Scalar::Int(p + d),
            (Scalar::Int(p), Scalar::Int(d)) => Scalar::Int(p - d),
            (p, d) => Scalar::Float(p.as_f64() + sign * d.as_f64()),
        };
        self.equals(current, expected, decimals)
    }

    fn equals(&self, current: Scalar, wanted: Scalar, decimals: usize) -> bool {
        match (current, wanted) {
            (Scalar::Int(c), Scalar::Int(w)) => {
                let mask = width_mask(self.value_type);
                c == w || (c as u128 & mask) == (w as u128 & mask)
            }
            (Scalar::Float(c), w) => float_equals(c, w.as_f64(), self.rounding, decimals),
            (Scalar::Int(c), Scalar::Float(w)) => c as f64 == w,
        }
    }
}

fn greater(a: Scalar, b: Scalar) -> bool {
    match (a, b) {
        (Scalar::Int(a), Scalar::Int(b)) => a > b,
        _ => a.as_f64() > b.as_f64(),
    }
}

fn width_mask(value_type: ValueType) -> u128 {
    match value_type.size() {
        Some(size) if size < 16 => (1u128 << (size * 8)) - 1,
        _ => u128::MAX,
    }
}

fn float_equals(current: f64, wanted: f64, rounding: Rounding, decimals: usize) -> bool {
    let scale = 10f64.powi(decimals as i32);
    match rounding {
        Rounding::Rounded => ((current * scale).round() - wanted * scale).abs() < 1e-6,
        Rounding::ExtremeRounded => current > wanted - 1.0 && current < wanted + 1.0,
        Rounding::Truncated => ((current * scale).trunc() - wanted * scale).abs() < 1e-6,
    }
}

fn text_needle(request: &ScanRequest) -> BridgeResult<Needle> {
    if request.value.is_empty() {
        return Err(BridgeError::InvalidArgument(
            "search value is empty".to_string(),
        ));
    }
    Ok(match request.value_type {
        ValueType::ByteArray => Needle::Pattern(AobPattern::parse(&request.value)?),
        ValueType::UnicodeString => Needle::Text {
            encoded: encode_text(&request.value, true),
            case_sensitive: request.case_sensitive,
        },
        _ => Needle::Text {
            encoded: encode_text(&request.value, request.is_utf16),
            case_sensitive: request.case_sensitive,
        },
    })
}

/// UTF-8 or UTF-16LE bytes of `text`
pub(crate) fn encode_text(text: &str, wide: bool) -> Vec<u8> {
    if wide {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    } else {
        text.as_bytes().to_vec()
    }
}

fn text_matches(data: &[u8], needle: &[u8], case_sensitive: bool) -> bool {
    data.len() >= needle.len()
        && if case_sensitive {
            &data[..needle.len()] == needle
        } else {
            data[..needle.len()].eq_ignore_ascii_case(needle)
        }
}

fn decimals(text: &str) -> usize {
    text.split_once('.')
        .map_or(0, |(_, frac)| frac.chars().take_while(char::is_ascii_digit).count())
}

fn parse_scalar(text: &str, value_type: ValueType, is_hex: bool) -> BridgeResult<Scalar> {
    let text = text.trim();
    let invalid = || {
        BridgeError::InvalidArgument(format!("{:?} is not a valid {} value", text, value_type))
    };
    if matches!(value_type, ValueType::Single | ValueType::Double) {
        return text.parse::<f64>().map(Scalar::Float).map_err(|_| invalid());
    }

    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let prefixed = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X"));
    let magnitude = match (prefixed, is_hex) {
        (Some(digits), _) => i128::from_str_radix(digits, 16),
        (None, true) => i128::from_str_radix(body, 16),
        (None, false) => body.parse::<i128>(),
    }
    .map_err(|_| invalid())?;
    Ok(Scalar::Int(if negative { -magnitude } else { magnitude }))
}

fn decode(value_type: ValueType, data: &[u8]) -> Option<Scalar> {
    fn array<const N: usize>(data: &[u8]) -> Option<[u8; N]> {
        data.get(..N)?.try_into().ok()
    }
    Some(match value_type {
        ValueType::Byte => Scalar::Int(*data.first()? as i128),
        ValueType::Word => Scalar::Int(i16::from_le_bytes(array(data)?) as i128),
        ValueType::Dword => Scalar::Int(i32::from_le_bytes(array(data)?) as i128),
        ValueType::Qword => Scalar::Int(i64::from_le_bytes(array(data)?) as i128),
        ValueType::Pointer => Scalar::Int(u64::from_le_bytes(array(data)?) as i128),
        ValueType::Single => Scalar::Float(f32::from_le_bytes(array(data)?) as f64),
        ValueType::Double => Scalar::Float(f64::from_le_bytes(array(data)?)),
        _ => return None,
    })
}

/// Display form of the cell at the start of `data`
pub(crate) fn render(value_type: ValueType, utf16: bool, data: &[u8]) -> String {
    match decode(value_type, data) {
        Some(Scalar::Int(i)) => i.to_string(),
        Some(Scalar::Float(f)) => f.to_string(),
        None => match value_type {
            ValueType::UnicodeString => decode_utf16(data),
            ValueType::String if utf16 => decode_utf16(data),
            ValueType::String => String::from_utf8_lossy(data).into_owned(),
            _ => data
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" "),
        },
    }
}

fn decode_utf16(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
