//! AOB scans through the remote `AOBScan*` entry points

use memlua_sdk::{BridgeError, BridgeResult, LuaStack, ValueKind};

use super::matches::{address_at, parse_address, Address, AobMatch, MatchSet};
use super::pattern::AobPattern;
use crate::bridge::BridgeHandle;
use crate::marshal::{self, ArgList, StackGuard};
use crate::scan::{validate_protection, AlignmentType};

/// Alignment filter of an AOB scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alignment {
    /// Addresses divisible by this value (sent as hex)
    Aligned(u64),
    /// Addresses whose hex form ends with these digits
    LastDigits(String),
}

impl Alignment {
    /// Wire alignment type
    pub fn alignment_type(&self) -> AlignmentType {
        match self {
            Alignment::Aligned(_) => AlignmentType::Aligned,
            Alignment::LastDigits(_) => AlignmentType::LastDigits,
        }
    }

    /// Wire alignment parameter
    pub fn param(&self) -> String {
        match self {
            Alignment::Aligned(divisor) => format!("{:X}", divisor),
            Alignment::LastDigits(digits) => digits.clone(),
        }
    }

    fn validate(&self) -> BridgeResult<()> {
        match self {
            Alignment::Aligned(0) => Err(BridgeError::InvalidArgument(
                "alignment divisor must be non-zero".to_string(),
            )),
            Alignment::LastDigits(d) if d.is_empty() || !d.chars().all(|c| c.is_ascii_hexdigit()) => {
                Err(BridgeError::InvalidArgument(format!(
                    "last digits must be hex digits: {:?}",
                    d
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Options of an AOB scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AobScanOptions {
    /// Region protection filter (`+X`, `-C`, ...)
    pub protection: Option<String>,
    /// Alignment filter
    pub alignment: Option<Alignment>,
    /// Restrict to one module (always a unique scan)
    pub module: Option<String>,
    /// Ask the engine for at most one address
    pub unique: bool,
}

impl AobScanOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Protection filter
    pub fn protection(mut self, flags: impl Into<String>) -> Self {
        self.protection = Some(flags.into());
        self
    }

    /// Alignment filter
    pub fn alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Module-scoped scan
    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.module = Some(name.into());
        self
    }

    /// Unique scan
    pub fn unique(mut self, yes: bool) -> Self {
        self.unique = yes;
        self
    }

    fn validate(&self) -> BridgeResult<()> {
        if let Some(flags) = &self.protection {
            validate_protection(flags)?;
        }
        if let Some(alignment) = &self.alignment {
            alignment.validate()?;
        }
        if matches!(&self.module, Some(m) if m.trim().is_empty()) {
            return Err(BridgeError::InvalidArgument(
                "module name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Remote entry point and ordered arguments of a scan
pub fn scan_call(pattern: &AobPattern, options: &AobScanOptions) -> (&'static str, ArgList) {
    let symbol = match (&options.module, options.unique) {
        (Some(_), _) => "AOBScanModuleUnique",
        (None, true) => "AOBScanUnique",
        (None, false) => "AOBScan",
    };

    let mut args = ArgList::new()
        .push_opt(options.module.as_deref())
        .push(pattern.to_string())
        .push_opt(options.protection.as_deref());
    if let Some(alignment) = &options.alignment {
        if options.protection.is_none() {
            args = args.placeholder();
        }
        args = args
            .push(alignment.alignment_type().code())
            .push(alignment.param());
    }
    (symbol, args)
}

/// Decode an AOB result.
///
/// Accepts nil, a number, a hex string, a table of addresses, or a string
/// list object exposing `Count` and indexed items (destroyed afterwards).
pub fn decode_matches(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<MatchSet> {
    match stack.value_kind(index) {
        ValueKind::None | ValueKind::Nil => Ok(MatchSet::new()),
        ValueKind::Number => Ok(MatchSet::from_addresses([stack.to_integer(index) as Address])),
        ValueKind::String => {
            let text = stack.to_string_lossy(index);
            parse_address(&text)
                .map(|a| MatchSet::from_addresses([a]))
                .ok_or_else(|| BridgeError::TypeMismatch {
                    expected: "hex address".to_string(),
                    got: text,
                })
        }
        ValueKind::Table | ValueKind::Userdata => {
            let index = memlua_sdk::abs_index(stack, index);
            let mut guard = StackGuard::new(stack);
            if guard.get_field(index, "Count") == ValueKind::Number {
                let count = guard.to_integer(-1).max(0);
                guard.pop(1);
                decode_string_list(&mut *guard, index, count)
            } else {
                guard.pop(1);
                decode_table(&mut *guard, index)
            }
        }
        other => Err(BridgeError::TypeMismatch {
            expected: "address list".to_string(),
            got: other.name().to_string(),
        }),
    }
}

fn decode_table(stack: &mut dyn LuaStack, table: i32) -> BridgeResult<MatchSet> {
    let mut entries: Vec<(i64, Address)> = Vec::new();
    stack.push_nil();
    while stack.next(table) {
        let key = stack.to_integer(-2);
        let value = address_at(stack, -1);
        stack.pop(1);
        match value {
            Some(address) => entries.push((key, address)),
            None => log::warn!("skipping non-address entry {} in AOB result", key),
        }
    }
    entries.sort_by_key(|(key, _)| *key);
    Ok(entries.into_iter().map(|(_, a)| a).collect())
}

fn decode_string_list(stack: &mut dyn LuaStack, list: i32, count: i64) -> BridgeResult<MatchSet> {
    let mut addresses = Vec::with_capacity(count.min(4096) as usize);
    for i in 0..count {
        stack.push_integer(i);
        if stack.get_table(list) == ValueKind::Nil {
            stack.pop(1);
            log::warn!("AOB result claims {} items but ends at {}", count, i);
            break;
        }
        let value = address_at(stack, -1);
        stack.pop(1);
        match value {
            Some(address) => addresses.push(address),
            None => log::warn!("skipping non-address item {} in AOB result", i),
        }
    }

    if stack.get_field(list, "destroy") == ValueKind::Function {
        stack.push_value(list);
        if !stack.pcall(1, 0).is_ok() {
            log::warn!("destroying AOB result list failed: {}", stack.to_string_lossy(-1));
            stack.pop(1);
        }
    } else {
        stack.pop(1);
    }
    Ok(MatchSet::from_addresses(addresses))
}

/// Runs AOB scans over a bridge
#[derive(Debug, Clone)]
pub struct AobScanner {
    bridge: BridgeHandle,
}

impl AobScanner {
    /// Scanner over `bridge`
    pub fn new(bridge: BridgeHandle) -> Self {
        Self { bridge }
    }

    /// Scan for `pattern`
    pub fn scan(&self, pattern: &AobPattern, options: &AobScanOptions) -> BridgeResult<MatchSet> {
        options.validate()?;
        let (symbol, args) = scan_call(pattern, options);
        let matches = self
            .bridge
            .with_stack(|s| marshal::call_global(s, symbol, &args, decode_matches))?;
        log::debug!("{} {} -> {} matches", symbol, pattern, matches.len());
        Ok(matches)
    }

    /// Parse `text` and scan for it
    pub fn scan_str(&self, text: &str, options: &AobScanOptions) -> BridgeResult<MatchSet> {
        let pattern = AobPattern::parse(text)?;
        self.scan(&pattern, options)
    }

    /// Unique scan; `AmbiguousResult` unless exactly one address is found
    pub fn find_unique(&self, pattern: &AobPattern, options: &AobScanOptions) -> BridgeResult<AobMatch> {
        let options = options.clone().unique(true);
        self.scan(pattern, &options)?.unique()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Arg;
    use memlua_engine::SimState;
    use memlua_sdk::HostFunction;
    use std::rc::Rc;

    fn pattern() -> AobPattern {
        AobPattern::parse("48 8B 05 ?? ?? ?? ??").unwrap()
    }

    #[test]
    fn test_plain_scan_arguments() {
        let (symbol, args) = scan_call(&pattern(), &AobScanOptions::new());
        assert_eq!(symbol, "AOBScan");
        assert_eq!(args.as_slice(), &[Arg::Str("48 8B 05 ?? ?? ?? ??".into())]);
    }

    #[test]
    fn test_alignment_without_protection_gets_placeholder() {
        let options = AobScanOptions::new().alignment(Alignment::Aligned(16));
        let (_, args) = scan_call(&pattern(), &options);
        assert_eq!(
            args.as_slice(),
            &[
                Arg::Str("48 8B 05 ?? ?? ?? ??".into()),
                Arg::Nil,
                Arg::Integer(1),
                Arg::Str("10".into()),
            ]
        );
    }

    #[test]
    fn test_protection_and_alignment() {
        let options = AobScanOptions::new()
            .protection("+X")
            .alignment(Alignment::LastDigits("00".into()))
            .unique(true);
        let (symbol, args) = scan_call(&pattern(), &options);
        assert_eq!(symbol, "AOBScanUnique");
        assert_eq!(
            args.as_slice(),
            &[
                Arg::Str("48 8B 05 ?? ?? ?? ??".into()),
                Arg::Str("+X".into()),
                Arg::Integer(2),
                Arg::Str("00".into()),
            ]
        );
    }

    #[test]
    fn test_module_name_comes_first() {
        let options = AobScanOptions::new().module("game.exe");
        let (symbol, args) = scan_call(&pattern(), &options);
        assert_eq!(symbol, "AOBScanModuleUnique");
        assert_eq!(args.as_slice()[0], Arg::Str("game.exe".into()));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_invalid_options_rejected() {
        assert!(AobScanOptions::new().protection("X").validate().is_err());
        assert!(AobScanOptions::new().module(" ").validate().is_err());
        assert!(AobScanOptions::new()
            .alignment(Alignment::Aligned(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_decode_scalar_results() {
        let mut s = SimState::new();
        s.push_nil();
        assert!(decode_matches(&mut s, -1).unwrap().is_empty());
        s.push_integer(0x400);
        assert_eq!(decode_matches(&mut s, -1).unwrap().addresses(), vec![0x400]);
        s.push_str("0x1F00");
        assert_eq!(decode_matches(&mut s, -1).unwrap().addresses(), vec![0x1f00]);
        s.push_str("not hex");
        assert!(matches!(
            decode_matches(&mut s, -1),
            Err(BridgeError::TypeMismatch { .. })
        ));
        assert_eq!(s.top(), 4);
    }

    #[test]
    fn test_decode_table_in_key_order() {
        let mut s = SimState::new();
        s.create_table(0, 0);
        for (k, v) in [(2, "200"), (1, "100"), (3, "300")] {
            s.push_integer(k);
            s.push_str(v);
            s.set_table(-3);
        }
        let set = decode_matches(&mut s, -1).unwrap();
        assert_eq!(set.addresses(), vec![0x100, 0x200, 0x300]);
        assert_eq!(s.top(), 1);
    }

    #[test]
    fn test_decode_string_list_destroys_it() {
        let mut s = SimState::new();
        let destroyed = Rc::new(std::cell::Cell::new(false));
        let flag = destroyed.clone();

        s.create_table(0, 0);
        s.push_integer(2);
        s.set_field(-2, "Count");
        s.push_integer(0);
        s.push_str("AA0");
        s.set_table(-3);
        s.push_integer(1);
        s.push_str("BB0");
        s.set_table(-3);
        s.push_host_function(Rc::new(HostFunction::new("destroy", move |_| {
            flag.set(true);
            Ok(0)
        })));
        s.set_field(-2, "destroy");

        let set = decode_matches(&mut s, 1).unwrap();
        assert_eq!(set.addresses(), vec![0xaa0, 0xbb0]);
        assert!(destroyed.get());
        assert_eq!(s.top(), 1);
    }

    #[test]
    fn test_string_list_with_bogus_count_stops_at_last_item() {
        let mut s = SimState::new();
        s.create_table(0, 0);
        s.push_integer(i64::MAX);
        s.set_field(-2, "Count");
        s.push_integer(0);
        s.push_str("AA0");
        s.set_table(-3);

        let set = decode_matches(&mut s, 1).unwrap();
        assert_eq!(set.addresses(), vec![0xaa0]);
        assert_eq!(s.top(), 1);
    }
}
