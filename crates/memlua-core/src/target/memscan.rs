//! Remote memscan objects of the simulated target
//!
//! `createMemScan()` returns a table whose fields are host functions called
//! with the table itself as argument 1. Progress is reported through the
//! optional `OnGuiUpdate(self, total, scanned, found)` field after every
//! region, and `OnScanDone(self)` fires once the pass has finished.

use std::cell::RefCell;
use std::rc::Rc;

use memlua_sdk::{BridgeError, BridgeResult, HostFunction, LuaStack, ValueKind};

use super::compare::{render, Matcher, ScanRequest};
use super::image::{sweep, ProtectionFilter, Stride};
use super::TargetState;
use crate::scan::{Rounding, ScanType, ValueType};

#[derive(Debug, Clone)]
struct Found {
    address: u64,
    previous: Vec<u8>,
}

#[derive(Debug, Default)]
struct ScanState {
    found: Vec<Found>,
    value_type: Option<(ValueType, bool)>,
    destroyed: bool,
}

impl ScanState {
    fn live(&self) -> BridgeResult<()> {
        if self.destroyed {
            return Err(BridgeError::from("memscan destroyed"));
        }
        Ok(())
    }
}

fn opt_string(stack: &mut dyn LuaStack, index: i32) -> String {
    if stack.is_nil(index) {
        String::new()
    } else {
        stack.to_string_lossy(index)
    }
}

fn wire<T>(code: i64, decode: fn(i32) -> Option<T>, what: &str) -> BridgeResult<T> {
    decode(code as i32)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown {} code {}", what, code)))
}

const METHODS: [&str; 6] = [
    "firstScan",
    "nextScan",
    "waitTillDone",
    "getAttachedFoundlist",
    "newScan",
    "destroy",
];

/// Host functions of one memscan object, kept alive while it is live.
///
/// An engine may only hold raw pointers to them, and `destroy` runs inside
/// one of them, so a destroyed scan is released by the next `createMemScan`.
pub(crate) struct Retained {
    state: Rc<RefCell<ScanState>>,
    functions: Vec<Rc<HostFunction>>,
}

impl Retained {
    #[cfg(test)]
    pub(crate) fn function_count(&self) -> usize {
        self.functions.len()
    }
}

/// Body of the `createMemScan` global
pub(crate) fn create(target: &Rc<RefCell<TargetState>>, stack: &mut dyn LuaStack) -> BridgeResult<i32> {
    target
        .borrow_mut()
        .scans
        .retain(|scan| !scan.state.borrow().destroyed);
    let state = Rc::new(RefCell::new(ScanState::default()));

    let methods: [(&str, Rc<HostFunction>); 6] = [
        ("firstScan", method("firstScan", target, &state, first_scan)),
        ("nextScan", method("nextScan", target, &state, next_scan)),
        ("waitTillDone", method("waitTillDone", target, &state, |_, scan, _| {
            scan.borrow().live()?;
            Ok(0)
        })),
        (
            "getAttachedFoundlist",
            method("getAttachedFoundlist", target, &state, found_list),
        ),
        ("newScan", method("newScan", target, &state, |_, scan, _| {
            let mut scan = scan.borrow_mut();
            scan.live()?;
            scan.found.clear();
            scan.value_type = None;
            Ok(0)
        })),
        ("destroy", method("destroy", target, &state, |_, scan, stack| {
            let mut scan = scan.borrow_mut();
            scan.live()?;
            scan.destroyed = true;
            scan.found = Vec::new();
            if stack.is_table(1) {
                for name in METHODS {
                    stack.push_nil();
                    stack.set_field(1, name);
                }
            }
            Ok(0)
        })),
    ];

    stack.create_table(0, methods.len() as i32);
    let table = stack.top();
    let mut functions = Vec::with_capacity(methods.len());
    for (name, func) in methods {
        stack.push_host_function(Rc::clone(&func));
        stack.set_field(table, name);
        functions.push(func);
    }
    target.borrow_mut().scans.push(Retained { state, functions });
    log::trace!("memscan object created");
    Ok(1)
}

type Method = fn(&Rc<RefCell<TargetState>>, &Rc<RefCell<ScanState>>, &mut dyn LuaStack) -> BridgeResult<i32>;

fn method(
    name: &str,
    target: &Rc<RefCell<TargetState>>,
    scan: &Rc<RefCell<ScanState>>,
    body: Method,
) -> Rc<HostFunction> {
    // the target keeps these functions alive, so hold it weakly
    let target = Rc::downgrade(target);
    let scan = Rc::clone(scan);
    Rc::new(HostFunction::new(name, move |stack| {
        let target = target
            .upgrade()
            .ok_or_else(|| BridgeError::from("target detached"))?;
        body(&target, &scan, stack)
    }))
}

// firstScan(self, scanType, valueType, rounding, value, value2, start, end,
//           protection, alignType, alignParam, isHex, notBinary, unicode, caseSensitive)
fn first_scan(
    target: &Rc<RefCell<TargetState>>,
    scan: &Rc<RefCell<ScanState>>,
    stack: &mut dyn LuaStack,
) -> BridgeResult<i32> {
    scan.borrow().live()?;
    let request = ScanRequest {
        scan_type: wire(stack.to_integer(2), ScanType::from_code, "scan type")?,
        value_type: wire(stack.to_integer(3), ValueType::from_code, "value type")?,
        rounding: wire(stack.to_integer(4), Rounding::from_code, "rounding")?,
        value: opt_string(stack, 5),
        value2: opt_string(stack, 6),
        is_hex: stack.to_bool(12),
        is_utf16: stack.to_bool(14),
        case_sensitive: stack.to_bool(15),
        percentage: false,
    };
    if request.scan_type.needs_previous() {
        return Err(BridgeError::InvalidArgument(format!(
            "{} scan needs a previous scan",
            request.scan_type
        )));
    }
    let start = stack.to_integer(7) as u64;
    let end = if stack.is_nil(8) {
        u64::MAX
    } else {
        stack.to_integer(8) as u64
    };
    let filter = ProtectionFilter::parse(&opt_string(stack, 9))?;
    let stride = Stride::from_wire(stack.to_integer(10), &opt_string(stack, 11))?;
    let matcher = Matcher::new(&request)?;
    let width = matcher.width();

    // collect per region first so callbacks never observe a borrowed image
    let passes: Vec<(u64, Vec<Found>)> = {
        let target = target.borrow();
        target
            .image
            .select(&filter, None)
            .map(|region| {
                let found = sweep(region, start, end, stride, width, |data| matcher.first(data))
                    .into_iter()
                    .map(|address| {
                        let offset = (address - region.base) as usize;
                        Found {
                            address,
                            previous: region.bytes[offset..offset + width].to_vec(),
                        }
                    })
                    .collect();
                (region.bytes.len() as u64, found)
            })
            .collect()
    };

    let total: u64 = passes.iter().map(|(len, _)| len).sum();
    let mut scanned = 0;
    let mut found = Vec::new();
    for (len, hits) in passes {
        scanned += len;
        found.extend(hits);
        notify_progress(stack, total, scanned, found.len() as u64);
    }
    log::debug!(
        "first scan {} {}: {} hits in {} bytes",
        request.scan_type,
        request.value_type,
        found.len(),
        total
    );

    {
        let mut scan = scan.borrow_mut();
        scan.found = found;
        scan.value_type = Some((request.value_type, request.is_utf16));
    }
    notify_done(stack);
    Ok(0)
}

// nextScan(self, scanType, rounding, value, value2, isHex, notBinary,
//          unicode, caseSensitive, percentage)
fn next_scan(
    target: &Rc<RefCell<TargetState>>,
    scan: &Rc<RefCell<ScanState>>,
    stack: &mut dyn LuaStack,
) -> BridgeResult<i32> {
    let (value_type, first_utf16) = {
        let scan = scan.borrow();
        scan.live()?;
        scan.value_type
            .ok_or_else(|| BridgeError::from("no first scan performed"))?
    };
    let request = ScanRequest {
        scan_type: wire(stack.to_integer(2), ScanType::from_code, "scan type")?,
        value_type,
        rounding: wire(stack.to_integer(3), Rounding::from_code, "rounding")?,
        value: opt_string(stack, 4),
        value2: opt_string(stack, 5),
        is_hex: stack.to_bool(6),
        is_utf16: stack.to_bool(8) || first_utf16,
        case_sensitive: stack.to_bool(9),
        percentage: stack.to_bool(10),
    };
    if request.scan_type == ScanType::Unknown {
        return Err(BridgeError::InvalidArgument(
            "unknown initial value scan needs a fresh session".to_string(),
        ));
    }
    let matcher = Matcher::new(&request)?;

    let previous = std::mem::take(&mut scan.borrow_mut().found);
    let total = previous.len() as u64;
    let kept: Vec<Found> = {
        let target = target.borrow();
        previous
            .into_iter()
            .filter_map(|entry| {
                let current = target.image.read(entry.address, entry.previous.len())?;
                matcher
                    .next(&current, &entry.previous)
                    .then(|| Found {
                        address: entry.address,
                        previous: current,
                    })
            })
            .collect()
    };
    log::debug!(
        "next scan {}: {} of {} kept",
        request.scan_type,
        kept.len(),
        total
    );

    let count = kept.len() as u64;
    scan.borrow_mut().found = kept;
    notify_progress(stack, total, total, count);
    notify_done(stack);
    Ok(0)
}

fn found_list(
    _target: &Rc<RefCell<TargetState>>,
    scan: &Rc<RefCell<ScanState>>,
    stack: &mut dyn LuaStack,
) -> BridgeResult<i32> {
    let scan = scan.borrow();
    scan.live()?;
    let (value_type, utf16) = scan.value_type.unwrap_or((ValueType::Dword, false));

    stack.create_table(0, 3);
    let list = stack.top();
    stack.push_integer(scan.found.len() as i64);
    stack.set_field(list, "Count");

    stack.create_table(scan.found.len() as i32, 0);
    let addresses = stack.top();
    for (i, entry) in scan.found.iter().enumerate() {
        stack.push_integer(i as i64);
        stack.push_str(&format!("{:X}", entry.address));
        stack.set_table(addresses);
    }
    stack.set_field(list, "Address");

    stack.create_table(scan.found.len() as i32, 0);
    let values = stack.top();
    for (i, entry) in scan.found.iter().enumerate() {
        stack.push_integer(i as i64);
        stack.push_str(&render(value_type, utf16, &entry.previous));
        stack.set_table(values);
    }
    stack.set_field(list, "Value");
    Ok(1)
}

fn notify_progress(stack: &mut dyn LuaStack, total: u64, scanned: u64, found: u64) {
    notify(stack, "OnGuiUpdate", &[total as i64, scanned as i64, found as i64]);
}

fn notify_done(stack: &mut dyn LuaStack) {
    notify(stack, "OnScanDone", &[]);
}

/// Call `self[field](self, extra...)` if set. Errors are logged, not raised.
fn notify(stack: &mut dyn LuaStack, field: &str, extra: &[i64]) {
    let top = stack.top();
    if stack.get_field(1, field) == ValueKind::Function {
        stack.push_value(1);
        for value in extra {
            stack.push_integer(*value);
        }
        if !stack.pcall(1 + extra.len() as i32, 0).is_ok() {
            let message = stack.to_string_lossy(-1);
            log::warn!("memscan {} handler failed: {}", field, message);
        }
    }
    stack.set_top(top);
}
