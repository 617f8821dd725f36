//! SimState: in-process engine honouring the stack calling convention
//!
//! Implements frames, globals, tables, registry references, host functions
//! and protected / unprotected calls. It has no compiler: every callable
//! value is a `HostFunction`. Lenient where the native engine would raise
//! from a primitive (indexing a non-table reads nil, storing into one is
//! ignored) since a raise outside a protected call has no host-side
//! counterpart.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use memlua_sdk::{CallStatus, HostFunction, LuaStack, ValueKind, MULTRET, REF_NIL};

use super::table::{Slot, Table, TableRef};

/// Nested call limit before reporting a stack overflow
const MAX_CALL_DEPTH: usize = 200;

/// In-process engine state
pub struct SimState {
    stack: Vec<Slot>,
    /// Absolute position of slot 1 of the current frame
    base: usize,
    depth: usize,
    globals: TableRef,
    refs: Vec<Option<Slot>>,
    free_refs: Vec<usize>,
}

impl SimState {
    /// Create an empty engine with an empty globals table
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            base: 0,
            depth: 0,
            globals: Table::new_ref(),
            refs: Vec::new(),
            free_refs: Vec::new(),
        }
    }

    /// Number of nested host calls currently running
    pub fn call_depth(&self) -> usize {
        self.depth
    }

    /// Number of live registry references
    pub fn live_refs(&self) -> usize {
        self.refs.iter().filter(|r| r.is_some()).count()
    }

    fn position(&self, index: i32) -> Option<usize> {
        let len = self.stack.len();
        if index > 0 {
            let pos = self.base + index as usize - 1;
            (pos < len).then_some(pos)
        } else if index < 0 {
            let offset = index.unsigned_abs() as usize;
            (offset <= len - self.base).then(|| len - offset)
        } else {
            None
        }
    }

    fn slot(&self, index: i32) -> Option<&Slot> {
        self.position(index).map(|p| &self.stack[p])
    }

    fn slot_or_nil(&self, index: i32) -> Slot {
        self.slot(index).cloned().unwrap_or(Slot::Nil)
    }

    fn pop_slot(&mut self) -> Slot {
        if self.stack.len() > self.base {
            self.stack.pop().unwrap_or(Slot::Nil)
        } else {
            Slot::Nil
        }
    }

    fn table_at(&self, index: i32) -> Option<TableRef> {
        match self.slot(index) {
            Some(Slot::Table(t)) => Some(t.clone()),
            _ => None,
        }
    }

    fn push_slot(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    /// Run `func` in a new frame holding `args`; returns its results
    fn invoke(&mut self, func: Slot, args: Vec<Slot>) -> Result<Vec<Slot>, String> {
        let func = match func {
            Slot::Function(f) => f,
            other => return Err(format!("attempt to call a {} value", other.kind().name())),
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err("stack overflow".to_string());
        }

        let saved_base = self.base;
        let frame_base = self.stack.len();
        self.stack.extend(args);
        self.base = frame_base;
        self.depth += 1;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| func.invoke(self)));

        self.depth -= 1;
        let result = match outcome {
            Ok(Ok(count)) => {
                let available = self.stack.len().saturating_sub(frame_base);
                let count = (count.max(0) as usize).min(available);
                Ok(self.stack.split_off(self.stack.len() - count))
            }
            Ok(Err(err)) => Err(err.engine_message()),
            Err(payload) => Err(panic_message(payload)),
        };
        self.stack.truncate(frame_base);
        self.base = saved_base;
        result
    }

    /// Detach the function and its arguments from the top of the frame
    fn take_call(&mut self, nargs: i32) -> Option<(Slot, Vec<Slot>)> {
        let nargs = nargs.max(0) as usize;
        let len = self.stack.len();
        if len < self.base + nargs + 1 {
            return None;
        }
        let args = self.stack.split_off(len - nargs);
        let func = self.stack.pop().unwrap_or(Slot::Nil);
        Some((func, args))
    }

    fn push_results(&mut self, mut results: Vec<Slot>, nresults: i32) {
        if nresults != MULTRET {
            results.resize(nresults.max(0) as usize, Slot::Nil);
        }
        self.stack.extend(results);
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimState")
            .field("top", &self.top())
            .field("depth", &self.depth)
            .field("globals", &self.globals.borrow().len())
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("host function panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("host function panicked: {}", s)
    } else {
        "host function panicked".to_string()
    }
}

/// Number → string the way the engine prints numbers
fn format_number(slot: &Slot) -> Option<String> {
    match slot {
        Slot::Int(i) => Some(i.to_string()),
        Slot::Num(n) if n.is_nan() => Some("nan".to_string()),
        Slot::Num(n) if n.is_infinite() => Some(if *n > 0.0 { "inf" } else { "-inf" }.to_string()),
        Slot::Num(n) if n.fract() == 0.0 && n.abs() < 1e16 => Some(format!("{:.1}", n)),
        Slot::Num(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric string → number (integers stay integers)
fn parse_number(bytes: &[u8]) -> Option<Slot> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let value = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Slot::Int(if negative { value.wrapping_neg() } else { value }));
    }
    if !digits
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Slot::Int(i));
    }
    text.parse::<f64>().ok().map(Slot::Num)
}

impl LuaStack for SimState {
    fn top(&self) -> i32 {
        (self.stack.len() - self.base) as i32
    }

    fn set_top(&mut self, index: i32) {
        let len = self.stack.len();
        let new_len = if index >= 0 {
            self.base + index as usize
        } else {
            let drop = (index.unsigned_abs() as usize) - 1;
            len.saturating_sub(drop).max(self.base)
        };
        self.stack.resize(new_len, Slot::Nil);
    }

    fn push_nil(&mut self) {
        self.push_slot(Slot::Nil);
    }

    fn push_bool(&mut self, b: bool) {
        self.push_slot(Slot::Bool(b));
    }

    fn push_integer(&mut self, i: i64) {
        self.push_slot(Slot::Int(i));
    }

    fn push_number(&mut self, n: f64) {
        self.push_slot(Slot::Num(n));
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.push_slot(Slot::string(bytes));
    }

    fn push_value(&mut self, index: i32) {
        let slot = self.slot_or_nil(index);
        self.push_slot(slot);
    }

    fn push_host_function(&mut self, func: Rc<HostFunction>) {
        self.push_slot(Slot::Function(func));
    }

    fn value_kind(&self, index: i32) -> ValueKind {
        self.slot(index).map(Slot::kind).unwrap_or(ValueKind::None)
    }

    fn is_number(&self, index: i32) -> bool {
        match self.slot(index) {
            Some(Slot::Int(_)) | Some(Slot::Num(_)) => true,
            Some(Slot::Str(s)) => parse_number(s).is_some(),
            _ => false,
        }
    }

    fn is_integer(&self, index: i32) -> bool {
        matches!(self.slot(index), Some(Slot::Int(_)))
    }

    fn to_bool(&self, index: i32) -> bool {
        !matches!(self.slot(index), None | Some(Slot::Nil) | Some(Slot::Bool(false)))
    }

    fn to_integer(&self, index: i32) -> i64 {
        let slot = match self.slot(index) {
            Some(Slot::Str(s)) => parse_number(s),
            other => other.cloned(),
        };
        match slot {
            Some(Slot::Int(i)) => i,
            Some(Slot::Num(n)) if n.fract() == 0.0 && n.abs() < 9.2e18 => n as i64,
            _ => 0,
        }
    }

    fn to_number(&self, index: i32) -> f64 {
        let slot = match self.slot(index) {
            Some(Slot::Str(s)) => parse_number(s),
            other => other.cloned(),
        };
        match slot {
            Some(Slot::Int(i)) => i as f64,
            Some(Slot::Num(n)) => n,
            _ => 0.0,
        }
    }

    fn to_bytes(&mut self, index: i32) -> Vec<u8> {
        let Some(pos) = self.position(index) else {
            return Vec::new();
        };
        match &self.stack[pos] {
            Slot::Str(s) => s.to_vec(),
            number => match format_number(number) {
                Some(text) => {
                    // coerced in place, as the native engine does
                    self.stack[pos] = Slot::string(text.as_bytes());
                    text.into_bytes()
                }
                None => Vec::new(),
            },
        }
    }

    fn to_pointer(&self, index: i32) -> usize {
        self.slot(index).map(Slot::pointer).unwrap_or(0)
    }

    fn get_global(&mut self, name: &str) -> ValueKind {
        let value = self.globals.borrow().get_str(name);
        let kind = value.kind();
        self.push_slot(value);
        kind
    }

    fn set_global(&mut self, name: &str) {
        let value = self.pop_slot();
        self.globals
            .borrow_mut()
            .set(Slot::string(name.as_bytes()), value);
    }

    fn get_field(&mut self, index: i32, key: &str) -> ValueKind {
        let value = match self.table_at(index) {
            Some(t) => t.borrow().get_str(key),
            None => Slot::Nil,
        };
        let kind = value.kind();
        self.push_slot(value);
        kind
    }

    fn set_field(&mut self, index: i32, key: &str) {
        let table = self.table_at(index);
        let value = self.pop_slot();
        match table {
            Some(t) => {
                t.borrow_mut().set(Slot::string(key.as_bytes()), value);
            }
            None => log::warn!("set_field '{}' on a non-table value ignored", key),
        }
    }

    fn get_table(&mut self, index: i32) -> ValueKind {
        let table = self.table_at(index);
        let key = self.pop_slot();
        let value = match table {
            Some(t) => t.borrow().get(&key),
            None => Slot::Nil,
        };
        let kind = value.kind();
        self.push_slot(value);
        kind
    }

    fn set_table(&mut self, index: i32) {
        let table = self.table_at(index);
        let value = self.pop_slot();
        let key = self.pop_slot();
        match table {
            Some(t) => {
                if !t.borrow_mut().set(key, value) {
                    log::warn!("invalid table key ignored");
                }
            }
            None => log::warn!("set_table on a non-table value ignored"),
        }
    }

    fn create_table(&mut self, _array_hint: i32, _record_hint: i32) {
        self.push_slot(Slot::Table(Table::new_ref()));
    }

    fn next(&mut self, index: i32) -> bool {
        let table = self.table_at(index);
        let key = self.pop_slot();
        let entry = table.and_then(|t| t.borrow().next_after(&key));
        match entry {
            Some((k, v)) => {
                self.push_slot(k);
                self.push_slot(v);
                true
            }
            None => false,
        }
    }

    fn pcall(&mut self, nargs: i32, nresults: i32) -> CallStatus {
        let Some((func, args)) = self.take_call(nargs) else {
            // the frame holds fewer than nargs + 1 values, all pushed for this call
            self.stack.truncate(self.base);
            self.push_bytes(b"attempt to call with a missing function");
            return CallStatus::Runtime;
        };
        match self.invoke(func, args) {
            Ok(results) => {
                self.push_results(results, nresults);
                CallStatus::Ok
            }
            Err(message) => {
                self.push_bytes(message.as_bytes());
                CallStatus::Runtime
            }
        }
    }

    fn call(&mut self, nargs: i32, nresults: i32) {
        let Some((func, args)) = self.take_call(nargs) else {
            panic!("unprotected error in call to engine API (missing function)");
        };
        match self.invoke(func, args) {
            Ok(results) => self.push_results(results, nresults),
            Err(message) => panic!("unprotected error in call to engine API ({})", message),
        }
    }

    fn create_ref(&mut self) -> i32 {
        let value = self.pop_slot();
        if matches!(value, Slot::Nil) {
            return REF_NIL;
        }
        match self.free_refs.pop() {
            Some(slot) => {
                self.refs[slot] = Some(value);
                slot as i32 + 1
            }
            None => {
                self.refs.push(Some(value));
                self.refs.len() as i32
            }
        }
    }

    fn push_ref(&mut self, reference: i32) {
        let value = if reference > 0 {
            self.refs
                .get(reference as usize - 1)
                .and_then(|r| r.clone())
                .unwrap_or(Slot::Nil)
        } else {
            Slot::Nil
        };
        self.push_slot(value);
    }

    fn release_ref(&mut self, reference: i32) {
        if reference <= 0 {
            return;
        }
        let slot = reference as usize - 1;
        if let Some(entry) = self.refs.get_mut(slot) {
            if entry.take().is_some() {
                self.free_refs.push(slot);
            }
        }
    }
}
