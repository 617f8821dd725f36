//! Slots and tables of the in-process engine

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use memlua_sdk::{HostFunction, ValueKind};

/// Shared table reference
pub(crate) type TableRef = Rc<RefCell<Table>>;

/// One stack slot / table value
#[derive(Clone)]
pub(crate) enum Slot {
    Nil,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(Rc<[u8]>),
    Table(TableRef),
    Function(Rc<HostFunction>),
    LightUserdata(usize),
}

impl Slot {
    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            Slot::Nil => ValueKind::Nil,
            Slot::Bool(_) => ValueKind::Boolean,
            Slot::Int(_) | Slot::Num(_) => ValueKind::Number,
            Slot::Str(_) => ValueKind::String,
            Slot::Table(_) => ValueKind::Table,
            Slot::Function(_) => ValueKind::Function,
            Slot::LightUserdata(_) => ValueKind::LightUserdata,
        }
    }

    pub(crate) fn string(bytes: &[u8]) -> Self {
        Slot::Str(Rc::from(bytes))
    }

    pub(crate) fn pointer(&self) -> usize {
        match self {
            Slot::Table(t) => Rc::as_ptr(t) as *const () as usize,
            Slot::Function(f) => Rc::as_ptr(f) as *const () as usize,
            Slot::LightUserdata(p) => *p,
            _ => 0,
        }
    }
}

/// Ordering key of a table entry.
///
/// Integral floats normalise to integers so `t[1]` and `t[1.0]` are the
/// same entry. Reference values key by identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TableKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Vec<u8>),
    Ref(usize),
}

impl TableKey {
    /// `None` for keys the engine rejects (nil, NaN)
    pub(crate) fn from_slot(slot: &Slot) -> Option<Self> {
        match slot {
            Slot::Nil => None,
            Slot::Bool(b) => Some(TableKey::Bool(*b)),
            Slot::Int(i) => Some(TableKey::Int(*i)),
            Slot::Num(n) if n.is_nan() => None,
            Slot::Num(n) if n.fract() == 0.0 && n.abs() < 9.2e18 => Some(TableKey::Int(*n as i64)),
            Slot::Num(n) => Some(TableKey::Float(n.to_bits())),
            Slot::Str(s) => Some(TableKey::Str(s.to_vec())),
            other => Some(TableKey::Ref(other.pointer())),
        }
    }
}

/// Table with deterministic traversal order (by key)
#[derive(Default)]
pub(crate) struct Table {
    entries: BTreeMap<TableKey, (Slot, Slot)>,
}

impl Table {
    pub(crate) fn new_ref() -> TableRef {
        Rc::new(RefCell::new(Table::default()))
    }

    pub(crate) fn get(&self, key: &Slot) -> Slot {
        TableKey::from_slot(key)
            .and_then(|k| self.entries.get(&k))
            .map(|(_, v)| v.clone())
            .unwrap_or(Slot::Nil)
    }

    pub(crate) fn get_str(&self, key: &str) -> Slot {
        self.entries
            .get(&TableKey::Str(key.as_bytes().to_vec()))
            .map(|(_, v)| v.clone())
            .unwrap_or(Slot::Nil)
    }

    /// Store `value` under `key`; nil removes. Returns false for invalid keys.
    pub(crate) fn set(&mut self, key: Slot, value: Slot) -> bool {
        let Some(k) = TableKey::from_slot(&key) else {
            return false;
        };
        if matches!(value, Slot::Nil) {
            self.entries.remove(&k);
        } else {
            self.entries.insert(k, (key, value));
        }
        true
    }

    /// Entry following `key` in traversal order (first entry for nil)
    pub(crate) fn next_after(&self, key: &Slot) -> Option<(Slot, Slot)> {
        let entry = match key {
            Slot::Nil => self.entries.iter().next(),
            other => {
                let k = TableKey::from_slot(other)?;
                self.entries
                    .range((Bound::Excluded(k), Bound::Unbounded))
                    .next()
            }
        };
        entry.map(|(_, (k, v))| (k.clone(), v.clone()))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_float_keys_normalise() {
        let mut t = Table::default();
        t.set(Slot::Num(1.0), Slot::Int(10));
        assert!(matches!(t.get(&Slot::Int(1)), Slot::Int(10)));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_nil_value_removes_entry() {
        let mut t = Table::default();
        t.set(Slot::string(b"a"), Slot::Bool(true));
        t.set(Slot::string(b"a"), Slot::Nil);
        assert_eq!(t.len(), 0);
        assert!(!t.set(Slot::Nil, Slot::Int(1)));
    }

    #[test]
    fn test_traversal_visits_every_entry_once() {
        let mut t = Table::default();
        for i in 1..=3 {
            t.set(Slot::Int(i), Slot::Int(i * 2));
        }
        t.set(Slot::string(b"k"), Slot::Int(0));

        let mut key = Slot::Nil;
        let mut seen = 0;
        while let Some((k, _)) = t.next_after(&key) {
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 4);
    }
}
