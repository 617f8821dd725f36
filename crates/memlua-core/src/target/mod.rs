//! Simulated target process
//!
//! A [`Target`] is an in-memory stand-in for an attached process. Installing
//! it on a [`Bridge`] registers the global entry points the accessors and
//! scanners of this crate call:
//!
//! - `read<T>` / `write<T>` and their `Local` twins, for `Byte`,
//!   `SmallInteger`, `Integer`, `Qword`, `Pointer`, `Float`, `Double`,
//!   `String` and `Bytes`
//! - `AOBScan`, `AOBScanUnique` and `AOBScanModuleUnique`
//! - `createMemScan`
//!
//! Failed reads return nil, failed writes return false. The `Local` twins
//! operate on a separate image standing for the host's own memory.
//!
//! # Example
//!
//! ```ignore
//! let bridge = Bridge::sim();
//! let target = Target::new();
//! target.map(Region::new(0x1000, vec![0x48, 0x8B, 0x05, 0, 0, 0, 0]).with_module("game.exe"))?;
//! target.install(&bridge)?;
//! let hits = AobScanner::new(bridge).scan_str("48 8B 05", &AobScanOptions::default())?;
//! ```

mod compare;
mod image;
mod memscan;

use std::cell::RefCell;
use std::rc::Rc;

use memlua_sdk::{collect_bytes, push_byte_table, BridgeError, BridgeResult, LuaStack};

use crate::aob::AobPattern;
use crate::bridge::Bridge;
use compare::encode_text;
use image::{sweep, Stride};

pub use image::{Image, Protection, ProtectionFilter, Region};

pub(crate) struct TargetState {
    image: Image,
    local: Image,
    /// Memscan objects and the host functions handed out for them
    scans: Vec<memscan::Retained>,
}

/// Fixed-width cell kinds exposed as `read<Name>` / `write<Name>`
#[derive(Debug, Clone, Copy)]
enum Cell {
    Byte,
    SmallInteger,
    Integer,
    Qword,
    Pointer,
    Float,
    Double,
}

impl Cell {
    const ALL: [Cell; 7] = [
        Cell::Byte,
        Cell::SmallInteger,
        Cell::Integer,
        Cell::Qword,
        Cell::Pointer,
        Cell::Float,
        Cell::Double,
    ];

    fn name(self) -> &'static str {
        match self {
            Cell::Byte => "Byte",
            Cell::SmallInteger => "SmallInteger",
            Cell::Integer => "Integer",
            Cell::Qword => "Qword",
            Cell::Pointer => "Pointer",
            Cell::Float => "Float",
            Cell::Double => "Double",
        }
    }

    fn size(self) -> usize {
        match self {
            Cell::Byte => 1,
            Cell::SmallInteger => 2,
            Cell::Integer | Cell::Float => 4,
            Cell::Qword | Cell::Pointer | Cell::Double => 8,
        }
    }

    fn push(self, stack: &mut dyn LuaStack, bytes: &[u8]) {
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        match self {
            Cell::Byte => stack.push_integer(raw[0] as i64),
            Cell::SmallInteger => stack.push_integer(i16::from_le_bytes([raw[0], raw[1]]) as i64),
            Cell::Integer => {
                stack.push_integer(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64)
            }
            Cell::Qword | Cell::Pointer => stack.push_integer(i64::from_le_bytes(raw)),
            Cell::Float => {
                stack.push_number(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64)
            }
            Cell::Double => stack.push_number(f64::from_le_bytes(raw)),
        }
    }

    fn encode(self, stack: &mut dyn LuaStack, index: i32) -> Vec<u8> {
        match self {
            Cell::Float => (stack.to_number(index) as f32).to_le_bytes().to_vec(),
            Cell::Double => stack.to_number(index).to_le_bytes().to_vec(),
            _ => stack.to_integer(index).to_le_bytes()[..self.size()].to_vec(),
        }
    }
}

/// In-memory process with mapped regions
#[derive(Clone)]
pub struct Target {
    state: Rc<RefCell<TargetState>>,
}

impl Default for Target {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Target")
            .field("regions", &state.image.regions().len())
            .field("local_regions", &state.local.regions().len())
            .finish()
    }
}

impl Target {
    /// Target with nothing mapped
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(TargetState {
                image: Image::new(),
                local: Image::new(),
                scans: Vec::new(),
            })),
        }
    }

    /// Target holding one read-write region
    pub fn from_bytes(base: u64, bytes: Vec<u8>) -> BridgeResult<Self> {
        let target = Self::new();
        target.map(Region::new(base, bytes))?;
        Ok(target)
    }

    /// Map a region of the target
    pub fn map(&self, region: Region) -> BridgeResult<()> {
        log::debug!(
            "mapping {:#x}..{:#x} ({:?})",
            region.base,
            region.end(),
            region.module
        );
        self.state.borrow_mut().image.map(region)
    }

    /// Map a region of the host's own memory
    pub fn map_local(&self, region: Region) -> BridgeResult<()> {
        self.state.borrow_mut().local.map(region)
    }

    /// Snapshot of the target image
    pub fn image(&self) -> Image {
        self.state.borrow().image.clone()
    }

    /// `len` bytes of the target at `address`
    pub fn peek(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        self.state.borrow().image.read(address, len)
    }

    /// Overwrite target memory, as the process itself would
    pub fn poke(&self, address: u64, bytes: &[u8]) -> bool {
        self.state.borrow_mut().image.write(address, bytes)
    }

    /// Register every entry point on `bridge`
    pub fn install(&self, bridge: &Bridge) -> BridgeResult<()> {
        for local in [false, true] {
            let suffix = if local { "Local" } else { "" };
            for cell in Cell::ALL {
                self.install_cell(bridge, cell, local, suffix)?;
            }
            self.install_strings(bridge, local, suffix)?;
            self.install_bytes(bridge, local, suffix)?;
        }
        self.install_aob(bridge)?;

        let state = Rc::clone(&self.state);
        bridge.register_raw("createMemScan", move |s| memscan::create(&state, s))?;
        log::debug!("simulated target installed");
        Ok(())
    }

    fn install_cell(&self, bridge: &Bridge, cell: Cell, local: bool, suffix: &str) -> BridgeResult<()> {
        let state = Rc::clone(&self.state);
        bridge.register_raw(&format!("read{}{}", cell.name(), suffix), move |s| {
            let address = s.to_integer(1) as u64;
            match image_of(&state.borrow(), local).read(address, cell.size()) {
                Some(bytes) => cell.push(s, &bytes),
                None => s.push_nil(),
            }
            Ok(1)
        })?;

        let state = Rc::clone(&self.state);
        bridge.register_raw(&format!("write{}{}", cell.name(), suffix), move |s| {
            let address = s.to_integer(1) as u64;
            let bytes = cell.encode(s, 2);
            let written = image_of_mut(&mut state.borrow_mut(), local).write(address, &bytes);
            s.push_bool(written);
            Ok(1)
        })
    }

    fn install_strings(&self, bridge: &Bridge, local: bool, suffix: &str) -> BridgeResult<()> {
        // readString(address, maxLength, wide)
        let state = Rc::clone(&self.state);
        bridge.register_raw(&format!("readString{}", suffix), move |s| {
            let address = s.to_integer(1) as u64;
            let max_len = if s.is_nil(2) { 256 } else { s.to_integer(2).max(0) as usize };
            let wide = s.to_bool(3);
            let unit = if wide { 2 } else { 1 };
            let Some(raw) = image_of(&state.borrow(), local).read_upto(address, max_len * unit) else {
                s.push_nil();
                return Ok(1);
            };
            let text = if wide {
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                String::from_utf16_lossy(&units)
            } else {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..end]).into_owned()
            };
            s.push_str(&text);
            Ok(1)
        })?;

        // writeString(address, text, wide), no terminator
        let state = Rc::clone(&self.state);
        bridge.register_raw(&format!("writeString{}", suffix), move |s| {
            let address = s.to_integer(1) as u64;
            let text = s.to_string_lossy(2);
            let bytes = encode_text(&text, s.to_bool(3));
            let written = image_of_mut(&mut state.borrow_mut(), local).write(address, &bytes);
            s.push_bool(written);
            Ok(1)
        })
    }

    fn install_bytes(&self, bridge: &Bridge, local: bool, suffix: &str) -> BridgeResult<()> {
        // readBytes(address, count, asTable)
        let state = Rc::clone(&self.state);
        bridge.register_raw(&format!("readBytes{}", suffix), move |s| {
            let address = s.to_integer(1) as u64;
            let count = if s.is_nil(2) { 1 } else { s.to_integer(2).max(0) as usize };
            let as_table = s.to_bool(3);
            let Some(bytes) = image_of(&state.borrow(), local).read(address, count) else {
                s.push_nil();
                return Ok(1);
            };
            if as_table {
                push_byte_table(s, &bytes);
                return Ok(1);
            }
            for b in &bytes {
                s.push_integer(*b as i64);
            }
            Ok(bytes.len() as i32)
        })?;

        // writeBytes(address, table) or writeBytes(address, b1, b2, ...)
        let state = Rc::clone(&self.state);
        bridge.register_raw(&format!("writeBytes{}", suffix), move |s| {
            let address = s.to_integer(1) as u64;
            let bytes = if s.is_table(2) {
                collect_bytes(s, 2)
            } else {
                (2..=s.top()).map(|i| s.to_integer(i) as u8).collect()
            };
            if bytes.is_empty() {
                return Err(BridgeError::InvalidArgument("no bytes to write".to_string()));
            }
            let written = image_of_mut(&mut state.borrow_mut(), local).write(address, &bytes);
            s.push_bool(written);
            Ok(1)
        })
    }

    fn install_aob(&self, bridge: &Bridge) -> BridgeResult<()> {
        // AOBScan(pattern, protection, alignType, alignParam)
        let state = Rc::clone(&self.state);
        bridge.register_raw("AOBScan", move |s| {
            let hits = aob_search(&state.borrow(), s, None, 1)?;
            if hits.is_empty() {
                s.push_nil();
                return Ok(1);
            }
            s.create_table(hits.len() as i32, 0);
            let list = s.top();
            for (i, address) in hits.iter().enumerate() {
                s.push_integer(i as i64 + 1);
                s.push_str(&format!("{:X}", address));
                s.set_table(list);
            }
            Ok(1)
        })?;

        let state = Rc::clone(&self.state);
        bridge.register_raw("AOBScanUnique", move |s| {
            let hits = aob_search(&state.borrow(), s, None, 1)?;
            push_first(s, &hits);
            Ok(1)
        })?;

        // AOBScanModuleUnique(module, pattern, protection, alignType, alignParam)
        let state = Rc::clone(&self.state);
        bridge.register_raw("AOBScanModuleUnique", move |s| {
            let module = s.to_string_lossy(1);
            let hits = aob_search(&state.borrow(), s, Some(module.as_str()), 2)?;
            push_first(s, &hits);
            Ok(1)
        })
    }
}

fn image_of(state: &TargetState, local: bool) -> &Image {
    if local {
        &state.local
    } else {
        &state.image
    }
}

fn image_of_mut(state: &mut TargetState, local: bool) -> &mut Image {
    if local {
        &mut state.local
    } else {
        &mut state.image
    }
}

fn push_first(stack: &mut dyn LuaStack, hits: &[u64]) {
    match hits.first() {
        Some(&address) => stack.push_integer(address as i64),
        None => stack.push_nil(),
    }
}

/// Pattern search with arguments starting at `first`: pattern, protection,
/// alignment type, alignment parameter
fn aob_search(
    state: &TargetState,
    stack: &mut dyn LuaStack,
    module: Option<&str>,
    first: i32,
) -> BridgeResult<Vec<u64>> {
    let pattern = AobPattern::parse(&stack.to_string_lossy(first))?;
    let flags = if stack.is_nil(first + 1) {
        String::new()
    } else {
        stack.to_string_lossy(first + 1)
    };
    let filter = ProtectionFilter::parse(&flags)?;
    let param = if stack.is_nil(first + 3) {
        String::new()
    } else {
        stack.to_string_lossy(first + 3)
    };
    let stride = Stride::from_wire(stack.to_integer(first + 2), &param)?;

    let hits: Vec<u64> = state
        .image
        .select(&filter, module)
        .flat_map(|region| {
            sweep(region, 0, u64::MAX, stride, pattern.len(), |data| pattern.matches(data))
        })
        .collect();
    log::trace!("aob {} matched {} times", pattern, hits.len());
    Ok(hits)
}
