//! Typed memory accessors
//!
//! Thin call-by-name wrappers over the remote `read*` / `write*` entry
//! points. The `Local` flavour targets the host's own address space and
//! calls the entry points suffixed with `Local`.

use memlua_sdk::{collect_bytes, BridgeError, BridgeResult, FromStack, LuaStack};

use crate::bridge::BridgeHandle;
use crate::marshal::{self, Arg, ArgList};

/// Reads and writes memory through the remote entry points
#[derive(Debug, Clone)]
pub struct MemoryAccess {
    bridge: BridgeHandle,
    local: bool,
}

macro_rules! scalar_accessors {
    ($( $read:ident, $write:ident: $ty:ty => $name:literal; )*) => {
        $(
            #[doc = concat!("`read", $name, "(address)`")]
            pub fn $read(&self, address: u64) -> BridgeResult<$ty> {
                self.read(concat!("read", $name), ArgList::new().push(address))
            }

            #[doc = concat!("`write", $name, "(address, value)`")]
            pub fn $write(&self, address: u64, value: $ty) -> BridgeResult<bool> {
                self.write(concat!("write", $name), ArgList::new().push(address).push(value))
            }
        )*
    };
}

impl MemoryAccess {
    /// Accessor for the target process
    pub fn new(bridge: BridgeHandle) -> Self {
        Self {
            bridge,
            local: false,
        }
    }

    /// Accessor for the host process
    pub fn local(bridge: BridgeHandle) -> Self {
        Self {
            bridge,
            local: true,
        }
    }

    /// True for the host-process flavour
    pub fn is_local(&self) -> bool {
        self.local
    }

    fn symbol(&self, base: &str) -> String {
        if self.local {
            format!("{}Local", base)
        } else {
            base.to_string()
        }
    }

    fn read<T: FromStack>(&self, base: &str, args: ArgList) -> BridgeResult<T> {
        self.read_with(base, args, |s, index| T::from_stack(s, index))
    }

    fn read_with<T>(
        &self,
        base: &str,
        args: ArgList,
        decode: impl FnOnce(&mut dyn LuaStack, i32) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        let symbol = self.symbol(base);
        self.bridge.with_stack(|s| {
            marshal::call_global(s, &symbol, &args, |s, index| {
                if s.is_nil(index) {
                    return Err(BridgeError::call_failed(&symbol, "read returned nil"));
                }
                decode(s, index)
            })
        })
    }

    fn write(&self, base: &str, args: ArgList) -> BridgeResult<bool> {
        let symbol = self.symbol(base);
        self.bridge
            .with_stack(|s| marshal::invoke::<bool>(s, &symbol, &args))
    }

    scalar_accessors! {
        read_byte, write_byte: u8 => "Byte";
        read_small_integer, write_small_integer: i16 => "SmallInteger";
        read_integer, write_integer: i32 => "Integer";
        read_qword, write_qword: i64 => "Qword";
        read_pointer, write_pointer: u64 => "Pointer";
        read_float, write_float: f32 => "Float";
        read_double, write_double: f64 => "Double";
    }

    /// `readString(address, max_len, wide)`
    pub fn read_string(&self, address: u64, max_len: usize, wide: bool) -> BridgeResult<String> {
        if max_len == 0 {
            return Err(BridgeError::InvalidArgument(
                "string length must be positive".to_string(),
            ));
        }
        self.read(
            "readString",
            ArgList::new().push(address).push(max_len).push(wide),
        )
    }

    /// `readBytes(address, count, true)`; the result table is collected in
    /// key order
    pub fn read_bytes(&self, address: u64, count: usize) -> BridgeResult<Vec<u8>> {
        if count == 0 {
            return Err(BridgeError::InvalidArgument(
                "byte count must be positive".to_string(),
            ));
        }
        let bytes = self.read_with(
            "readBytes",
            ArgList::new().push(address).push(count).push(true),
            |s, index| Ok(collect_bytes(s, index)),
        )?;
        if bytes.len() != count {
            log::debug!("readBytes returned {} of {} bytes", bytes.len(), count);
        }
        Ok(bytes)
    }

    /// `writeString(address, text, wide)`
    pub fn write_string(&self, address: u64, text: &str, wide: bool) -> BridgeResult<bool> {
        if text.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "string to write is empty".to_string(),
            ));
        }
        self.write(
            "writeString",
            ArgList::new().push(address).push(text).push(wide),
        )
    }

    /// `writeBytes(address, table)`
    pub fn write_bytes(&self, address: u64, bytes: &[u8]) -> BridgeResult<bool> {
        if bytes.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "byte payload is empty".to_string(),
            ));
        }
        self.write(
            "writeBytes",
            ArgList::new().push(address).push(Arg::Bytes(bytes.to_vec())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use memlua_sdk::HostFunction;
    use std::rc::Rc;

    #[test]
    fn test_local_flavour_uses_suffixed_symbols() {
        let bridge = Bridge::sim();
        bridge
            .register_raw("readByteLocal", |s| {
                s.push_integer(0x5A);
                Ok(1)
            })
            .unwrap();

        let local = MemoryAccess::local(bridge.clone());
        assert_eq!(local.read_byte(0x10).unwrap(), 0x5A);

        let remote = MemoryAccess::new(bridge.clone());
        assert_eq!(
            remote.read_byte(0x10).unwrap_err(),
            BridgeError::symbol_not_found("readByte")
        );
        assert_eq!(bridge.depth().unwrap(), 0);
    }

    #[test]
    fn test_nil_read_is_call_failure() {
        let bridge = Bridge::sim();
        bridge
            .with_stack(|s| {
                s.register_function(
                    "readInteger",
                    Rc::new(HostFunction::new("readInteger", |s| {
                        s.push_nil();
                        Ok(1)
                    })),
                );
                Ok(())
            })
            .unwrap();
        let err = MemoryAccess::new(bridge.clone()).read_integer(0).unwrap_err();
        assert_eq!(err, BridgeError::call_failed("readInteger", "read returned nil"));
        assert_eq!(bridge.depth().unwrap(), 0);
    }

    #[test]
    fn test_empty_payloads_rejected_before_call() {
        let bridge = Bridge::sim();
        let mem = MemoryAccess::new(bridge);
        assert!(matches!(mem.write_bytes(0, &[]), Err(BridgeError::InvalidArgument(_))));
        assert!(matches!(mem.write_string(0, "", false), Err(BridgeError::InvalidArgument(_))));
        assert!(matches!(mem.read_bytes(0, 0), Err(BridgeError::InvalidArgument(_))));
        assert!(matches!(mem.read_string(0, 0, false), Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn test_write_arguments_in_wire_order() {
        let bridge = Bridge::sim();
        bridge
            .register_raw("writeString", |s| {
                assert_eq!(s.top(), 3);
                assert_eq!(s.to_integer(1), 0x400);
                assert_eq!(s.to_string_lossy(2), "abc");
                assert!(s.to_bool(3));
                s.push_bool(true);
                Ok(1)
            })
            .unwrap();
        let mem = MemoryAccess::new(bridge);
        assert!(mem.write_string(0x400, "abc", true).unwrap());
    }
}
