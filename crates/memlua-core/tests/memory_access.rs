//! Typed reads and writes through the bridge against a simulated target

use memlua_core::{Bridge, BridgeError, BridgeHandle, MemoryAccess, Region, Target};

const BASE: u64 = 0x0040_0000;

fn setup() -> (BridgeHandle, Target) {
    let bridge = Bridge::sim();
    let target = Target::from_bytes(BASE, vec![0; 0x200]).unwrap();
    target.map_local(Region::new(BASE, vec![0; 0x40])).unwrap();
    target.install(&bridge).unwrap();
    (bridge, target)
}

#[test]
fn test_scalar_round_trips() {
    let (bridge, target) = setup();
    let memory = MemoryAccess::new(bridge.clone());

    assert!(memory.write_byte(BASE, 0xAB).unwrap());
    assert_eq!(memory.read_byte(BASE).unwrap(), 0xAB);

    assert!(memory.write_small_integer(BASE + 2, -300).unwrap());
    assert_eq!(memory.read_small_integer(BASE + 2).unwrap(), -300);

    assert!(memory.write_integer(BASE + 4, 123_456).unwrap());
    assert_eq!(memory.read_integer(BASE + 4).unwrap(), 123_456);

    assert!(memory.write_qword(BASE + 8, -9_000_000_000).unwrap());
    assert_eq!(memory.read_qword(BASE + 8).unwrap(), -9_000_000_000);

    assert!(memory.write_pointer(BASE + 16, 0x7FF6_0000_1000).unwrap());
    assert_eq!(memory.read_pointer(BASE + 16).unwrap(), 0x7FF6_0000_1000);

    assert!(memory.write_float(BASE + 24, 1.5).unwrap());
    assert_eq!(memory.read_float(BASE + 24).unwrap(), 1.5);

    assert!(memory.write_double(BASE + 32, -0.125).unwrap());
    assert_eq!(memory.read_double(BASE + 32).unwrap(), -0.125);

    assert_eq!(target.peek(BASE + 4, 4), Some(123_456i32.to_le_bytes().to_vec()));
    assert_eq!(bridge.depth().unwrap(), 0);
}

#[test]
fn test_strings_and_bytes() {
    let (bridge, _target) = setup();
    let memory = MemoryAccess::new(bridge.clone());

    assert!(memory.write_string(BASE + 0x40, "player one", false).unwrap());
    assert_eq!(memory.read_string(BASE + 0x40, 64, false).unwrap(), "player one");
    assert_eq!(memory.read_string(BASE + 0x40, 6, false).unwrap(), "player");

    assert!(memory.write_string(BASE + 0x80, "wide", true).unwrap());
    assert_eq!(memory.read_string(BASE + 0x80, 32, true).unwrap(), "wide");

    assert!(memory.write_bytes(BASE + 0x100, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap());
    assert_eq!(
        memory.read_bytes(BASE + 0x100, 4).unwrap(),
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );
    assert_eq!(bridge.depth().unwrap(), 0);
}

#[test]
fn test_local_accessors_use_local_memory() {
    let (bridge, target) = setup();
    let local = MemoryAccess::local(bridge.clone());
    assert!(local.is_local());

    assert!(local.write_integer(BASE, 77).unwrap());
    assert_eq!(local.read_integer(BASE).unwrap(), 77);
    assert_eq!(target.peek(BASE, 4), Some(vec![0; 4]));

    let remote = MemoryAccess::new(bridge);
    assert_eq!(remote.read_integer(BASE).unwrap(), 0);
}

#[test]
fn test_unmapped_addresses() {
    let (bridge, _target) = setup();
    let memory = MemoryAccess::new(bridge.clone());

    assert!(matches!(
        memory.read_integer(0x10),
        Err(BridgeError::CallFailed { .. })
    ));
    assert!(!memory.write_integer(0x10, 1).unwrap());
    assert!(!memory.write_qword(BASE + 0x1FC, 1).unwrap());
    assert_eq!(bridge.depth().unwrap(), 0);
}

#[test]
fn test_invalid_payloads_never_reach_the_engine() {
    let bridge = Bridge::sim();
    let memory = MemoryAccess::new(bridge);
    assert!(matches!(
        memory.write_bytes(BASE, &[]),
        Err(BridgeError::InvalidArgument(_))
    ));
    assert!(matches!(
        memory.read_bytes(BASE, 0),
        Err(BridgeError::InvalidArgument(_))
    ));
    assert!(matches!(
        memory.read_string(BASE, 0, false),
        Err(BridgeError::InvalidArgument(_))
    ));
}

#[test]
fn test_missing_target_reports_symbol() {
    let memory = MemoryAccess::new(Bridge::sim());
    assert_eq!(
        memory.read_byte(BASE).unwrap_err(),
        BridgeError::symbol_not_found("readByte")
    );
}
