//! Pattern scans through the remote AOB entry points

use memlua_core::aob::Alignment;
use memlua_core::{
    AobPattern, AobScanOptions, AobScanner, Bridge, BridgeError, BridgeHandle, Protection, Region,
    Target,
};

fn game() -> (BridgeHandle, Target) {
    let bridge = Bridge::sim();
    let target = Target::new();

    let mut code = vec![0xCC; 0x200];
    code[0x100..0x107].copy_from_slice(&[0x48, 0x8B, 0x05, 0x11, 0x22, 0x33, 0x44]);
    code[0x180..0x183].copy_from_slice(&[0x90, 0x90, 0xC3]);
    target
        .map(
            Region::new(0x1000_0000, code)
                .with_protection(Protection::READ_EXECUTE)
                .with_module("game.exe"),
        )
        .unwrap();

    let mut data = vec![0u8; 0x100];
    data[0x10..0x13].copy_from_slice(&[0x90, 0x90, 0xC3]);
    data[0x21..0x24].copy_from_slice(&[0x90, 0x90, 0xC3]);
    target.map(Region::new(0x2000_0000, data)).unwrap();

    target.install(&bridge).unwrap();
    (bridge, target)
}

#[test]
fn test_single_match_with_wildcards() {
    let (bridge, _target) = game();
    let scanner = AobScanner::new(bridge.clone());

    let hits = scanner
        .scan_str("48 8B 05 ?? ?? ?? ??", &AobScanOptions::new())
        .unwrap();
    assert_eq!(hits.addresses(), vec![0x1000_0100]);
    assert_eq!(hits.unique().unwrap().address(), 0x1000_0100);
    assert_eq!(bridge.depth().unwrap(), 0);
}

#[test]
fn test_fixture_at_low_address() {
    let mut fixture = vec![0u8; 0x200];
    fixture[0x100..0x107].copy_from_slice(&[0x48, 0x8B, 0x05, 0x01, 0x02, 0x03, 0x04]);
    let bridge = Bridge::sim();
    Target::from_bytes(0, fixture).unwrap().install(&bridge).unwrap();

    let hits = AobScanner::new(bridge)
        .scan_str("48 8B 05 ?? ?? ?? ??", &AobScanOptions::new())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits.first().unwrap().address(), 0x100);
}

#[test]
fn test_multiple_matches_in_order() {
    let (bridge, _target) = game();
    let hits = AobScanner::new(bridge)
        .scan_str("90 90 C3", &AobScanOptions::new())
        .unwrap();
    assert_eq!(
        hits.addresses(),
        vec![0x1000_0180, 0x2000_0010, 0x2000_0021]
    );
    assert!(matches!(hits.unique(), Err(BridgeError::AmbiguousResult(_))));
}

#[test]
fn test_protection_and_alignment_filters() {
    let (bridge, _target) = game();
    let scanner = AobScanner::new(bridge);

    let writable = scanner
        .scan_str("90 90 C3", &AobScanOptions::new().protection("+W"))
        .unwrap();
    assert_eq!(writable.addresses(), vec![0x2000_0010, 0x2000_0021]);

    let aligned = scanner
        .scan_str(
            "90 90 C3",
            &AobScanOptions::new().alignment(Alignment::Aligned(0x10)),
        )
        .unwrap();
    assert_eq!(aligned.addresses(), vec![0x1000_0180, 0x2000_0010]);

    let digits = scanner
        .scan_str(
            "90 90 C3",
            &AobScanOptions::new()
                .protection("+W")
                .alignment(Alignment::LastDigits("21".to_string())),
        )
        .unwrap();
    assert_eq!(digits.addresses(), vec![0x2000_0021]);
}

#[test]
fn test_unique_and_module_scans() {
    let (bridge, _target) = game();
    let scanner = AobScanner::new(bridge);
    let pattern = AobPattern::parse("90 90 C3").unwrap();

    let first = scanner
        .scan(&pattern, &AobScanOptions::new().unique(true))
        .unwrap();
    assert_eq!(first.addresses(), vec![0x1000_0180]);

    let in_module = scanner
        .find_unique(&pattern, &AobScanOptions::new().module("GAME.EXE"))
        .unwrap();
    assert_eq!(in_module.address(), 0x1000_0180);

    let missing = scanner
        .find_unique(&pattern, &AobScanOptions::new().module("other.dll"))
        .unwrap_err();
    assert!(matches!(missing, BridgeError::AmbiguousResult(_)));
}

#[test]
fn test_no_match_is_empty() {
    let (bridge, _target) = game();
    let hits = AobScanner::new(bridge.clone())
        .scan_str("DE AD BE EF", &AobScanOptions::new())
        .unwrap();
    assert!(hits.is_empty());
    assert_eq!(bridge.depth().unwrap(), 0);
}

#[test]
fn test_malformed_pattern_is_rejected_locally() {
    let bridge = Bridge::sim();
    let err = AobScanner::new(bridge)
        .scan_str("48 8G", &AobScanOptions::new())
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
}

#[test]
fn test_scan_follows_target_writes() {
    let (bridge, target) = game();
    assert!(target.poke(0x2000_0080, &[0xDE, 0xAD, 0xBE, 0xEF]));
    let hits = AobScanner::new(bridge)
        .scan_str("de ad be ef", &AobScanOptions::new())
        .unwrap();
    assert_eq!(hits.addresses(), vec![0x2000_0080]);
}
