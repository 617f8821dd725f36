//! Tests against a real engine library
//!
//! Ignored by default. Run with the path of a Lua 5.3 / 5.4 shared library:
//!
//! ```text
//! MEMLUA_LUA_LIB=/usr/lib/x86_64-linux-gnu/liblua5.3.so cargo test -- --ignored
//! ```

use std::cell::Cell;
use std::rc::Rc;

use memlua_engine::{LuaApi, LuaState};
use memlua_sdk::{collect_bytes, push_byte_table, BridgeError, HostFunction, LuaStack, ValueKind};

fn engine() -> LuaState {
    let path = std::env::var("MEMLUA_LUA_LIB").expect("MEMLUA_LUA_LIB must point at a Lua library");
    let api = LuaApi::load(path).expect("engine library should load");
    LuaState::new_owned(api, true).expect("state should be created")
}

#[test]
#[ignore]
fn test_native_do_string_and_globals() {
    let mut lua = engine();
    lua.do_string("answer = 6 * 7").unwrap();
    assert_eq!(lua.get_global("answer"), ValueKind::Number);
    assert_eq!(lua.to_integer(-1), 42);
    lua.pop(1);
    assert_eq!(lua.top(), 0);
}

#[test]
#[ignore]
fn test_native_host_function_round_trip() {
    let mut lua = engine();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let add = Rc::new(HostFunction::new("add", move |stack| {
        counter.set(counter.get() + 1);
        let sum = stack.to_integer(1) + stack.to_integer(2);
        stack.push_integer(sum);
        Ok(1)
    }));
    lua.register_function("add", add.clone());

    lua.do_string("result = add(40, 2)").unwrap();
    lua.get_global("result");
    assert_eq!(lua.to_integer(-1), 42);
    assert_eq!(calls.get(), 1);
}

#[test]
#[ignore]
fn test_native_host_error_is_catchable() {
    let mut lua = engine();
    let fail = Rc::new(HostFunction::new("fail", |_| Err(BridgeError::from("nope"))));
    lua.register_function("fail", fail.clone());

    lua.do_string("ok, msg = pcall(fail)").unwrap();
    lua.get_global("ok");
    assert!(!lua.to_bool(-1));
    lua.get_global("msg");
    assert!(lua.to_string_lossy(-1).contains("nope"));
}

#[test]
#[ignore]
fn test_native_byte_tables() {
    let mut lua = engine();
    push_byte_table(&mut lua, &[1, 2, 3]);
    lua.set_global("bytes");
    lua.do_string("bytes[4] = #bytes + 1").unwrap();
    lua.get_global("bytes");
    assert_eq!(collect_bytes(&mut lua, -1), vec![1, 2, 3, 4]);
}

#[test]
#[ignore]
fn test_native_syntax_error_is_reported() {
    let mut lua = engine();
    match lua.do_string("this is not valid") {
        Err(BridgeError::CallFailed { symbol, .. }) => assert_eq!(symbol, "<chunk>"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(lua.top(), 0);
}
