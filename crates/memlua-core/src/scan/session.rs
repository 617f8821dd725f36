//! ScanSession: lifecycle of one remote memscan object
//!
//! ```text
//! Created --first_scan--> FirstScanDone --next_scan--> NextScanDone --next_scan--> ...
//!    ^                          |                            |
//!    +----------reset-----------+----------------------------+
//! any state --dispose--> Disposed
//! ```

use memlua_sdk::{BridgeError, BridgeResult, LuaStack, ValueKind};

use super::config::{ScanConfiguration, ScanType};
use super::events::{ScanEvent, ScanEvents, ScanProgress};
use crate::aob::{address_at, MatchSet};
use crate::bridge::BridgeHandle;
use crate::marshal::{self, ArgList, ObjectRef, StackGuard};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No scan performed since creation or the last reset
    Created,
    /// First scan issued
    FirstScanDone,
    /// At least one next scan issued
    NextScanDone,
    /// Remote object destroyed
    Disposed,
}

impl SessionState {
    /// A scan has been issued
    pub fn is_started(self) -> bool {
        matches!(self, SessionState::FirstScanDone | SessionState::NextScanDone)
    }
}

/// Stateful two-phase scan over one remote memscan object
#[derive(Debug)]
pub struct ScanSession {
    bridge: BridgeHandle,
    object: Option<ObjectRef>,
    handle: usize,
    state: SessionState,
    events: ScanEvents,
}

impl ScanSession {
    /// Create the remote memscan object and bind its progress and
    /// completion callbacks
    pub fn create(bridge: BridgeHandle) -> BridgeResult<Self> {
        let (object, handle) = bridge.with_stack(|s| {
            marshal::call_global(s, "createMemScan", &ArgList::new(), capture_object)
        })?;

        let session = Self {
            bridge,
            object: Some(object),
            handle,
            state: SessionState::Created,
            events: ScanEvents::new(),
        };
        session.bind_callbacks()?;
        log::debug!("memscan {:x} created", handle);
        Ok(session)
    }

    fn bind_callbacks(&self) -> BridgeResult<()> {
        let progress_name = format!("memscan_progress_{:x}", self.handle);
        let done_name = format!("memscan_done_{:x}", self.handle);

        let sink = self.events.clone();
        self.bridge.register_raw(&progress_name, move |s| {
            // argument 1 is the memscan itself
            let progress = ScanProgress {
                total: s.to_integer(2) as u64,
                scanned: s.to_integer(3) as u64,
                found: s.to_integer(4) as u64,
            };
            log::trace!("scan progress {:?}", progress);
            sink.emit_progress(progress);
            Ok(0)
        })?;

        let sink = self.events.clone();
        self.bridge.register_raw(&done_name, move |_| {
            log::trace!("scan done");
            sink.emit_completed();
            Ok(0)
        })?;

        let object = self.live_object()?;
        self.bridge.with_stack(|s| {
            let mut guard = StackGuard::new(s);
            object.push(&mut *guard);
            guard.get_global(&progress_name);
            guard.set_field(-2, "OnGuiUpdate");
            guard.get_global(&done_name);
            guard.set_field(-2, "OnScanDone");
            Ok(())
        })
    }

    /// Identity of the remote object
    pub fn handle(&self) -> usize {
        self.handle
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Event hub of this session
    pub fn events(&self) -> &ScanEvents {
        &self.events
    }

    /// Receive progress and completion events
    pub fn subscribe(&self) -> crossbeam::channel::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Last progress report
    pub fn progress(&self) -> Option<ScanProgress> {
        self.events.progress()
    }

    /// True once the current scan reported completion
    pub fn is_complete(&self) -> bool {
        self.events.is_complete()
    }

    /// Arguments of `firstScan`, in wire order
    pub fn first_scan_args(config: &ScanConfiguration) -> ArgList {
        ArgList::new()
            .push(config.scan_type.code())
            .push(config.value_type.code())
            .push(config.rounding.code())
            .push(&config.value)
            .push(&config.value2)
            .push(config.start_address)
            .push(config.end_address)
            .push(&config.protection_flags)
            .push(config.alignment_type.code())
            .push(&config.alignment_param)
            .push(config.is_hex)
            .push(true)
            .push(config.is_utf16)
            .push(config.is_case_sensitive)
    }

    /// Arguments of `nextScan`, in wire order
    pub fn next_scan_args(config: &ScanConfiguration) -> ArgList {
        ArgList::new()
            .push(config.scan_type.code())
            .push(config.rounding.code())
            .push(&config.value)
            .push(&config.value2)
            .push(config.is_hex)
            .push(true)
            .push(config.is_utf16)
            .push(config.is_case_sensitive)
            .push(config.is_percentage)
    }

    /// Start the first scan
    pub fn first_scan(&mut self, config: &ScanConfiguration) -> BridgeResult<()> {
        self.live_object()?;
        if self.state != SessionState::Created {
            return Err(BridgeError::PhaseViolation(
                "first scan already performed, reset the session first".to_string(),
            ));
        }
        if config.scan_type.needs_previous() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} scan needs a previous scan",
                config.scan_type
            )));
        }
        config.validate()?;

        self.events.restart();
        self.call("firstScan", &Self::first_scan_args(config))?;
        self.state = SessionState::FirstScanDone;
        Ok(())
    }

    /// Refine the previous results
    pub fn next_scan(&mut self, config: &ScanConfiguration) -> BridgeResult<()> {
        self.live_object()?;
        if !self.state.is_started() {
            return Err(BridgeError::PhaseViolation(
                "no first scan performed".to_string(),
            ));
        }
        if config.scan_type == ScanType::Unknown {
            return Err(BridgeError::InvalidArgument(
                "Unknown scan is only valid as a first scan".to_string(),
            ));
        }
        config.validate()?;

        self.events.restart();
        self.call("nextScan", &Self::next_scan_args(config))?;
        self.state = SessionState::NextScanDone;
        Ok(())
    }

    /// Block until the remote scan finishes
    pub fn wait_for_completion(&self) -> BridgeResult<()> {
        self.require_started()?;
        self.call("waitTillDone", &ArgList::new())
    }

    /// Snapshot of the current found list
    pub fn results(&self) -> BridgeResult<MatchSet> {
        self.require_started()?;
        let object = self.live_object()?;
        let results = self.bridge.with_stack(|s| {
            marshal::call_method(
                s,
                object,
                "getAttachedFoundlist",
                &ArgList::new(),
                read_found_list,
            )
        })?;
        log::debug!("memscan {:x}: {} results", self.handle, results.len());
        Ok(results)
    }

    /// Forget the results and return to `Created`
    pub fn reset(&mut self) -> BridgeResult<()> {
        self.live_object()?;
        self.call("newScan", &ArgList::new())?;
        self.events.restart();
        self.state = SessionState::Created;
        Ok(())
    }

    /// Destroy the remote object. Errors are logged and swallowed;
    /// calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.state == SessionState::Disposed {
            return;
        }
        self.state = SessionState::Disposed;
        let Some(object) = self.object.take() else {
            return;
        };

        let outcome = self.bridge.with_stack(|s| {
            let destroyed = marshal::call_method(s, object, "destroy", &ArgList::new(), |_, _| Ok(()));
            object.release(s);
            destroyed
        });
        match outcome {
            Ok(()) => log::debug!("memscan {:x} destroyed", self.handle),
            Err(e) => log::warn!("memscan {:x}: destroy failed: {}", self.handle, e),
        }
    }

    fn live_object(&self) -> BridgeResult<ObjectRef> {
        match (self.state, self.object) {
            (SessionState::Disposed, _) | (_, None) => {
                Err(BridgeError::PhaseViolation("session disposed".to_string()))
            }
            (_, Some(object)) => Ok(object),
        }
    }

    fn require_started(&self) -> BridgeResult<()> {
        self.live_object()?;
        if self.state.is_started() {
            Ok(())
        } else {
            Err(BridgeError::PhaseViolation("no scan started".to_string()))
        }
    }

    fn call(&self, method: &str, args: &ArgList) -> BridgeResult<()> {
        let object = self.live_object()?;
        self.bridge
            .with_stack(|s| marshal::call_method(s, object, method, args, |_, _| Ok(())))
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn capture_object(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<(ObjectRef, usize)> {
    match stack.value_kind(index) {
        ValueKind::Table | ValueKind::Userdata => {}
        other => {
            return Err(BridgeError::TypeMismatch {
                expected: "memscan object".to_string(),
                got: other.name().to_string(),
            })
        }
    }
    let handle = stack.to_pointer(index);
    stack.push_value(index);
    let object = ObjectRef::capture(stack)
        .ok_or_else(|| BridgeError::call_failed("createMemScan", "returned nil"))?;
    Ok((object, handle))
}

fn read_found_list(stack: &mut dyn LuaStack, index: i32) -> BridgeResult<MatchSet> {
    match stack.value_kind(index) {
        ValueKind::Table | ValueKind::Userdata => {}
        other => {
            return Err(BridgeError::TypeMismatch {
                expected: "found list".to_string(),
                got: other.name().to_string(),
            })
        }
    }
    let mut guard = StackGuard::new(stack);
    guard.get_field(index, "Count");
    let count = guard.to_integer(-1).max(0);
    guard.pop(1);

    guard.get_field(index, "Address");
    let addresses = guard.top();
    let mut found = Vec::with_capacity(count.min(4096) as usize);
    for i in 0..count {
        guard.push_integer(i);
        guard.get_table(addresses);
        let address = address_at(&mut *guard, -1);
        guard.pop(1);
        match address {
            Some(a) => found.push(a),
            None => {
                return Err(BridgeError::TypeMismatch {
                    expected: "address".to_string(),
                    got: format!("found list item {}", i),
                })
            }
        }
    }
    Ok(MatchSet::from_addresses(found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use memlua_sdk::HostFunction;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Fake memscan recording the argument count of each method call
    fn install_recorder(bridge: &BridgeHandle) -> Rc<RefCell<Vec<(String, i32)>>> {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = calls.clone();
        bridge
            .register_raw("createMemScan", move |s| {
                s.create_table(0, 0);
                for method in ["firstScan", "nextScan", "waitTillDone", "newScan", "destroy"] {
                    let log = log.clone();
                    s.push_host_function(Rc::new(HostFunction::new(method, move |s| {
                        log.borrow_mut().push((method.to_string(), s.top()));
                        Ok(0)
                    })));
                    s.set_field(-2, method);
                }
                s.push_host_function(Rc::new(HostFunction::new("getAttachedFoundlist", |s| {
                    s.create_table(0, 0);
                    s.push_integer(2);
                    s.set_field(-2, "Count");
                    s.create_table(0, 0);
                    s.push_integer(0);
                    s.push_str("1000");
                    s.set_table(-3);
                    s.push_integer(1);
                    s.push_integer(0x2000);
                    s.set_table(-3);
                    s.set_field(-2, "Address");
                    Ok(1)
                })));
                s.set_field(-2, "getAttachedFoundlist");
                Ok(1)
            })
            .unwrap();
        calls
    }

    fn exact(value: &str) -> ScanConfiguration {
        ScanConfiguration::builder().value(value).build().unwrap()
    }

    #[test]
    fn test_argument_counts_include_receiver() {
        let bridge = Bridge::sim();
        let calls = install_recorder(&bridge);
        let mut session = ScanSession::create(bridge.clone()).unwrap();

        session.first_scan(&exact("100")).unwrap();
        session.next_scan(&exact("101")).unwrap();
        session.wait_for_completion().unwrap();

        let calls = calls.borrow();
        assert_eq!(calls[0], ("firstScan".to_string(), 15));
        assert_eq!(calls[1], ("nextScan".to_string(), 10));
        assert_eq!(calls[2], ("waitTillDone".to_string(), 1));
        assert_eq!(bridge.depth().unwrap(), 0);
    }

    #[test]
    fn test_callbacks_bound_under_handle_names() {
        let bridge = Bridge::sim();
        install_recorder(&bridge);
        let session = ScanSession::create(bridge.clone()).unwrap();
        let callbacks = bridge.callbacks();
        assert!(callbacks.contains(&format!("memscan_progress_{:x}", session.handle())));
        assert!(callbacks.contains(&format!("memscan_done_{:x}", session.handle())));
    }

    #[test]
    fn test_phase_ordering() {
        let bridge = Bridge::sim();
        install_recorder(&bridge);
        let mut session = ScanSession::create(bridge).unwrap();

        assert_eq!(
            session.next_scan(&exact("1")),
            Err(BridgeError::PhaseViolation("no first scan performed".into()))
        );
        assert!(matches!(session.results(), Err(BridgeError::PhaseViolation(_))));

        session.first_scan(&exact("1")).unwrap();
        assert_eq!(session.state(), SessionState::FirstScanDone);
        assert!(matches!(
            session.first_scan(&exact("1")),
            Err(BridgeError::PhaseViolation(_))
        ));

        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::Created);
        assert!(matches!(
            session.next_scan(&exact("1")),
            Err(BridgeError::PhaseViolation(_))
        ));
    }

    #[test]
    fn test_results_read_count_and_addresses() {
        let bridge = Bridge::sim();
        install_recorder(&bridge);
        let mut session = ScanSession::create(bridge).unwrap();
        session.first_scan(&exact("5")).unwrap();
        assert_eq!(session.results().unwrap().addresses(), vec![0x1000, 0x2000]);
    }

    #[test]
    fn test_dispose_is_idempotent_and_final() {
        let bridge = Bridge::sim();
        let calls = install_recorder(&bridge);
        let mut session = ScanSession::create(bridge.clone()).unwrap();
        session.dispose();
        session.dispose();
        assert_eq!(session.state(), SessionState::Disposed);
        assert_eq!(
            calls.borrow().iter().filter(|(m, _)| m == "destroy").count(),
            1
        );
        assert_eq!(
            session.first_scan(&exact("1")),
            Err(BridgeError::PhaseViolation("session disposed".into()))
        );
        drop(session);
        assert_eq!(
            calls.borrow().iter().filter(|(m, _)| m == "destroy").count(),
            1
        );
    }

    #[test]
    fn test_drop_destroys_remote_object() {
        let bridge = Bridge::sim();
        let calls = install_recorder(&bridge);
        drop(ScanSession::create(bridge).unwrap());
        assert!(calls.borrow().iter().any(|(m, _)| m == "destroy"));
    }

    #[test]
    fn test_missing_create_function() {
        let bridge = Bridge::sim();
        let err = ScanSession::create(bridge).unwrap_err();
        assert_eq!(err, BridgeError::symbol_not_found("createMemScan"));
    }

    #[test]
    fn test_scan_types_checked_against_phase() {
        let bridge = Bridge::sim();
        install_recorder(&bridge);
        let mut session = ScanSession::create(bridge).unwrap();
        let increased = ScanConfiguration::builder()
            .scan_type(ScanType::IncreasedValue)
            .build()
            .unwrap();
        assert!(matches!(
            session.first_scan(&increased),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_found_list_with_bogus_count_fails_cleanly() {
        Bridge::sim()
            .with_stack(|s| {
                s.create_table(0, 2);
                let list = s.top();
                s.push_integer(i64::MAX);
                s.set_field(list, "Count");
                s.create_table(1, 0);
                s.push_integer(0);
                s.push_str("1000");
                s.set_table(-3);
                s.set_field(list, "Address");

                let err = read_found_list(s, list).unwrap_err();
                assert!(matches!(err, BridgeError::TypeMismatch { .. }));
                assert_eq!(s.top(), list);
                Ok(())
            })
            .unwrap();
    }
}
