//! Scan progress and completion events
//!
//! Events are produced by callbacks the engine invokes on the bridge
//! thread and fanned out to crossbeam channels, so subscribers may live
//! on other threads. The last progress report and the completion flag can
//! also be polled.

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Progress report of a running scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanProgress {
    /// Bytes to scan
    pub total: u64,
    /// Bytes scanned so far
    pub scanned: u64,
    /// Matches so far
    pub found: u64,
}

impl ScanProgress {
    /// Completed fraction in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.scanned as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Event emitted by a scan session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanEvent {
    /// Periodic progress report
    Progress(ScanProgress),
    /// The scan finished
    Completed,
}

#[derive(Default)]
struct EventState {
    last_progress: Option<ScanProgress>,
    complete: bool,
    subscribers: Vec<Sender<ScanEvent>>,
}

impl EventState {
    fn broadcast(&mut self, event: ScanEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

/// Shared event hub of one session
#[derive(Clone, Default)]
pub struct ScanEvents {
    state: Arc<Mutex<EventState>>,
}

impl ScanEvents {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        let (tx, rx) = unbounded();
        self.state.lock().subscribers.push(tx);
        rx
    }

    /// Last progress report of the current scan
    pub fn progress(&self) -> Option<ScanProgress> {
        self.state.lock().last_progress
    }

    /// True once the current scan reported completion
    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub(crate) fn emit_progress(&self, progress: ScanProgress) {
        let mut state = self.state.lock();
        state.last_progress = Some(progress);
        state.broadcast(ScanEvent::Progress(progress));
    }

    pub(crate) fn emit_completed(&self) {
        let mut state = self.state.lock();
        state.complete = true;
        state.broadcast(ScanEvent::Completed);
    }

    /// Forget the previous scan before a new one starts
    pub(crate) fn restart(&self) {
        let mut state = self.state.lock();
        state.complete = false;
        state.last_progress = None;
    }
}

impl std::fmt::Debug for ScanEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScanEvents")
            .field("last_progress", &state.last_progress)
            .field("complete", &state.complete)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fraction() {
        let p = ScanProgress {
            total: 200,
            scanned: 50,
            found: 3,
        };
        assert_eq!(p.fraction(), 0.25);
        assert_eq!(ScanProgress::default().fraction(), 0.0);
    }

    #[test]
    fn test_subscribers_receive_events_in_order() {
        let events = ScanEvents::new();
        let rx = events.subscribe();
        let progress = ScanProgress {
            total: 10,
            scanned: 10,
            found: 1,
        };
        events.emit_progress(progress);
        events.emit_completed();

        assert_eq!(rx.try_recv().unwrap(), ScanEvent::Progress(progress));
        assert_eq!(rx.try_recv().unwrap(), ScanEvent::Completed);
        assert_eq!(events.progress(), Some(progress));
        assert!(events.is_complete());

        events.restart();
        assert!(!events.is_complete());
        assert_eq!(events.progress(), None);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let events = ScanEvents::new();
        drop(events.subscribe());
        let _kept = events.subscribe();
        events.emit_completed();
        assert_eq!(events.subscriber_count(), 1);
    }

    #[test]
    fn test_subscriber_on_another_thread() {
        let events = ScanEvents::new();
        let rx = events.subscribe();
        let waiter = thread::spawn(move || rx.recv().unwrap());
        events.emit_completed();
        assert_eq!(waiter.join().unwrap(), ScanEvent::Completed);
    }
}
