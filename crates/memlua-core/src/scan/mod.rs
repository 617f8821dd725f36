//! Two-phase memory scan sessions
//!
//! A [`ScanSession`] drives one remote memscan object through first scan,
//! any number of next scans, and result retrieval. Progress and completion
//! arrive as [`ScanEvent`]s.

mod config;
mod events;
mod session;

pub use config::{
    validate_protection, AlignmentType, Rounding, ScanConfiguration, ScanConfigurationBuilder,
    ScanType, ValueType, DEFAULT_PROTECTION,
};
pub use events::{ScanEvent, ScanEvents, ScanProgress};
pub use session::{ScanSession, SessionState};
