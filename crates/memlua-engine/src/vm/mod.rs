//! In-process engine
//!
//! `SimState` follows the same stack calling convention as the native
//! binding so the layers above can run without a shared library, in tests
//! and against the simulated target.

mod state;
mod table;

pub use state::SimState;
