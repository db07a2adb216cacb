//! Persistence of the interval history to a JSON snapshot file.
//!
//! The exporter periodically overwrites the file with the current history;
//! restore loads it back once at start-up.

mod export;
mod restore;

pub use export::*;
pub use restore::*;
