//! Interval history for pingtrail.
//!
//! Holds the debounced UP/DOWN intervals in memory, most recent first.

mod models;
mod store;

pub use models::*;
pub use store::*;
