//! Storage module for Berth
//!
//! - `json`: JSON config store and manifest files
//!
//! Every write goes to a temp file and is renamed into place, so another
//! worker process never reads a half-written file.

mod json;

pub use json::{write_atomic, JsonStore};
