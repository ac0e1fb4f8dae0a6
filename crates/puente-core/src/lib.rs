//! Foundational low-level utilities shared across Puente crates.
//!
//! Provides crash-safe file-write helpers and the millisecond clock behind
//! spillover identifiers and sidecar request ids.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{write_bytes_atomic, write_text_atomic};
pub use time_utils::current_unix_timestamp_ms;
