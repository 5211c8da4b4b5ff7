//! ogn-core: Pure decode + tracking library for the OGN/APRS position feed.
//!
//! No async, no I/O, just parsing and state. The async feed client, fan-out
//! and web relay live in `ogn-server`.

pub mod codec;
pub mod config;
pub mod decode;
pub mod framing;
pub mod tracker;
pub mod types;

// Re-export commonly used types at crate root
pub use decode::{decode, try_decode};
pub use framing::{is_comment, login_line, LineFramer};
pub use tracker::{TrackEvent, TrackedAircraft, Tracker};
pub use types::*;
