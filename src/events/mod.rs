//! Live run progress for observers.
//!
//! - `EventHub`: per-run history and fan-out
//! - `EventStream`: text event-stream framing with keep-alives

mod hub;
mod stream;

pub use hub::{EventHub, RunEmitter, Subscription};
pub use stream::{EventStream, data_frame, keepalive_frame};
