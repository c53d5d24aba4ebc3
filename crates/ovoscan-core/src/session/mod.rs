//! Session module - lifecycle of one submitted image batch
//!
//! Key components:
//!
//! - `Session`/`Phase`: the record and its state machine
//! - `SessionStore`: the only shared mutable table, with eviction
//! - `SessionWriter`: the single-writer lease held by the job runner
//!
//! # State machine
//!
//! ```text
//! Pending --(runner starts)--> Running --(all items done)--> Complete
//!    \                               \--(fatal runner error)--> Failed
//!     \--(cannot start)------------------------------------> Failed
//! ```
//!
//! `Complete` and `Failed` are terminal; the store rejects any further
//! change until the session is evicted.

mod store;
mod types;

pub use store::{SessionStore, SessionWriter};
pub use types::{Phase, Session, SessionId};
