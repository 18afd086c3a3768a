//! campd — time-windowed outbound campaign dispatcher.
//!
//! The engine takes batches of outbound messages and:
//! - delivers them only inside configured daily send windows
//!   (including windows that cross midnight)
//! - paces sends at a configured minimum interval per queue
//! - tracks each message through an acknowledgment-driven lifecycle
//!   (scheduled → sent → delivered → read)
//! - supports message chains, where a follow-up is scheduled relative
//!   to when its parent was actually sent
//! - tracks per-batch counters and detects batch completion
//!
//! Storage, the messaging channel, and the clock are injected trait
//! objects, so the scheduling core runs unchanged against the bundled
//! in-memory store and mock channel or against real collaborators.

pub mod ack;
pub mod bootstrap;
pub mod campaign;
pub mod channel;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod schedule;
pub mod store;
pub mod telemetry;
