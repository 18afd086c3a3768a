//! Engine assembly.
//!
//! Wires configuration, storage, channel, and clock into the running
//! set of tasks: one dispatch worker per queue, the ack processor, and
//! the maintenance sweep — plus graceful shutdown and the boundary
//! event bus.

mod engine;
mod events;
mod server;
mod shutdown;

pub use engine::{Engine, EngineState};
pub use events::{EngineEvent, EventBus};
pub use server::Server;
pub use shutdown::{Shutdown, ShutdownState};
