//! The dispatch core.
//!
//! - [`DispatchWorker`]: per-queue scheduling loop — earliest-due
//!   selection, pacing, window gating, daily cap
//! - [`MessageChain`]: dependent materialization and cancellation
//!   driven by parent outcomes

mod chain;
mod worker;

pub use chain::MessageChain;
pub use worker::{next_action, DispatchState, DispatchWorker, TickAction};
