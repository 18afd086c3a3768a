//! Send-time computation.
//!
//! Pure time math for the dispatcher:
//! - [`SendWindow`]: daily clock-time interval during which sends are
//!   permitted, including windows that cross midnight
//! - [`ChainDelay`] / [`compute_send_at`]: relative-delay to absolute
//!   send-instant conversion, clamped into the next window opening and
//!   bounded by a maximum-wait ceiling

mod delay;
mod window;

pub use delay::{compute_send_at, ChainDelay};
pub use window::{SendWindow, WindowBoundary, WindowError};
