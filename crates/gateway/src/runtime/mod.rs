//! Runtime services behind the HTTP surface: the agent registry,
//! per-thread turn locks, and cancellation tokens.

pub mod cancel;
pub mod registry;
pub mod turn_lock;

pub use cancel::CancelMap;
pub use registry::{AgentInfo, AgentRegistry, Instance};
pub use turn_lock::{TurnBusy, TurnLockMap};
