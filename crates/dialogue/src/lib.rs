//! Dialogue management: one finite-state machine per session, plus the
//! process-wide registry that owns them.
//!
//! The FSM is synchronous and lock-guarded; only one turn may run per
//! session at a time. The registry creates machines lazily, serialises
//! turns with per-session permits, and sweeps stale sessions in the
//! background.

mod fsm;
mod registry;

pub use fsm::{
    allowed, DialogueFsm, FsmConfig, FsmMetrics, HistoryEntry, HistoryRole, TransitionEvent,
};
pub use registry::{RegistryConfig, SessionRegistry, TurnGuard};
