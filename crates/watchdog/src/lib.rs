//! Stage watchdog — the timeout and cancellation fabric for one turn.
//!
//! Each in-flight turn owns exactly one [`StageWatchdog`]. It hands every
//! stage a cancellation token derived from the request-wide token, races
//! stage work against the clamped stage budget, records durations, and emits
//! lifecycle trace events. Cancellation is cooperative: network stages are
//! expected to thread the token into their I/O.

mod budgets;
mod watchdog;

pub use budgets::StageBudgets;
pub use watchdog::{AbortHook, Fallback, StageOutcome, StageWatchdog};
