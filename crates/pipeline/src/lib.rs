//! Pipeline orchestrator and HTTP surface.
//!
//! Composes the watchdog, preprocessor, dialogue manager, clarification
//! policy and the external providers into one deterministic turn, in both
//! blocking and streaming form.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod fallback;
pub mod orchestrator;
pub mod state;
pub mod stream;

pub use orchestrator::process;
pub use state::AppState;
pub use stream::process_stream;
