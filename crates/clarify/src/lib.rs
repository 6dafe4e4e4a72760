//! Clarification policy: decide when a turn should end in a question
//! instead of an answer, and produce the question.

mod policy;
mod rephrase;
mod templates;

pub use policy::{
    Clarification, ClarificationPolicy, ClarifyInput, ClarifyPriority, CONFIDENCE_CLARIFY,
    CONFIDENCE_HIGH, CONFIDENCE_OK, CONFIDENCE_REJECT,
};
pub use rephrase::rephrase;
pub use templates::{intent_label, slot_label, ClarificationKind};
