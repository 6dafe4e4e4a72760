//! The per-session dialogue state machine.
//!
//! States and the allowed-transition table are the source of truth for the
//! whole pipeline: the orchestrator never moves a session except through
//! [`DialogueFsm::transition`] (or the explicitly-forced variant used by the
//! safety timer and administrative resets).

use std::collections::{HashMap, VecDeque};
use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use charla_domain::DialogueState as S;
use charla_domain::{Action, DialogueState, Error, ErrorCode, Result, Stage, TraceEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether `from -> to` is a legal dialogue transition.
pub const fn allowed(from: DialogueState, to: DialogueState) -> bool {
    matches!(
        (from, to),
        (S::Idle, S::Preprocessing | S::ErrorDegraded)
            | (S::Preprocessing, S::Analyzing | S::ErrorDegraded | S::Timeout)
            | (
                S::Analyzing,
                S::Retrieving
                    | S::Generating
                    | S::Clarifying
                    | S::Fallback
                    | S::ErrorDegraded
                    | S::Timeout
            )
            | (
                S::Retrieving,
                S::Generating | S::Clarifying | S::Fallback | S::ErrorDegraded | S::Timeout
            )
            | (
                S::Generating,
                S::Success | S::Clarifying | S::Fallback | S::ErrorDegraded | S::Timeout
            )
            | (
                S::Clarifying,
                S::Idle | S::Analyzing | S::Clarifying | S::Fallback | S::Timeout
            )
            | (S::Success, S::Idle)
            | (S::Fallback, S::Idle | S::Success)
            | (S::ErrorDegraded, S::Idle)
            | (S::Timeout, S::Idle | S::Fallback)
    )
}

/// States a finished turn may rest in; the next turn re-enters via idle.
const fn is_terminal(state: DialogueState) -> bool {
    matches!(state, S::Success | S::Fallback | S::ErrorDegraded | S::Timeout)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supporting types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// FSM tuning, resolved once from the config tree.
#[derive(Debug, Clone)]
pub struct FsmConfig {
    pub max_clarification_attempts: u32,
    pub confidence_ok: f32,
    pub confidence_clarify: f32,
    pub state_timeout: Duration,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            max_clarification_attempts: 3,
            confidence_ok: 0.70,
            confidence_clarify: 0.40,
            state_timeout: Duration::from_secs(30),
        }
    }
}

/// One entry of the transition history.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub from: DialogueState,
    pub to: DialogueState,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Who said what, for the trailing conversation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

/// Introspection snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FsmMetrics {
    pub session_id: String,
    pub state: DialogueState,
    pub turn_count: u64,
    pub clarification_attempts: u32,
    pub pending_clarification: bool,
    pub last_intent: Option<String>,
    pub confirmed_slots: usize,
    pub transitions: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Conversation entries retained beyond the largest window anyone asks for.
const CONVERSATION_CAP: usize = 40;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session dialogue state. All methods run under the registry's
/// per-session lock; nothing here blocks.
#[derive(Debug)]
pub struct DialogueFsm {
    session_id: String,
    user_id: Option<String>,
    request_id: Option<Uuid>,
    state: DialogueState,
    turn_count: u64,
    turn_in_flight: bool,
    last_intent: Option<String>,
    confirmed_slots: HashMap<String, Value>,
    pending_clarification: bool,
    clarification_attempts: u32,
    history: Vec<TransitionEvent>,
    conversation: VecDeque<HistoryEntry>,
    config: FsmConfig,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    last_activity: Instant,
    /// Bumped on every state change; stale safety timers compare it.
    epoch: u64,
    /// Set by the registry so safety timers can re-lock the machine.
    self_ref: Weak<Mutex<DialogueFsm>>,
    destroyed: bool,
}

impl DialogueFsm {
    pub fn new(session_id: impl Into<String>, config: FsmConfig) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: None,
            request_id: None,
            state: S::Idle,
            turn_count: 0,
            turn_in_flight: false,
            last_intent: None,
            confirmed_slots: HashMap::new(),
            pending_clarification: false,
            clarification_attempts: 0,
            history: Vec::new(),
            conversation: VecDeque::new(),
            config,
            created_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
            epoch: 0,
            self_ref: Weak::new(),
            destroyed: false,
        }
    }

    /// Called once by the registry after wrapping the machine in its lock.
    pub(crate) fn attach(&mut self, self_ref: Weak<Mutex<DialogueFsm>>) {
        self.self_ref = self_ref;
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn request_id(&self) -> Option<Uuid> {
        self.request_id
    }

    pub fn clarification_attempts(&self) -> u32 {
        self.clarification_attempts
    }

    pub fn attempts_remaining(&self) -> bool {
        self.clarification_attempts < self.config.max_clarification_attempts
    }

    pub fn pending_clarification(&self) -> bool {
        self.pending_clarification
    }

    pub fn last_intent(&self) -> Option<&str> {
        self.last_intent.as_deref()
    }

    pub fn history(&self) -> &[TransitionEvent] {
        &self.history
    }

    pub fn set_user(&mut self, user_id: Option<String>) {
        if user_id.is_some() {
            self.user_id = user_id;
        }
    }

    /// How long since the last public call touched this session.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    // ── Turn lifecycle ─────────────────────────────────────────────

    /// Begin a new turn: reset to idle from any terminal state, then move
    /// to preprocessing. Refuses to interleave turns.
    pub fn start_new_turn(&mut self, request_id: Uuid) -> Result<()> {
        self.touch();
        if self.destroyed || self.turn_in_flight {
            return Err(Error::SessionBusy {
                session_id: self.session_id.clone(),
            });
        }

        if self.state != S::Idle {
            if is_terminal(self.state) || self.state == S::Clarifying {
                self.apply(S::Idle, "turn_reset", None, false);
            } else {
                // A previous turn left the machine mid-flight; the safety
                // timer should have cleaned this up, but recover anyway.
                self.apply(S::Idle, "turn_reset", None, true);
            }
        }

        self.turn_count += 1;
        self.request_id = Some(request_id);
        self.turn_in_flight = true;
        self.apply(S::Preprocessing, "turn_started", None, false);
        Ok(())
    }

    /// Mark the in-flight turn finished. The state stays wherever the turn
    /// ended (a terminal state or clarifying) until the next turn resets it.
    pub fn end_turn(&mut self) {
        self.turn_in_flight = false;
        self.request_id = None;
        self.touch();
    }

    // ── Transitions ────────────────────────────────────────────────

    /// Attempt a table-checked transition. A rejected move leaves the state
    /// unchanged and returns the error.
    pub fn transition(
        &mut self,
        to: DialogueState,
        trigger: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        self.touch();
        if self.destroyed {
            return Err(Error::SessionBusy {
                session_id: self.session_id.clone(),
            });
        }

        if !allowed(self.state, to) {
            TraceEvent::InvalidTransition {
                session_id: self.session_id.clone(),
                from: self.state,
                to,
                trigger: trigger.to_string(),
            }
            .emit();
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        // The clarifying self-loop counts as a retry and is capped.
        if self.state == S::Clarifying && to == S::Clarifying {
            if self.clarification_attempts >= self.config.max_clarification_attempts {
                self.apply(S::Fallback, "clarification_cap_reached", metadata, false);
                return Ok(());
            }
        }

        self.apply(to, trigger, metadata, false);
        Ok(())
    }

    /// Bypass the table. Used by the safety timer and administrative
    /// resets; the history records the trigger with a `forced_` prefix.
    pub fn force_transition(
        &mut self,
        to: DialogueState,
        trigger: &str,
        metadata: Option<Value>,
    ) {
        if self.destroyed {
            return;
        }
        self.touch();
        self.apply(to, trigger, metadata, true);
    }

    /// The one place state actually changes.
    fn apply(
        &mut self,
        to: DialogueState,
        trigger: &str,
        metadata: Option<Value>,
        forced: bool,
    ) {
        let from = self.state;
        let trigger = if forced {
            format!("forced_{trigger}")
        } else {
            trigger.to_string()
        };

        self.state = to;
        self.epoch += 1;
        self.history.push(TransitionEvent {
            from,
            to,
            trigger,
            timestamp: Utc::now(),
            metadata,
        });

        match to {
            S::Clarifying => {
                self.pending_clarification = true;
                self.clarification_attempts += 1;
            }
            S::Success | S::Fallback => {
                self.pending_clarification = false;
                self.clarification_attempts = 0;
            }
            S::Idle => {
                self.pending_clarification = false;
            }
            _ => {}
        }

        self.arm_state_timer(to);
    }

    /// Arm the single-shot safety timer for every state except idle and
    /// success. A later transition bumps the epoch, turning the timer into
    /// a no-op.
    fn arm_state_timer(&self, entered: DialogueState) {
        if matches!(entered, S::Idle | S::Success) {
            return;
        }
        // Outside a runtime (plain unit tests) there is nothing to arm.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.self_ref.clone();
        let armed_epoch = self.epoch;
        let timeout = self.config.state_timeout;
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(fsm) = weak.upgrade() else { return };
            let mut fsm = fsm.lock();
            if fsm.destroyed || fsm.epoch != armed_epoch || fsm.state == S::Fallback {
                return;
            }
            tracing::warn!(
                session_id = %fsm.session_id,
                state = %fsm.state,
                "state safety timeout exceeded, forcing fallback"
            );
            fsm.apply(S::Fallback, "forced_state_timeout_exceeded", None, false);
        });
    }

    // ── Outcome handlers ───────────────────────────────────────────

    /// Map NLU confidence to the turn's action, moving the machine when a
    /// clarification or fallback is needed.
    pub fn handle_confidence(&mut self, confidence: f32, intent: &str) -> Action {
        self.touch();
        self.last_intent = Some(intent.to_string());

        if confidence >= self.config.confidence_ok {
            return Action::Answer;
        }
        if confidence >= self.config.confidence_clarify && self.attempts_remaining() {
            let _ = self.transition(
                S::Clarifying,
                "low_confidence",
                Some(serde_json::json!({ "confidence": confidence })),
            );
            return Action::AskClarification;
        }
        let _ = self.transition(
            S::Fallback,
            "confidence_below_threshold",
            Some(serde_json::json!({ "confidence": confidence })),
        );
        Action::FallbackGeneric
    }

    /// A stage deadline fired.
    pub fn handle_timeout(&mut self, stage: Stage) -> Action {
        self.touch();
        let metadata = serde_json::json!({ "stage": stage.as_str() });
        if self
            .transition(S::Timeout, "stage_timeout", Some(metadata.clone()))
            .is_err()
        {
            self.force_transition(S::Timeout, "stage_timeout", Some(metadata));
        }
        Action::DegradedTimeout
    }

    /// An upstream or local failure reached the orchestrator.
    pub fn handle_error(&mut self, code: ErrorCode, message: Option<&str>) -> Action {
        self.touch();
        let metadata = serde_json::json!({
            "code": code,
            "message": message,
        });
        if self
            .transition(S::ErrorDegraded, "pipeline_error", Some(metadata.clone()))
            .is_err()
        {
            self.force_transition(S::ErrorDegraded, "pipeline_error", Some(metadata));
        }

        match code {
            ErrorCode::EmptyRetrieval => Action::FallbackKb,
            ErrorCode::Upstream429 | ErrorCode::Upstream5xx => Action::RetrySuggestion,
            _ => Action::FallbackGeneric,
        }
    }

    /// The turn is proceeding to answer; any pending clarification thread
    /// is over.
    pub fn reset_clarifications(&mut self) {
        self.clarification_attempts = 0;
        self.pending_clarification = false;
    }

    /// The turn produced an answer.
    pub fn handle_success(&mut self) {
        self.touch();
        self.clarification_attempts = 0;
        self.confirmed_slots.clear();
        if self
            .transition(S::Success, "turn_succeeded", None)
            .is_err()
        {
            self.force_transition(S::Success, "turn_succeeded", None);
        }
    }

    // ── Slots ──────────────────────────────────────────────────────

    pub fn update_slot(&mut self, key: impl Into<String>, value: Value) {
        self.touch();
        self.confirmed_slots.insert(key.into(), value);
    }

    pub fn get_slot(&self, key: &str) -> Option<&Value> {
        self.confirmed_slots.get(key)
    }

    pub fn clear_slots(&mut self) {
        self.confirmed_slots.clear();
    }

    pub fn slot_count(&self) -> usize {
        self.confirmed_slots.len()
    }

    // ── Conversation window ────────────────────────────────────────

    /// Record one exchange for the trailing history window.
    pub fn push_exchange(&mut self, role: HistoryRole, content: impl Into<String>) {
        self.conversation.push_back(HistoryEntry {
            role,
            content: content.into(),
        });
        while self.conversation.len() > CONVERSATION_CAP {
            self.conversation.pop_front();
        }
    }

    /// The trailing `n` conversation entries, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<HistoryEntry> {
        self.conversation
            .iter()
            .skip(self.conversation.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    // ── Introspection & teardown ───────────────────────────────────

    pub fn get_metrics(&self) -> FsmMetrics {
        FsmMetrics {
            session_id: self.session_id.clone(),
            state: self.state,
            turn_count: self.turn_count,
            clarification_attempts: self.clarification_attempts,
            pending_clarification: self.pending_clarification,
            last_intent: self.last_intent.clone(),
            confirmed_slots: self.confirmed_slots.len(),
            transitions: self.history.len(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }

    /// Disarm timers and refuse all further use. A destroyed machine is
    /// never reused.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.epoch += 1;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm() -> DialogueFsm {
        DialogueFsm::new("s-test", FsmConfig::default())
    }

    fn rid() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn table_accepts_the_documented_edges() {
        assert!(allowed(S::Idle, S::Preprocessing));
        assert!(allowed(S::Preprocessing, S::Analyzing));
        assert!(allowed(S::Analyzing, S::Generating));
        assert!(allowed(S::Analyzing, S::Retrieving));
        assert!(allowed(S::Retrieving, S::Generating));
        assert!(allowed(S::Generating, S::Success));
        assert!(allowed(S::Clarifying, S::Clarifying));
        assert!(allowed(S::Timeout, S::Fallback));
        assert!(allowed(S::Fallback, S::Success));
    }

    #[test]
    fn table_rejects_everything_else() {
        assert!(!allowed(S::Idle, S::Generating));
        assert!(!allowed(S::Success, S::Generating));
        assert!(!allowed(S::Preprocessing, S::Retrieving));
        assert!(!allowed(S::Generating, S::Idle));
        assert!(!allowed(S::Timeout, S::ErrorDegraded));
        assert!(!allowed(S::Clarifying, S::ErrorDegraded));
    }

    #[test]
    fn rejected_transition_leaves_state_unchanged() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        assert_eq!(m.state(), S::Preprocessing);

        let err = m.transition(S::Generating, "nope", None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(m.state(), S::Preprocessing);
    }

    #[test]
    fn turn_walks_the_happy_path() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        m.transition(S::Generating, "high_confidence", None).unwrap();
        m.handle_success();
        assert_eq!(m.state(), S::Success);
        assert_eq!(m.turn_count(), 1);
        m.end_turn();

        // Second turn resets through idle.
        m.start_new_turn(rid()).unwrap();
        assert_eq!(m.state(), S::Preprocessing);
        assert_eq!(m.turn_count(), 2);
    }

    #[test]
    fn interleaved_turns_are_refused() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        let err = m.start_new_turn(rid()).unwrap_err();
        assert!(matches!(err, Error::SessionBusy { .. }));
    }

    #[test]
    fn handle_confidence_answers_above_ok() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        assert_eq!(m.handle_confidence(0.92, "chat"), Action::Answer);
        assert_eq!(m.state(), S::Analyzing);
        assert_eq!(m.last_intent(), Some("chat"));
    }

    #[test]
    fn handle_confidence_clarifies_in_the_middle_band() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        assert_eq!(
            m.handle_confidence(0.55, "research"),
            Action::AskClarification
        );
        assert_eq!(m.state(), S::Clarifying);
        assert_eq!(m.clarification_attempts(), 1);
        assert!(m.pending_clarification());
    }

    #[test]
    fn handle_confidence_falls_back_below_clarify() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        assert_eq!(
            m.handle_confidence(0.15, "unknown"),
            Action::FallbackGeneric
        );
        assert_eq!(m.state(), S::Fallback);
    }

    #[test]
    fn clarification_cap_forces_fallback() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        m.transition(S::Clarifying, "low_confidence", None).unwrap();
        assert_eq!(m.clarification_attempts(), 1);

        // Two self-loops reach the cap of 3.
        m.transition(S::Clarifying, "retry", None).unwrap();
        m.transition(S::Clarifying, "retry", None).unwrap();
        assert_eq!(m.clarification_attempts(), 3);
        assert_eq!(m.state(), S::Clarifying);

        // The next self-loop lands in fallback instead.
        m.transition(S::Clarifying, "retry", None).unwrap();
        assert_eq!(m.state(), S::Fallback);
        // Fallback resets the counter.
        assert_eq!(m.clarification_attempts(), 0);
        let last = m.history().last().unwrap();
        assert_eq!(last.trigger, "clarification_cap_reached");
    }

    #[test]
    fn success_resets_attempts_and_slots() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        m.update_slot("topic", serde_json::json!("historia"));
        m.transition(S::Clarifying, "low_confidence", None).unwrap();
        assert_eq!(m.clarification_attempts(), 1);

        m.transition(S::Analyzing, "clarified", None).unwrap();
        m.transition(S::Generating, "ok", None).unwrap();
        m.handle_success();

        assert_eq!(m.clarification_attempts(), 0);
        assert_eq!(m.slot_count(), 0);
        assert_eq!(m.state(), S::Success);
    }

    #[test]
    fn handle_timeout_moves_to_timeout() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        m.transition(S::Generating, "ok", None).unwrap();
        assert_eq!(m.handle_timeout(Stage::Generation), Action::DegradedTimeout);
        assert_eq!(m.state(), S::Timeout);
    }

    #[test]
    fn handle_error_maps_codes_to_actions() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        assert_eq!(
            m.handle_error(ErrorCode::EmptyRetrieval, None),
            Action::FallbackKb
        );
        assert_eq!(m.state(), S::ErrorDegraded);

        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        assert_eq!(
            m.handle_error(ErrorCode::Upstream429, Some("429")),
            Action::RetrySuggestion
        );

        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        assert_eq!(
            m.handle_error(ErrorCode::GarbageInput, None),
            Action::FallbackGeneric
        );
    }

    #[test]
    fn forced_transition_prefixes_trigger() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.force_transition(S::Fallback, "admin_reset", None);
        assert_eq!(m.state(), S::Fallback);
        assert_eq!(m.history().last().unwrap().trigger, "forced_admin_reset");
    }

    #[test]
    fn history_records_every_change() {
        let mut m = fsm();
        m.start_new_turn(rid()).unwrap();
        m.transition(S::Analyzing, "preprocessed", None).unwrap();
        let history = m.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from, S::Idle);
        assert_eq!(history[0].to, S::Preprocessing);
        assert_eq!(history[1].trigger, "preprocessed");
    }

    #[test]
    fn conversation_window_is_bounded() {
        let mut m = fsm();
        for i in 0..100 {
            m.push_exchange(HistoryRole::User, format!("mensaje {i}"));
        }
        assert_eq!(m.recent_history(200).len(), CONVERSATION_CAP);
        let recent = m.recent_history(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.last().unwrap().content, "mensaje 99");
    }

    #[test]
    fn destroyed_machine_refuses_turns() {
        let mut m = fsm();
        m.destroy();
        assert!(m.start_new_turn(rid()).is_err());
        assert!(m.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn safety_timer_forces_fallback() {
        let config = FsmConfig {
            state_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let m = std::sync::Arc::new(Mutex::new(DialogueFsm::new("s-timer", config)));
        m.lock().attach(std::sync::Arc::downgrade(&m));

        {
            let mut guard = m.lock();
            guard.start_new_turn(rid()).unwrap();
            guard.transition(S::Analyzing, "preprocessed", None).unwrap();
        }

        // Let the armed timer fire.
        tokio::time::sleep(Duration::from_millis(120)).await;
        tokio::task::yield_now().await;

        let guard = m.lock();
        assert_eq!(guard.state(), S::Fallback);
        assert_eq!(
            guard.history().last().unwrap().trigger,
            "forced_state_timeout_exceeded"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn safety_timer_is_disarmed_by_progress() {
        let config = FsmConfig {
            state_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let m = std::sync::Arc::new(Mutex::new(DialogueFsm::new("s-timer2", config)));
        m.lock().attach(std::sync::Arc::downgrade(&m));

        {
            let mut guard = m.lock();
            guard.start_new_turn(rid()).unwrap();
            guard.transition(S::Analyzing, "preprocessed", None).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        {
            let mut guard = m.lock();
            guard.transition(S::Generating, "ok", None).unwrap();
            guard.handle_success();
        }

        // The analyzing timer's epoch is stale; success arms nothing.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(m.lock().state(), S::Success);
    }
}
