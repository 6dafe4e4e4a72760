use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use charla_domain::{PipelineLatency, Stage, TraceEvent};

use crate::budgets::StageBudgets;

/// Teardown hook fired exactly once when a stage is cancelled or times out.
pub type AbortHook = Box<dyn FnOnce() + Send>;

/// Degraded substitute produced when a stage misses its deadline.
pub type Fallback<T> = Box<dyn FnOnce() -> T + Send>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a watched stage ended.
#[derive(Debug)]
pub enum StageOutcome<T> {
    /// The operation finished before its deadline.
    Completed(T),

    /// The deadline fired first. `fallback` carries the substitute value if
    /// one was registered; `total_exhausted` is set when the request-wide
    /// budget (not the stage budget) was the binding constraint.
    TimedOut {
        fallback: Option<T>,
        total_exhausted: bool,
    },

    /// The stage token was cancelled from outside the race.
    Aborted,
}

impl<T> StageOutcome<T> {
    /// The value if the stage completed normally.
    pub fn completed(self) -> Option<T> {
        match self {
            StageOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The value if the stage completed normally **or** timed out with a
    /// registered fallback — the degraded-but-usable path.
    pub fn recovered(self) -> Option<T> {
        match self {
            StageOutcome::Completed(value) => Some(value),
            StageOutcome::TimedOut {
                fallback: Some(value),
                ..
            } => Some(value),
            _ => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, StageOutcome::TimedOut { .. })
    }

    pub fn aborted(&self) -> bool {
        matches!(self, StageOutcome::Aborted)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Watchdog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StageSlot {
    token: CancellationToken,
    started_at: Instant,
    budget_ms: u64,
    on_abort: Option<AbortHook>,
}

struct Inner {
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    stages: HashMap<Stage, StageSlot>,
    durations: HashMap<Stage, u64>,
}

/// Per-turn deadline enforcement and cooperative cancellation.
///
/// Owned exclusively by the turn that created it; nothing outside the turn
/// observes it until [`finish_request`](Self::finish_request) returns the
/// latency breakdown.
pub struct StageWatchdog {
    request_id: Uuid,
    session_id: String,
    budgets: StageBudgets,
    root: CancellationToken,
    inner: Mutex<Inner>,
}

impl StageWatchdog {
    pub fn new(request_id: Uuid, session_id: impl Into<String>, budgets: StageBudgets) -> Self {
        Self {
            request_id,
            session_id: session_id.into(),
            budgets,
            root: CancellationToken::new(),
            inner: Mutex::new(Inner {
                started_at: None,
                deadline: None,
                stages: HashMap::new(),
                durations: HashMap::new(),
            }),
        }
    }

    pub fn budgets(&self) -> &StageBudgets {
        &self.budgets
    }

    /// The request-wide cancellation token. Cancelling it cancels every
    /// stage token derived from it.
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Arm the total-budget clock. Idempotent; every `execute_*` call arms
    /// lazily if the orchestrator has not done so yet.
    pub fn start_request(&self) {
        let mut inner = self.inner.lock();
        if inner.started_at.is_some() {
            return;
        }
        let now = Instant::now();
        inner.started_at = Some(now);
        inner.deadline = Some(now + Duration::from_millis(self.budgets.total_ms));
        drop(inner);

        TraceEvent::RequestStarted {
            request_id: self.request_id,
            session_id: self.session_id.clone(),
            total_budget_ms: self.budgets.total_ms,
        }
        .emit();
    }

    /// Milliseconds left of the total budget.
    pub fn remaining_budget(&self) -> u64 {
        let inner = self.inner.lock();
        match inner.deadline {
            // `duration_since` saturates to zero once the deadline passed.
            Some(deadline) => deadline.duration_since(Instant::now()).as_millis() as u64,
            None => self.budgets.total_ms,
        }
    }

    /// Open a stage and return its cancellation token. Idempotent: a second
    /// call returns the existing token without re-arming.
    pub fn start_stage(&self, stage: Stage) -> CancellationToken {
        self.start_request();

        let mut inner = self.inner.lock();
        if let Some(slot) = inner.stages.get(&stage) {
            return slot.token.clone();
        }
        let token = self.root.child_token();
        let budget_ms = self.budgets.get(stage);
        inner.stages.insert(
            stage,
            StageSlot {
                token: token.clone(),
                started_at: Instant::now(),
                budget_ms,
                on_abort: None,
            },
        );
        drop(inner);

        TraceEvent::StageStarted {
            request_id: self.request_id,
            stage,
            budget_ms,
        }
        .emit();
        token
    }

    /// Register the teardown hook for an open stage. Replaces any previous
    /// hook; fired at most once.
    pub fn on_stage_abort(&self, stage: Stage, hook: AbortHook) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.stages.get_mut(&stage) {
            slot.on_abort = Some(hook);
        }
    }

    /// Close a stage normally, recording its duration.
    pub fn end_stage(&self, stage: Stage) -> Option<u64> {
        let mut inner = self.inner.lock();
        let slot = inner.stages.remove(&stage)?;
        let duration_ms = slot.started_at.elapsed().as_millis() as u64;
        inner.durations.insert(stage, duration_ms);
        let within_budget = duration_ms <= slot.budget_ms;
        drop(inner);

        TraceEvent::StageCompleted {
            request_id: self.request_id,
            stage,
            duration_ms,
            within_budget,
        }
        .emit();
        Some(duration_ms)
    }

    /// Cooperatively cancel one stage: fire its teardown hook, cancel its
    /// token, record how far it got.
    pub fn abort_stage(&self, stage: Stage, reason: &str) {
        let hook = {
            let mut inner = self.inner.lock();
            let Some(mut slot) = inner.stages.remove(&stage) else {
                return;
            };
            let duration_ms = slot.started_at.elapsed().as_millis() as u64;
            inner.durations.insert(stage, duration_ms);
            slot.token.cancel();
            slot.on_abort.take()
        };
        if let Some(hook) = hook {
            hook();
        }

        TraceEvent::StageAborted {
            request_id: self.request_id,
            stage,
            reason: reason.to_string(),
        }
        .emit();
    }

    /// Cancel every open stage.
    pub fn abort_all_stages(&self, reason: &str) {
        let open: Vec<Stage> = self.inner.lock().stages.keys().copied().collect();
        for stage in open {
            self.abort_stage(stage, reason);
        }
    }

    /// Cancel the whole request: every stage token first, then the root.
    pub fn abort(&self, reason: &str) {
        self.abort_all_stages(reason);
        self.root.cancel();
    }

    /// Disarm everything and return the latency breakdown. Stages never
    /// opened report `None`.
    pub fn finish_request(&self) -> PipelineLatency {
        let mut inner = self.inner.lock();
        inner.stages.clear();
        let total = inner
            .started_at
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let mut latency = PipelineLatency::unreached(total);
        for (stage, duration_ms) in &inner.durations {
            latency.set(*stage, *duration_ms);
        }
        drop(inner);
        self.root.cancel();

        TraceEvent::RequestCompleted {
            request_id: self.request_id,
            total_ms: total,
        }
        .emit();
        latency
    }

    // ── Timed execution ────────────────────────────────────────────

    /// Run `op` under the stage deadline with no fallback.
    pub async fn execute<T, F, Fut>(&self, stage: Stage, op: F) -> StageOutcome<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        self.execute_with_abort(stage, op, None, None).await
    }

    /// Run `op` under the stage deadline; on timeout, substitute the
    /// fallback value so the turn can degrade instead of fail.
    pub async fn execute_or<T, F, Fut>(
        &self,
        stage: Stage,
        op: F,
        fallback: impl FnOnce() -> T + Send + 'static,
    ) -> StageOutcome<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        self.execute_with_abort(stage, op, None, Some(Box::new(fallback)))
            .await
    }

    /// Full form: `op` receives the stage token (and is expected to thread
    /// it into its I/O), `on_abort` tears down external work, `fallback`
    /// substitutes a degraded value on timeout.
    ///
    /// The race has three arms — completion, stage deadline (clamped to the
    /// remaining total budget), and cancellation. A result arriving after
    /// cancellation is discarded.
    pub async fn execute_with_abort<T, F, Fut>(
        &self,
        stage: Stage,
        op: F,
        on_abort: Option<AbortHook>,
        fallback: Option<Fallback<T>>,
    ) -> StageOutcome<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.start_stage(stage);
        if let Some(hook) = on_abort {
            self.on_stage_abort(stage, hook);
        }

        let budget_ms = self.budgets.get(stage);
        let remaining_ms = self.remaining_budget();
        let total_bound = remaining_ms <= budget_ms;
        let wait_ms = budget_ms.min(remaining_ms);

        if wait_ms == 0 {
            // The total budget is already gone; the stage never runs.
            self.expire_stage(stage, budget_ms, true);
            return StageOutcome::TimedOut {
                fallback: fallback.map(|f| f()),
                total_exhausted: true,
            };
        }

        let fut = op(token.clone());
        tokio::pin!(fut);

        tokio::select! {
            result = &mut fut => {
                if token.is_cancelled() {
                    // Finished after an abort: the result is discarded.
                    self.finish_aborted(stage, "completed_after_abort");
                    StageOutcome::Aborted
                } else {
                    self.end_stage(stage);
                    StageOutcome::Completed(result)
                }
            }
            _ = token.cancelled() => {
                self.finish_aborted(stage, "cancelled");
                StageOutcome::Aborted
            }
            _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {
                self.expire_stage(stage, budget_ms, total_bound);
                StageOutcome::TimedOut {
                    fallback: fallback.map(|f| f()),
                    total_exhausted: total_bound,
                }
            }
        }
    }

    // ── Internal bookkeeping ───────────────────────────────────────

    /// A stage missed its deadline: cancel its token, fire its hook, record
    /// the elapsed time. When the total budget was the binding constraint,
    /// the whole request is aborted after the stage token — in that order.
    fn expire_stage(&self, stage: Stage, budget_ms: u64, total_bound: bool) {
        let hook = {
            let mut inner = self.inner.lock();
            match inner.stages.remove(&stage) {
                Some(mut slot) => {
                    let duration_ms = slot.started_at.elapsed().as_millis() as u64;
                    inner.durations.insert(stage, duration_ms);
                    slot.token.cancel();
                    slot.on_abort.take()
                }
                None => None,
            }
        };
        if let Some(hook) = hook {
            hook();
        }

        TraceEvent::StageTimeout {
            request_id: self.request_id,
            stage,
            budget_ms,
        }
        .emit();

        if total_bound {
            self.abort("total_budget_exhausted");
        }
    }

    /// Bookkeeping for a stage whose token was cancelled from outside the
    /// race (global abort, caller cancel, session teardown).
    fn finish_aborted(&self, stage: Stage, reason: &str) {
        let hook = {
            let mut inner = self.inner.lock();
            match inner.stages.remove(&stage) {
                Some(mut slot) => {
                    let duration_ms = slot.started_at.elapsed().as_millis() as u64;
                    inner.durations.insert(stage, duration_ms);
                    slot.on_abort.take()
                }
                None => return, // abort_stage already did the bookkeeping
            }
        };
        if let Some(hook) = hook {
            hook();
        }

        TraceEvent::StageAborted {
            request_id: self.request_id,
            stage,
            reason: reason.to_string(),
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn watchdog(budgets: StageBudgets) -> StageWatchdog {
        StageWatchdog::new(Uuid::new_v4(), "s-test", budgets)
    }

    #[tokio::test(start_paused = true)]
    async fn fast_stage_completes_within_budget() {
        let dog = watchdog(StageBudgets::default());
        dog.start_request();

        let outcome = dog
            .execute(Stage::Preprocess, |_| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                42u32
            })
            .await;

        assert_eq!(outcome.completed(), Some(42));
        let latency = dog.finish_request();
        assert!(latency.preprocess.is_some());
        assert_eq!(latency.nlu, None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stage_times_out_without_fallback() {
        let dog = watchdog(StageBudgets::aggressive());
        dog.start_request();

        let outcome: StageOutcome<u32> = dog
            .execute(Stage::Generation, |_| async {
                tokio::time::sleep(Duration::from_secs(9)).await;
                1
            })
            .await;

        assert!(outcome.timed_out());
        assert!(outcome.recovered().is_none());

        let latency = dog.finish_request();
        // The stage ran for its full 5s budget before the deadline fired.
        let generation = latency.generation.unwrap();
        assert!((4_990..=5_050).contains(&generation), "got {generation}");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_fallback_recovers() {
        let dog = watchdog(StageBudgets::aggressive());
        dog.start_request();

        let outcome = dog
            .execute_or(
                Stage::Retrieval,
                |_| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    vec![1, 2, 3]
                },
                Vec::new,
            )
            .await;

        assert!(outcome.timed_out());
        assert_eq!(outcome.recovered(), Some(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn total_budget_clamps_stage_budget() {
        let mut budgets = StageBudgets::default();
        budgets.total_ms = 1_000;
        budgets.generation_ms = 8_000;
        let dog = watchdog(budgets);
        dog.start_request();

        let outcome: StageOutcome<()> = dog
            .execute(Stage::Generation, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;

        match outcome {
            StageOutcome::TimedOut {
                total_exhausted, ..
            } => assert!(total_exhausted),
            other => panic!("expected timeout, got {other:?}"),
        }
        // The global token is now cancelled; later stages expire instantly.
        assert!(dog.root_token().is_cancelled());
        let next: StageOutcome<()> = dog.execute(Stage::Postprocess, |_| async {}).await;
        assert!(next.timed_out() || next.aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_hook_fires_exactly_once() {
        let dog = Arc::new(watchdog(StageBudgets::default()));
        dog.start_request();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        let dog2 = dog.clone();
        let task = tokio::spawn(async move {
            dog2.execute_with_abort(
                Stage::Nlu,
                |token| async move {
                    token.cancelled().await;
                    // Hang well past the stage budget to prove the abort won.
                    tokio::time::sleep(Duration::from_secs(30)).await;
                },
                Some(Box::new(move || {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
                None,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        dog.abort_stage(Stage::Nlu, "caller_cancel");
        dog.abort_stage(Stage::Nlu, "caller_cancel_again");

        let outcome = task.await.unwrap();
        assert!(outcome.aborted());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_stage_is_idempotent() {
        let dog = watchdog(StageBudgets::default());
        dog.start_request();

        let first = dog.start_stage(Stage::Preprocess);
        let second = dog.start_stage(Stage::Preprocess);
        // Same underlying token: cancelling one cancels the other.
        first.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_budget_decreases() {
        let dog = watchdog(StageBudgets::default());
        dog.start_request();
        let before = dog.remaining_budget();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = dog.remaining_budget();
        assert!(after < before);
        assert!(before <= 15_000);
    }

    #[tokio::test(start_paused = true)]
    async fn global_abort_cancels_in_flight_stage() {
        let dog = Arc::new(watchdog(StageBudgets::default()));
        dog.start_request();

        let dog2 = dog.clone();
        let task = tokio::spawn(async move {
            dog2.execute::<(), _, _>(Stage::Generation, |token| async move {
                token.cancelled().await;
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        dog.abort("shutdown");
        let outcome = task.await.unwrap();
        assert!(outcome.aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_request_reports_unreached_stages_as_none() {
        let dog = watchdog(StageBudgets::default());
        dog.start_request();
        dog.execute(Stage::Preprocess, |_| async { 1u8 }).await;

        let latency = dog.finish_request();
        assert!(latency.preprocess.is_some());
        assert_eq!(latency.retrieval, None);
        assert_eq!(latency.generation, None);
    }
}
