//! Streaming mode: the same pipeline, emitted as ordered NDJSON chunks.
//!
//! Chunk order for a turn:
//! `status(preprocessing)` → `status(analyzing)` → [`clarification`] →
//! `status(generating)` → `content`* → `done`, with a single `error` chunk
//! replacing the tail whenever a stage fails or the watchdog fires. Every
//! chunk carries the request id and a monotonically increasing sequence id.

use std::time::Duration;

use futures_util::StreamExt;
use uuid::Uuid;

use charla_clarify::ClarifyInput;
use charla_dialogue::HistoryRole;
use charla_domain::{
    Action, BoxStream, ChatTurnRequest, DialogueState, ErrorCode, Stage, StreamChunk,
    StreamPayload,
};
use charla_preprocess::{preprocess, PreprocessResult};
use charla_watchdog::{StageOutcome, StageWatchdog};

use crate::fallback::fallback_text;
use crate::orchestrator::{build_messages, generation_opts};
use crate::state::AppState;

fn chunk(request_id: Uuid, seq: &mut u64, payload: StreamPayload) -> StreamChunk {
    let chunk = StreamChunk {
        request_id,
        sequence_id: *seq,
        payload,
    };
    *seq += 1;
    chunk
}

fn error_payload(state: &AppState, code: ErrorCode) -> StreamPayload {
    StreamPayload::Error {
        code,
        message: fallback_text(&state.config, code),
        retryable: code.is_retryable(),
    }
}

fn claim_turn(
    fsm: &parking_lot::Mutex<charla_dialogue::DialogueFsm>,
    request_id: Uuid,
    user_id: Option<String>,
    message: String,
) -> bool {
    let mut guard = fsm.lock();
    if guard.start_new_turn(request_id).is_err() {
        return false;
    }
    guard.set_user(user_id);
    guard.push_exchange(HistoryRole::User, message);
    true
}

/// Run one streaming turn.
pub fn process_stream(
    state: AppState,
    request: ChatTurnRequest,
) -> BoxStream<'static, StreamChunk> {
    let stream = async_stream::stream! {
        let request_id = request.request_id;
        let session_id = request.session_id.clone();
        let mut seq: u64 = 0;

        // ── Session claim ──────────────────────────────────────────
        let guard = match state.registry.begin_turn(&session_id) {
            Ok(guard) => guard,
            Err(_) => {
                yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::RateLimited));
                yield StreamChunk::done(request_id, seq, None);
                return;
            }
        };
        let fsm = guard.fsm().clone();
        if !claim_turn(&fsm, request_id, request.user_id.clone(), request.message.clone()) {
            yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::RateLimited));
            yield StreamChunk::done(request_id, seq, None);
            return;
        }

        let watchdog = StageWatchdog::new(request_id, session_id.clone(), state.budgets());
        watchdog.start_request();
        tracing::info!(request_id = %request_id, session_id = %session_id, "pipeline_started");

        // ── Preprocess ─────────────────────────────────────────────
        yield chunk(request_id, &mut seq, StreamPayload::Status {
            state: DialogueState::Preprocessing,
        });

        let message = request.message.clone();
        let pre = {
            let op_message = message.clone();
            let fb_message = message.clone();
            let outcome = watchdog
                .execute_or(
                    Stage::Preprocess,
                    move |_| async move { preprocess(&op_message) },
                    move || PreprocessResult::neutral(&fb_message),
                )
                .await;
            outcome.recovered().unwrap_or_else(|| PreprocessResult::neutral(&message))
        };

        if pre.is_garbage() {
            fsm.lock().handle_error(ErrorCode::GarbageInput, None);
            watchdog.finish_request();
            yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::GarbageInput));
            yield StreamChunk::done(request_id, seq, None);
            fsm.lock().end_turn();
            return;
        }

        // ── NLU ────────────────────────────────────────────────────
        let _ = fsm.lock().transition(DialogueState::Analyzing, "preprocess_complete", None);
        yield chunk(request_id, &mut seq, StreamPayload::Status {
            state: DialogueState::Analyzing,
        });

        let analysis = {
            let analyzer = state.analyzer.clone();
            let normalized = pre.normalized_text.clone();
            let ctx = charla_providers::AnalyzeContext {
                session_id: session_id.clone(),
                user_id: request.user_id.clone(),
                chat_id: request.context.as_ref().and_then(|c| c.chat_id.clone()),
                run_id: request_id,
                history: Vec::new(),
                attachment_names: Vec::new(),
            };
            let outcome = watchdog
                .execute(Stage::Nlu, move |_| async move {
                    analyzer.analyze(&normalized, &ctx).await
                })
                .await;
            match outcome {
                StageOutcome::Completed(Ok(analysis)) => analysis,
                StageOutcome::Completed(Err(e)) => {
                    let code = ErrorCode::from_error(&e);
                    fsm.lock().handle_error(code, Some(&e.to_string()));
                    watchdog.finish_request();
                    yield chunk(request_id, &mut seq, error_payload(&state, code));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
                StageOutcome::TimedOut { .. } | StageOutcome::Aborted => {
                    fsm.lock().handle_timeout(Stage::Nlu);
                    watchdog.finish_request();
                    yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::TimeoutNlu));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
            }
        };

        // ── Clarification ──────────────────────────────────────────
        let decision = if state.config.pipeline.enable_clarification {
            let attempts = fsm.lock().clarification_attempts();
            state.policy.decide(
                &ClarifyInput {
                    message: message.clone(),
                    intents: analysis.ranked_intents(),
                    missing_slots: analysis.missing_slots.clone(),
                    ambiguous_terms: analysis.ambiguous_terms.clone(),
                    history: Vec::new(),
                },
                attempts,
            )
        } else {
            None
        };

        if let Some(clarification) = decision {
            let action = fsm
                .lock()
                .handle_confidence(analysis.intent_confidence, &analysis.intent);
            match action {
                Action::AskClarification | Action::Answer => {
                    if action == Action::Answer {
                        let _ = fsm.lock().transition(DialogueState::Clarifying, "slot_missing", None);
                    }
                    let attempt = fsm.lock().clarification_attempts();
                    watchdog.finish_request();
                    fsm.lock().push_exchange(HistoryRole::Assistant, clarification.question.clone());
                    yield chunk(request_id, &mut seq, StreamPayload::Clarification {
                        message: clarification.question,
                        attempt,
                    });
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
                _ => {
                    watchdog.finish_request();
                    yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::LowConfidence));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
            }
        } else {
            let action = fsm
                .lock()
                .handle_confidence(analysis.intent_confidence, &analysis.intent);
            match action {
                Action::Answer => fsm.lock().reset_clarifications(),
                other => {
                    if other == Action::AskClarification {
                        let _ = fsm.lock().transition(
                            DialogueState::Fallback,
                            "clarification_unavailable",
                            None,
                        );
                    }
                    watchdog.finish_request();
                    yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::LowConfidence));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
            }
        }

        // ── Generation (streamed) ──────────────────────────────────
        let _ = fsm.lock().transition(DialogueState::Generating, "generation_started", None);
        yield chunk(request_id, &mut seq, StreamPayload::Status {
            state: DialogueState::Generating,
        });

        let token = watchdog.start_stage(Stage::Generation);
        let budget_ms = watchdog
            .budgets()
            .generation_ms
            .min(watchdog.remaining_budget());
        let deadline = tokio::time::Instant::now() + Duration::from_millis(budget_ms);

        let messages = build_messages(&state, &pre, &fsm);
        let opts = generation_opts(&state, &request, &watchdog);

        let opened = tokio::select! {
            result = state.gateway.stream_chat(&messages, &opts) => Some(result),
            _ = token.cancelled() => None,
            _ = tokio::time::sleep_until(deadline) => None,
        };

        let mut upstream = match opened {
            Some(Ok(upstream)) => upstream,
            Some(Err(e)) => {
                let code = ErrorCode::from_error(&e);
                fsm.lock().handle_error(code, Some(&e.to_string()));
                watchdog.abort_stage(Stage::Generation, "open_failed");
                watchdog.finish_request();
                yield chunk(request_id, &mut seq, error_payload(&state, code));
                yield StreamChunk::done(request_id, seq, None);
                fsm.lock().end_turn();
                return;
            }
            None => {
                fsm.lock().handle_timeout(Stage::Generation);
                watchdog.abort_stage(Stage::Generation, "budget_exhausted");
                watchdog.finish_request();
                tracing::warn!(request_id = %request_id, stage = "generation", "stage_timeout");
                yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::TimeoutGeneration));
                yield StreamChunk::done(request_id, seq, None);
                fsm.lock().end_turn();
                return;
            }
        };

        let mut full_text = String::new();
        loop {
            let next = tokio::select! {
                item = upstream.next() => item,
                _ = token.cancelled() => {
                    fsm.lock().handle_timeout(Stage::Generation);
                    watchdog.finish_request();
                    yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::TimeoutGeneration));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    fsm.lock().handle_timeout(Stage::Generation);
                    watchdog.abort_stage(Stage::Generation, "budget_exhausted");
                    watchdog.finish_request();
                    tracing::warn!(request_id = %request_id, stage = "generation", "stage_timeout");
                    yield chunk(request_id, &mut seq, error_payload(&state, ErrorCode::TimeoutGeneration));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
            };

            match next {
                Some(Ok(delta)) => {
                    if !delta.content.is_empty() {
                        full_text.push_str(&delta.content);
                        yield chunk(request_id, &mut seq, StreamPayload::Content {
                            delta: delta.content,
                        });
                    }
                    if delta.done {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let code = ErrorCode::from_error(&e);
                    fsm.lock().handle_error(code, Some(&e.to_string()));
                    watchdog.abort_stage(Stage::Generation, "stream_error");
                    watchdog.finish_request();
                    yield chunk(request_id, &mut seq, error_payload(&state, code));
                    yield StreamChunk::done(request_id, seq, None);
                    fsm.lock().end_turn();
                    return;
                }
                None => break,
            }
        }

        // ── Postprocess & success ──────────────────────────────────
        watchdog.end_stage(Stage::Generation);
        watchdog.start_stage(Stage::Postprocess);
        {
            let mut fsm = fsm.lock();
            fsm.handle_success();
            fsm.push_exchange(HistoryRole::Assistant, full_text);
        }
        watchdog.end_stage(Stage::Postprocess);
        let latency = watchdog.finish_request();
        tracing::info!(
            request_id = %request_id,
            total_ms = latency.total,
            "pipeline_completed"
        );
        yield StreamChunk::done(request_id, seq, Some(latency));
        fsm.lock().end_turn();
        drop(guard);
    };

    Box::pin(stream)
}
