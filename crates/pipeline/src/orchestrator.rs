//! The blocking pipeline: preprocess → NLU → clarify? → retrieve? →
//! generate, every stage under the watchdog, every outcome a typed
//! envelope.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use charla_clarify::{rephrase, Clarification, ClarifyInput};
use charla_dialogue::{DialogueFsm, HistoryRole};
use charla_domain::{
    clarification_response, error_response, timeout_response, Action, AnalysisResult,
    ChatTurnRequest, ChatTurnResponse, Complexity, DialogueState, Error, ErrorCode,
    ResponseBuilder, ResponseMetadata, Result, Stage, TraceEvent,
};
use charla_preprocess::{preprocess, PreprocessResult};
use charla_providers::{
    provider_tag, AnalyzeContext, ChatMessage, ChatOptions, RetrieveContext,
};
use charla_watchdog::{StageOutcome, StageWatchdog};

use crate::fallback::fallback_text;
use crate::state::AppState;

/// Run one blocking turn. The only error this returns is
/// [`Error::SessionBusy`]; every other outcome is a typed response.
pub async fn process(state: &AppState, request: ChatTurnRequest) -> Result<ChatTurnResponse> {
    let request_id = request.request_id;
    let session_id = request.session_id.clone();

    let guard = state.registry.begin_turn(&session_id)?;
    let fsm = guard.fsm().clone();
    {
        let mut fsm = fsm.lock();
        fsm.start_new_turn(request_id)?;
        fsm.set_user(request.user_id.clone());
        fsm.push_exchange(HistoryRole::User, request.message.clone());
    }

    let watchdog = StageWatchdog::new(request_id, session_id.clone(), state.budgets());
    watchdog.start_request();
    tracing::info!(
        request_id = %request_id,
        session_id = %session_id,
        channel = ?request.channel,
        "pipeline_started"
    );

    let response = run_stages(state, &request, &fsm, &watchdog).await;
    fsm.lock().end_turn();
    Ok(response)
}

async fn run_stages(
    state: &AppState,
    request: &ChatTurnRequest,
    fsm: &Arc<Mutex<DialogueFsm>>,
    watchdog: &StageWatchdog,
) -> ChatTurnResponse {
    let request_id = request.request_id;
    let session_id = request.session_id.clone();
    let message = request.message.clone();

    // ── Preprocess ─────────────────────────────────────────────────
    let pre = {
        let op_message = message.clone();
        let fallback_message = message.clone();
        let outcome = watchdog
            .execute_or(
                Stage::Preprocess,
                move |_| async move { preprocess(&op_message) },
                move || PreprocessResult::neutral(&fallback_message),
            )
            .await;
        match outcome {
            StageOutcome::Completed(pre) => pre,
            StageOutcome::TimedOut {
                fallback,
                total_exhausted,
            } => {
                if total_exhausted {
                    return timeout_envelope(state, request, fsm, watchdog, Stage::Preprocess);
                }
                fallback.unwrap_or_else(|| PreprocessResult::neutral(&message))
            }
            StageOutcome::Aborted => {
                return timeout_envelope(state, request, fsm, watchdog, Stage::Preprocess)
            }
        }
    };
    tracing::debug!(
        request_id = %request_id,
        duration_ms = pre.preprocessing_time_ms,
        quality_score = pre.quality_score,
        language = ?pre.language,
        "stage_preprocess_complete"
    );

    if pre.is_garbage() {
        fsm.lock().handle_error(ErrorCode::GarbageInput, None);
        let latency = watchdog.finish_request();
        tracing::warn!(
            request_id = %request_id,
            flags = ?pre.quality_flags,
            "pipeline_error: unusable input"
        );
        return error_response(
            request_id,
            session_id,
            ErrorCode::GarbageInput,
            fallback_text(&state.config, ErrorCode::GarbageInput),
            latency.total,
        );
    }

    // ── NLU ────────────────────────────────────────────────────────
    let _ = fsm
        .lock()
        .transition(DialogueState::Analyzing, "preprocess_complete", None);

    let analysis = {
        let analyzer = state.analyzer.clone();
        let normalized = pre.normalized_text.clone();
        let ctx = AnalyzeContext {
            session_id: session_id.clone(),
            user_id: request.user_id.clone(),
            chat_id: request.context.as_ref().and_then(|c| c.chat_id.clone()),
            run_id: request_id,
            history: chat_history(state, fsm),
            attachment_names: request.attachments.iter().map(|a| a.name.clone()).collect(),
        };
        let outcome = watchdog
            .execute(Stage::Nlu, move |_| async move {
                analyzer.analyze(&normalized, &ctx).await
            })
            .await;
        match outcome {
            StageOutcome::Completed(Ok(analysis)) => analysis,
            StageOutcome::Completed(Err(e)) => {
                return error_envelope(state, request, fsm, watchdog, &e)
            }
            StageOutcome::TimedOut { .. } | StageOutcome::Aborted => {
                return timeout_envelope(state, request, fsm, watchdog, Stage::Nlu)
            }
        }
    };

    // ── Clarification ──────────────────────────────────────────────
    let history_lines = rendered_history(state, fsm);
    let decision = if state.config.pipeline.enable_clarification {
        let attempts = fsm.lock().clarification_attempts();
        state.policy.decide(
            &ClarifyInput {
                message: message.clone(),
                intents: analysis.ranked_intents(),
                missing_slots: analysis.missing_slots.clone(),
                ambiguous_terms: analysis.ambiguous_terms.clone(),
                history: history_lines.clone(),
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
            Action::AskClarification => {
                return clarify_envelope(
                    state,
                    request,
                    fsm,
                    watchdog,
                    &analysis,
                    clarification,
                    &history_lines,
                )
                .await;
            }
            Action::Answer => {
                // Confidence is fine but a required slot is missing; enter
                // clarifying explicitly.
                let _ = fsm
                    .lock()
                    .transition(DialogueState::Clarifying, "slot_missing", None);
                return clarify_envelope(
                    state,
                    request,
                    fsm,
                    watchdog,
                    &analysis,
                    clarification,
                    &history_lines,
                )
                .await;
            }
            _ => {
                // Below the clarify floor: the machine already fell back.
                return low_confidence_envelope(state, request, watchdog, &analysis);
            }
        }
    } else {
        // No question available. The FSM still arbitrates: good confidence
        // proceeds to answer; anything below the OK threshold falls back
        // (the clarification budget is spent, or the policy is disabled).
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
                return low_confidence_envelope(state, request, watchdog, &analysis);
            }
        }
    }

    // ── Retrieval ──────────────────────────────────────────────────
    let needs_retrieval = state
        .config
        .pipeline
        .retrieval_intents
        .iter()
        .any(|i| i == &analysis.intent)
        || matches!(analysis.complexity, Complexity::Complex | Complexity::Expert);

    let mut sources = Vec::new();
    if needs_retrieval {
        let _ = fsm
            .lock()
            .transition(DialogueState::Retrieving, "retrieval_needed", None);

        if let Some(retriever) = state.retriever.clone() {
            let query = pre.normalized_text.clone();
            let ctx = RetrieveContext {
                session_id: session_id.clone(),
                intent: analysis.intent.clone(),
                language: serde_json::to_value(pre.language)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_owned)),
            };
            let outcome = watchdog
                .execute_or(
                    Stage::Retrieval,
                    move |_| async move {
                        match retriever.retrieve(&query, &ctx).await {
                            Ok(sources) => sources,
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "retrieval failed, continuing with zero sources"
                                );
                                Vec::new()
                            }
                        }
                    },
                    Vec::new,
                )
                .await;
            match outcome {
                StageOutcome::TimedOut {
                    total_exhausted: true,
                    ..
                } => return timeout_envelope(state, request, fsm, watchdog, Stage::Retrieval),
                other => sources = other.recovered().unwrap_or_default(),
            }
        } else {
            // No backend wired: the stage is reached and instantly empty.
            watchdog.start_stage(Stage::Retrieval);
            watchdog.end_stage(Stage::Retrieval);
        }
    }

    // ── Generation ─────────────────────────────────────────────────
    let _ = fsm
        .lock()
        .transition(DialogueState::Generating, "generation_started", None);

    let generated = {
        let gateway = state.gateway.clone();
        let messages = build_messages(state, &pre, fsm);
        let opts = generation_opts(state, request, watchdog);
        let outcome = watchdog
            .execute(Stage::Generation, move |_| async move {
                gateway.chat(&messages, &opts).await
            })
            .await;
        match outcome {
            StageOutcome::Completed(Ok(generated)) => generated,
            StageOutcome::Completed(Err(e)) => {
                return error_envelope(state, request, fsm, watchdog, &e)
            }
            StageOutcome::TimedOut { .. } | StageOutcome::Aborted => {
                return timeout_envelope(state, request, fsm, watchdog, Stage::Generation)
            }
        }
    };

    // ── Postprocess & success ──────────────────────────────────────
    watchdog.start_stage(Stage::Postprocess);
    {
        let mut fsm = fsm.lock();
        fsm.handle_success();
        fsm.push_exchange(HistoryRole::Assistant, generated.content.clone());
    }
    watchdog.end_stage(Stage::Postprocess);
    let latency = watchdog.finish_request();
    tracing::info!(
        request_id = %request_id,
        total_ms = latency.total,
        model = %generated.model,
        "pipeline_completed"
    );

    ResponseBuilder::new(request_id, session_id)
        .state(DialogueState::Success)
        .message(generated.content)
        .intent(analysis.intent.clone(), analysis.intent_confidence)
        .entities(analysis.extracted_entities)
        .confidence(analysis.intent_confidence)
        .action(Action::Answer)
        .sources(sources)
        .latency(latency)
        .model(generated.model, provider_tag(&generated.provider))
        .metadata(ResponseMetadata {
            tokens_used: generated.tokens,
            ..Default::default()
        })
        .build()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn timeout_envelope(
    state: &AppState,
    request: &ChatTurnRequest,
    fsm: &Arc<Mutex<DialogueFsm>>,
    watchdog: &StageWatchdog,
    stage: Stage,
) -> ChatTurnResponse {
    fsm.lock().handle_timeout(stage);
    let latency = watchdog.finish_request();
    tracing::warn!(
        request_id = %request.request_id,
        stage = %stage,
        total_ms = latency.total,
        "stage_timeout"
    );
    let mut response = timeout_response(request.request_id, request.session_id.clone(), stage, latency);
    response.message = fallback_text(&state.config, response.error_code);
    response
}

fn error_envelope(
    state: &AppState,
    request: &ChatTurnRequest,
    fsm: &Arc<Mutex<DialogueFsm>>,
    watchdog: &StageWatchdog,
    error: &Error,
) -> ChatTurnResponse {
    let code = ErrorCode::from_error(error);
    fsm.lock().handle_error(code, Some(&error.to_string()));
    let latency = watchdog.finish_request();
    tracing::error!(
        request_id = %request.request_id,
        code = ?code,
        error = %error,
        "pipeline_error"
    );
    error_response(
        request.request_id,
        request.session_id.clone(),
        code,
        fallback_text(&state.config, code),
        latency.total,
    )
}

fn low_confidence_envelope(
    state: &AppState,
    request: &ChatTurnRequest,
    watchdog: &StageWatchdog,
    analysis: &AnalysisResult,
) -> ChatTurnResponse {
    let latency = watchdog.finish_request();
    tracing::info!(
        request_id = %request.request_id,
        confidence = analysis.intent_confidence,
        "pipeline_error: low confidence, no clarification available"
    );
    ResponseBuilder::new(request.request_id, request.session_id.clone())
        .state(DialogueState::Fallback)
        .message(fallback_text(&state.config, ErrorCode::LowConfidence))
        .intent(analysis.intent.clone(), analysis.intent_confidence)
        .confidence(analysis.intent_confidence)
        .action(Action::FallbackGeneric)
        .latency(latency)
        .error(ErrorCode::LowConfidence, false)
        .metadata(ResponseMetadata {
            degraded_mode: Some(true),
            ..Default::default()
        })
        .build()
}

async fn clarify_envelope(
    state: &AppState,
    request: &ChatTurnRequest,
    fsm: &Arc<Mutex<DialogueFsm>>,
    watchdog: &StageWatchdog,
    analysis: &AnalysisResult,
    clarification: Clarification,
    history_lines: &[String],
) -> ChatTurnResponse {
    let question = if state.config.pipeline.enable_llm_fallback {
        rephrase(&*state.gateway, &clarification.question, history_lines).await
    } else {
        clarification.question.clone()
    };

    let attempt = fsm.lock().clarification_attempts();
    TraceEvent::ClarificationTriggered {
        request_id: request.request_id,
        session_id: request.session_id.clone(),
        kind: clarification.kind.as_str().to_string(),
        attempt,
    }
    .emit();
    tracing::info!(
        request_id = %request.request_id,
        kind = clarification.kind.as_str(),
        attempt,
        "clarification_triggered"
    );

    let latency = watchdog.finish_request();
    fsm.lock()
        .push_exchange(HistoryRole::Assistant, question.clone());
    clarification_response(
        request.request_id,
        request.session_id.clone(),
        question,
        analysis.intent_confidence,
        attempt,
        latency,
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SYSTEM_PROMPT: &str = "Eres un asistente conversacional útil y conciso. \
Responde en el idioma del usuario.";

/// System prompt + trailing history window + the current user message.
pub(crate) fn build_messages(
    state: &AppState,
    pre: &PreprocessResult,
    fsm: &Arc<Mutex<DialogueFsm>>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
    messages.extend(chat_history(state, fsm));
    messages.push(ChatMessage::user(pre.normalized_text.clone()));
    messages
}

/// The trailing window as gateway messages, excluding the current user
/// message (pushed at turn start).
fn chat_history(state: &AppState, fsm: &Arc<Mutex<DialogueFsm>>) -> Vec<ChatMessage> {
    let window = state.config.pipeline.history_window;
    let mut entries = fsm.lock().recent_history(window + 1);
    // Drop the current turn's own user message.
    entries.pop();
    entries
        .into_iter()
        .map(|entry| match entry.role {
            HistoryRole::User => ChatMessage::user(entry.content),
            HistoryRole::Assistant => ChatMessage::assistant(entry.content),
        })
        .collect()
}

fn rendered_history(state: &AppState, fsm: &Arc<Mutex<DialogueFsm>>) -> Vec<String> {
    chat_history(state, fsm)
        .into_iter()
        .map(|m| format!("{}: {}", role_name(&m), m.content))
        .collect()
}

fn role_name(message: &ChatMessage) -> &'static str {
    match message.role {
        charla_providers::ChatRole::System => "system",
        charla_providers::ChatRole::User => "usuario",
        charla_providers::ChatRole::Assistant => "asistente",
    }
}

pub(crate) fn generation_opts(
    state: &AppState,
    request: &ChatTurnRequest,
    watchdog: &StageWatchdog,
) -> ChatOptions {
    let llm = &state.config.llm;
    let budget_ms = watchdog
        .budgets()
        .generation_ms
        .min(watchdog.remaining_budget());
    ChatOptions {
        model: request.context.as_ref().and_then(|c| c.model.clone()),
        temperature: request
            .context
            .as_ref()
            .and_then(|c| c.temperature)
            .unwrap_or(llm.temperature),
        timeout: Duration::from_millis(budget_ms),
        max_tokens: request
            .options
            .as_ref()
            .and_then(|o| o.max_tokens)
            .or(Some(llm.max_tokens)),
        enable_fallback: true,
    }
}
