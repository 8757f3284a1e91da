use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::protocol::Protocol;
use crate::provider::{ChatProvider, ModelDescriptor};
use crate::proxy::{self, SseStream};
use crate::translate::errors::map_error;
use crate::translate::request;
use crate::translate::response::{render_anthropic, render_gemini, render_openai};
use crate::translate::streaming::{AnthropicFraming, GeminiFraming, OpenAiFraming};
use crate::translate::{anthropic_types, gemini_types, openai_types};

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const GEMINI_METHODS: &[&str] = &["generateContent", "streamGenerateContent", "countTokens"];

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub provider: Arc<dyn ChatProvider>,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/openai/v1/chat/completions", post(handle_chat_completions))
        .route("/openai/v1/models", get(handle_openai_models))
        .route("/openai/v1/models/:id", get(handle_openai_model))
        .route("/anthropic/v1/messages", post(handle_messages))
        .route("/anthropic/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/anthropic/v1/models", get(handle_anthropic_models))
        .route("/anthropic/v1/models/:id", get(handle_anthropic_model))
        .route("/gemini/v1beta/models", get(handle_gemini_models))
        // `:model` captures `<id>:<method>` for POST and the bare id for GET
        .route(
            "/gemini/v1beta/models/:model",
            get(handle_gemini_model).post(handle_gemini_method),
        )
        .route("/health", get(handle_health))
        .route("/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(state: &AppState, protocol: Protocol, err: &GatewayError) -> Response {
    let (kind, message) = err.classify();
    let (status, body) = map_error(kind, &message, protocol);
    let level = if status.is_server_error() {
        LogLevel::Error
    } else {
        LogLevel::Warn
    };
    state.logger.log_with_context(
        level,
        "server",
        format!("{protocol} request failed: {message}"),
        serde_json::json!({"protocol": protocol.name(), "status": status.as_u16()}),
    );
    (status, Json(body)).into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::malformed(format!("Invalid request body: {e}")))
}

fn sse_response(stream: SseStream) -> Response {
    let events = stream.map(|sse_event| -> std::result::Result<Event, Infallible> {
        let event = Event::default().data(sse_event.data);
        Ok(match sse_event.event {
            Some(name) => event.event(name),
            None => event,
        })
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn log_request(state: &AppState, protocol: Protocol, req: &crate::canonical::NormalizedRequest) {
    state.logger.info(
        "server",
        format!(
            "Request: protocol={} model={} streaming={} messages={} tools={}",
            protocol,
            req.model,
            req.stream,
            req.messages.len(),
            req.options.tools.len()
        ),
    );
}

// -- Protocol A: Chat Completions --

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    chat_completions(&state, &body)
        .await
        .unwrap_or_else(|e| error_response(&state, Protocol::OpenAi, &e))
}

async fn chat_completions(state: &Arc<AppState>, body: &Bytes) -> Result<Response> {
    let mut req: openai_types::ChatCompletionRequest = parse_body(body)?;
    req.model = req
        .model
        .map(|m| state.config.resolve_model(Protocol::OpenAi, &m));
    let normalized = request::openai::normalize(&req)?;
    log_request(state, Protocol::OpenAi, &normalized);

    if normalized.stream {
        let framing = OpenAiFraming::new(&normalized.model, request::openai::include_usage(&req));
        let stream = proxy::run_stream(
            state.provider.clone(),
            state.logger.clone(),
            Protocol::OpenAi,
            normalized,
            framing,
            CancellationToken::new(),
        )
        .await?;
        return Ok(sse_response(stream));
    }

    let (result, usage) =
        proxy::run_batch(&state.provider, &state.logger, Protocol::OpenAi, &normalized).await?;
    Ok(Json(render_openai(&result, &normalized.model, usage)).into_response())
}

fn openai_model(model: ModelDescriptor) -> openai_types::ModelObject {
    openai_types::ModelObject {
        id: model.id,
        object: "model".to_string(),
        created: model.created,
        owned_by: model.owned_by,
    }
}

async fn handle_openai_models(State(state): State<Arc<AppState>>) -> Response {
    match state.provider.list_models().await {
        Ok(models) => Json(openai_types::ModelList {
            object: "list".to_string(),
            data: models.into_iter().map(openai_model).collect(),
        })
        .into_response(),
        Err(e) => error_response(&state, Protocol::OpenAi, &e),
    }
}

async fn handle_openai_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.provider.get_model(&id).await {
        Ok(model) => Json(openai_model(model)).into_response(),
        Err(e) => error_response(&state, Protocol::OpenAi, &e),
    }
}

// -- Protocol B: Messages --

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    messages(&state, &body)
        .await
        .unwrap_or_else(|e| error_response(&state, Protocol::Anthropic, &e))
}

fn parse_messages_request(state: &AppState, body: &Bytes) -> Result<anthropic_types::MessagesRequest> {
    let mut req: anthropic_types::MessagesRequest = parse_body(body)?;
    req.model = req
        .model
        .map(|m| state.config.resolve_model(Protocol::Anthropic, &m));
    Ok(req)
}

async fn messages(state: &Arc<AppState>, body: &Bytes) -> Result<Response> {
    let req = parse_messages_request(state, body)?;
    let normalized = request::anthropic::normalize(&req)?;
    log_request(state, Protocol::Anthropic, &normalized);

    if normalized.stream {
        let framing = AnthropicFraming::new(&normalized.model);
        let stream = proxy::run_stream(
            state.provider.clone(),
            state.logger.clone(),
            Protocol::Anthropic,
            normalized,
            framing,
            CancellationToken::new(),
        )
        .await?;
        return Ok(sse_response(stream));
    }

    let (result, usage) =
        proxy::run_batch(&state.provider, &state.logger, Protocol::Anthropic, &normalized).await?;
    Ok(Json(render_anthropic(&result, &normalized.model, usage)).into_response())
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let counted = async {
        let req = parse_messages_request(&state, &body)?;
        let normalized = request::anthropic::normalize(&req)?;
        Ok::<_, GatewayError>(
            proxy::count_input_tokens(state.provider.as_ref(), &normalized, &state.logger).await,
        )
    }
    .await;

    match counted {
        Ok(input_tokens) => Json(anthropic_types::CountTokensResponse { input_tokens }).into_response(),
        Err(e) => error_response(&state, Protocol::Anthropic, &e),
    }
}

fn anthropic_model(model: ModelDescriptor) -> anthropic_types::ModelInfo {
    let created_at = DateTime::<Utc>::from_timestamp(model.created, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    anthropic_types::ModelInfo {
        model_type: "model".to_string(),
        id: model.id,
        display_name: model.display_name,
        created_at,
    }
}

async fn handle_anthropic_models(State(state): State<Arc<AppState>>) -> Response {
    match state.provider.list_models().await {
        Ok(models) => {
            let data: Vec<_> = models.into_iter().map(anthropic_model).collect();
            Json(anthropic_types::ModelListResponse {
                first_id: data.first().map(|m| m.id.clone()),
                last_id: data.last().map(|m| m.id.clone()),
                has_more: false,
                data,
            })
            .into_response()
        }
        Err(e) => error_response(&state, Protocol::Anthropic, &e),
    }
}

async fn handle_anthropic_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.provider.get_model(&id).await {
        Ok(model) => Json(anthropic_model(model)).into_response(),
        Err(e) => error_response(&state, Protocol::Anthropic, &e),
    }
}

// -- Protocol C: generateContent --

async fn handle_gemini_method(
    State(state): State<Arc<AppState>>,
    Path(model_method): Path<String>,
    body: Bytes,
) -> Response {
    gemini_method(&state, &model_method, &body)
        .await
        .unwrap_or_else(|e| error_response(&state, Protocol::Gemini, &e))
}

async fn gemini_method(state: &Arc<AppState>, model_method: &str, body: &Bytes) -> Result<Response> {
    let (model, method) = model_method.rsplit_once(':').ok_or_else(|| {
        GatewayError::malformed(format!("Missing method in '{model_method}'"))
    })?;
    let model = state.config.resolve_model(Protocol::Gemini, model);

    match method {
        "generateContent" | "streamGenerateContent" => {
            let req: gemini_types::GenerateContentRequest = parse_body(body)?;
            let normalized =
                request::gemini::normalize(&model, &req, method == "streamGenerateContent")?;
            log_request(state, Protocol::Gemini, &normalized);

            if normalized.stream {
                let framing = GeminiFraming::new(&normalized.model);
                let stream = proxy::run_stream(
                    state.provider.clone(),
                    state.logger.clone(),
                    Protocol::Gemini,
                    normalized,
                    framing,
                    CancellationToken::new(),
                )
                .await?;
                return Ok(sse_response(stream));
            }

            let (result, usage) =
                proxy::run_batch(&state.provider, &state.logger, Protocol::Gemini, &normalized)
                    .await?;
            Ok(Json(render_gemini(&result, &normalized.model, usage)).into_response())
        }
        "countTokens" => {
            let mut value: serde_json::Value = parse_body(body)?;
            // Either a bare request or one wrapped in `generateContentRequest`
            if let Some(inner) = value.get_mut("generateContentRequest") {
                value = inner.take();
            }
            let req: gemini_types::GenerateContentRequest = serde_json::from_value(value)
                .map_err(|e| GatewayError::malformed(format!("Invalid request body: {e}")))?;
            let normalized = request::gemini::normalize(&model, &req, false)?;
            let total_tokens =
                proxy::count_input_tokens(state.provider.as_ref(), &normalized, &state.logger).await;
            Ok(Json(gemini_types::CountTokensResponse { total_tokens }).into_response())
        }
        other => Err(GatewayError::malformed(format!(
            "Unknown method '{other}', expected one of {}",
            GEMINI_METHODS.join(", ")
        ))),
    }
}

fn gemini_model(model: ModelDescriptor) -> gemini_types::ModelInfo {
    gemini_types::ModelInfo {
        name: format!("models/{}", model.id),
        version: "001".to_string(),
        description: format!("{} served by {}", model.display_name, model.owned_by),
        display_name: model.display_name,
        input_token_limit: model.input_token_limit,
        output_token_limit: model.output_token_limit,
        supported_generation_methods: GEMINI_METHODS.iter().map(|m| m.to_string()).collect(),
    }
}

async fn handle_gemini_models(State(state): State<Arc<AppState>>) -> Response {
    match state.provider.list_models().await {
        Ok(models) => Json(gemini_types::ModelList {
            models: models.into_iter().map(gemini_model).collect(),
        })
        .into_response(),
        Err(e) => error_response(&state, Protocol::Gemini, &e),
    }
}

async fn handle_gemini_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.provider.get_model(&id).await {
        Ok(model) => Json(gemini_model(model)).into_response(),
        Err(e) => error_response(&state, Protocol::Gemini, &e),
    }
}

// -- Operational --

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.provider.name(),
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<crate::logging::LogEntry>> {
    Json(state.logger.recent(query.limit.unwrap_or(100)))
}
