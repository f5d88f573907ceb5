use axum::{extract::State, http::StatusCode, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::api::models::{ErrorResponse, GenerateResponse};
use crate::app_state::AppState;
use crate::features;
use crate::llm::inference::{self, GenerationParams, MAX_NEW_TOKENS_LIMIT};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl ToString) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn internal_error(message: impl ToString) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

pub async fn root(State(state): State<Arc<AppState>>) -> String {
    format!("{} inference server is running", state.model_name)
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Some(message) = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
    else {
        return Err(bad_request("missing required field `message`"));
    };

    tracing::info!(message_len = message.len(), "generate request");

    let overrides = state
        .scaler
        .overrides_from_json(&payload)
        .map_err(internal_error)?;
    let scaled = state.scaler.transform(&overrides);
    let prompt = features::build_prompt(message, &scaled);

    let max_new_tokens = match payload.get("max_new_tokens") {
        None | Some(Value::Null) => state.generation.max_new_tokens,
        Some(value) => value
            .as_u64()
            .ok_or_else(|| internal_error("`max_new_tokens` must be a positive integer"))?
            as usize,
    }
    .min(MAX_NEW_TOKENS_LIMIT);

    let encoding = state
        .tokenizer
        .encode(prompt.as_str(), true)
        .map_err(|e| internal_error(e.to_string()))?;

    let params = GenerationParams {
        max_new_tokens,
        ..state.generation.clone()
    };
    let output_ids = inference::generate(
        encoding.get_ids(),
        state.model.as_ref(),
        &state.device,
        &params,
        &state.special,
    )
    .map_err(|e| internal_error(e.to_string()))?;

    let response = state
        .tokenizer
        .decode(&output_ids, true)
        .map_err(|e| internal_error(e.to_string()))?;

    tracing::info!(response_len = response.len(), "generate response");

    Ok(Json(GenerateResponse {
        message: message.to_string(),
        response,
    }))
}
