use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::Value;
use tracing::{error, warn};

use super::{error_response, AppState};
use crate::llm::{Completion, CompletionRequest, LlmError};

/// Prompt in, completion out
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<Completion>, (StatusCode, Json<Value>)> {
    let Some(provider) = state.llm.as_ref() else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "AI generation is not configured",
        ));
    };

    provider.complete(request).await.map(Json).map_err(|e| match e {
        LlmError::InvalidRequest { message } => error_response(StatusCode::BAD_REQUEST, message),
        LlmError::RateLimited { .. } => {
            warn!("LLM provider is rate limiting requests");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "AI provider is busy, please try again later",
            )
        }
        other => {
            error!("AI generation failed: {}", other);
            error_response(StatusCode::BAD_GATEWAY, "AI generation failed")
        }
    })
}
