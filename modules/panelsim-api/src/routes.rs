use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, warn};

use panelsim_common::{models, PanelsimError, TestConceptRequest};

use crate::AppState;

/// Map the error taxonomy onto HTTP statuses: caller mistakes are 400,
/// upstream provider failures are 502, everything else is 500.
fn status_for(error: &PanelsimError) -> StatusCode {
    match error {
        PanelsimError::Validation(_) => StatusCode::BAD_REQUEST,
        PanelsimError::Provider { .. } => StatusCode::BAD_GATEWAY,
        PanelsimError::Config(_) | PanelsimError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn test_concept(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TestConceptRequest>,
) -> impl IntoResponse {
    match state.orchestrator.process_request(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                // Full detail stays in the logs; the caller gets a generic
                // message for internal failures.
                error!(error = %e, "Concept test failed");
                (
                    status,
                    Json(serde_json::json!({ "detail": "Internal error" })),
                )
                    .into_response()
            } else {
                warn!(error = %e, "Concept test rejected");
                (status, Json(serde_json::json!({ "detail": e.to_string() }))).into_response()
            }
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

pub async fn list_models() -> impl IntoResponse {
    Json(models::catalog_json())
}

pub async fn api_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    Json(serde_json::json!({
        "name": "Panelsim API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Synthetic consumer survey responses using LLM + SSR",
        "methodology": "Semantic Similarity Rating (SSR)",
        "default_settings": {
            "generation_provider": config.default_generation_provider,
            "generation_model": config.default_generation_model,
            "embedding_provider": config.default_embedding_provider,
            "embedding_model": config.default_embedding_model,
            "vision_provider": config.default_vision_provider,
            "vision_model": config.default_vision_model,
            "video_provider": config.default_video_provider,
            "video_model": config.default_video_model,
            "temperature": config.default_temperature,
            "ssr_temperature": config.ssr_temperature,
            "concurrency_limit": config.concurrency_limit,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn validation_errors_map_to_400() {
        let error = PanelsimError::validation("bad input");
        assert_eq!(status_for(&error), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn provider_errors_map_to_502() {
        let error = PanelsimError::provider("openai", "rate limited");
        assert_eq!(status_for(&error), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn config_and_internal_errors_map_to_500() {
        assert_eq!(
            status_for(&PanelsimError::config("bad model")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&PanelsimError::Internal(anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
