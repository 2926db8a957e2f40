//! Scenegen HTTP 服务
//!
//! 启动: cargo run --bin scenegen-web --features web
//! 默认监听 127.0.0.1:8080（[server] bind 或 SCENEGEN__SERVER__BIND 覆盖）

#![cfg(feature = "web")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use scenegen::config::load_config;
use scenegen::core::{ChatRequest, ChatResponse, OrchestratorBuilder, OrchestratorError};
use scenegen::SceneOrchestrator;

type AppState = Arc<SceneOrchestrator>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRequest {
    conversation_id: String,
}

fn error_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Upstream(_)
        | OrchestratorError::MissingCredentials(_)
        | OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /chat：失败时同样返回完整响应（空 actions + reasoning），包括请求体无法解析的情况
async fn api_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::warn!("Rejected chat body: {}", rejection.body_text());
            let reasoning = format!("invalid request: {}", rejection.body_text());
            return (StatusCode::BAD_REQUEST, Json(ChatResponse::failure("", reasoning))).into_response();
        }
    };
    let conversation_id = req.conversation_id.clone();
    match state.handle_chat(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            tracing::error!("[{}] chat failed: {}", conversation_id, e);
            (error_status(&e), Json(ChatResponse::failure(conversation_id, e.to_string()))).into_response()
        }
    }
}

/// POST /api/session/clear
async fn api_session_clear(
    State(state): State<AppState>,
    Json(req): Json<ConversationRequest>,
) -> Response {
    let cleared = state.clear_session(&req.conversation_id).await;
    Json(json!({ "conversationId": req.conversation_id, "cleared": cleared })).into_response()
}

/// GET /api/scene/:conversationId
async fn api_scene(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scene_snapshot(&id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown conversation {id}") })),
        )
            .into_response(),
    }
}

/// POST /api/scene/export
async fn api_scene_export(
    State(state): State<AppState>,
    Json(req): Json<ConversationRequest>,
) -> Response {
    match state.export_scene(&req.conversation_id).await {
        Ok(exported) => Json(exported).into_response(),
        Err(e) => {
            tracing::error!("[{}] export failed: {}", req.conversation_id, e);
            (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// GET /api/jobs/:id
async fn api_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.job_status(&id) {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no live job {id}") })),
        )
            .into_response(),
    }
}

async fn api_health(State(state): State<AppState>) -> Response {
    let manager = state.manager();
    Json(json!({
        "status": "ok",
        "sessions": state.sessions().len().await,
        "generationJobs": manager.in_flight(),
        "generationBudget": manager.budget(),
        "llmTokens": state.token_usage().map(|(prompt, completion, total)| json!({
            "prompt": prompt,
            "completion": completion,
            "total": total,
        })),
    }))
    .into_response()
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(api_chat))
        .route("/api/chat", post(api_chat))
        .route("/api/session/clear", post(api_session_clear))
        .route("/api/scene/export", post(api_scene_export))
        .route("/api/scene/:id", get(api_scene))
        .route("/api/jobs/:id", get(api_job))
        .route("/api/health", get(api_health))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scenegen::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let bind = cfg.server.bind.clone();

    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to build orchestrator")?;
    let state: AppState = Arc::new(orchestrator);

    // 定期回收空闲会话
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut cleanup_timer = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            cleanup_timer.tick().await;
            let expired = sweeper.sessions().cleanup_expired().await;
            if expired > 0 {
                tracing::info!("Cleaned up {} expired sessions", expired);
            }
        }
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("Scenegen listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down");
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use scenegen::config::AppConfig;
    use scenegen::generation::ScriptedGenerationApi;
    use scenegen::llm::MockLlmClient;
    use scenegen::store::InMemoryBlobStore;
    use tower::ServiceExt;

    fn app() -> Router {
        let orchestrator = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .with_generation_api(Arc::new(ScriptedGenerationApi::new()))
            .with_store(Arc::new(InMemoryBlobStore::new()))
            .build()
            .unwrap();
        router(Arc::new(orchestrator))
    }

    async fn post_chat(body: &'static str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_response_shape() {
        let (status, body) = post_chat("{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["actions"], json!([]));
        assert!(body["reasoning"].as_str().unwrap().starts_with("invalid request"));
        assert_eq!(body["conversationId"], "");
    }

    #[tokio::test]
    async fn test_missing_conversation_id_keeps_response_shape() {
        let (status, body) = post_chat(r#"{"input":"Add a microscope"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["actions"], json!([]));
    }

    #[tokio::test]
    async fn test_empty_input_is_bad_request() {
        let (status, body) = post_chat(r#"{"input":"  ","conversationId":"c1"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["conversationId"], "c1");
        assert_eq!(body["actions"], json!([]));
    }

    #[tokio::test]
    async fn test_health_reports_token_usage() {
        let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["llmTokens"]["total"], 0);
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let (status, body) = post_chat(r#"{"input":"Add a microscope","conversationId":"c1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updateType"], "ADD_ASSETS");
        assert_eq!(body["actions"][0]["type"], "ADD_ASSET");
    }
}
