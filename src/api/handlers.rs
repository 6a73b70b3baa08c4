//! HTTP request handlers

use super::types::{ChatRequest, ChatResponse, CreateConversationResponse, ErrorResponse, OutcomeInfo};
use super::AppState;
use crate::recording::RecordedInteraction;
use crate::runtime::EngineError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations/:id/chat", post(send_chat))
        .route("/api/conversations/:id/recording", get(get_recording))
        .route("/api/conversations/:id", delete(delete_conversation))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn create_conversation(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), AppError> {
    let (id, outputs) = state.open_conversation().await?;
    Ok((StatusCode::CREATED, Json(CreateConversationResponse { id, outputs })))
}

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }

    let conversation = state.conversation(&id).await.ok_or_else(|| not_found(&id))?;
    let mut conversation = conversation.lock().await;
    let outcome = conversation.engine.execute_with_input(&req.text).await;
    let outputs = conversation.output.drain();
    let outcome = outcome?;

    Ok(Json(ChatResponse {
        outputs,
        outcome: OutcomeInfo::from(&outcome),
        module: conversation.engine.current_module().map(str::to_string),
    }))
}

async fn get_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordedInteraction>, AppError> {
    let conversation = state.conversation(&id).await.ok_or_else(|| not_found(&id))?;
    let recording = conversation.lock().await.engine.recording();
    Ok(Json(recording))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.close_conversation(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

async fn get_version() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Conversation not found: {id}"))
}

// ============================================================
// Error handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        tracing::error!(error = %error, "Turn failed");
        match error {
            EngineError::NotStarted => AppError::BadRequest(error.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::compiler::fixtures::bike_shop;
    use crate::config::Configuration;
    use crate::llm::{LlmService, ModelRegistry};
    use crate::recording::Interaction;
    use crate::runtime::testing::MockLlmService;
    use crate::runtime::Services;
    use std::sync::Arc;

    fn app_state(mock: &Arc<MockLlmService>) -> AppState {
        let configuration = Configuration::default();
        let service: Arc<dyn LlmService> = mock.clone();
        let services = Services::new(Arc::new(ModelRegistry::single(service)), &configuration);
        let chatbot = compile(&bike_shop(), &configuration).unwrap();
        AppState::new(Arc::new(chatbot), Arc::new(services))
    }

    async fn open(state: &AppState) -> String {
        let (status, Json(created)) = create_conversation(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.outputs.len(), 1);
        assert_eq!(created.outputs[0].text, "Hello");
        created.id
    }

    fn chat(text: &str) -> Json<ChatRequest> {
        Json(ChatRequest {
            text: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_chat_returns_buffered_outputs() {
        let mock = Arc::new(MockLlmService::new("mock"));
        let state = app_state(&mock);
        let id = open(&state).await;

        mock.queue_text("Thought: Do I need to use a tool? No\nAI: 9am–5:30pm");
        let Json(response) = send_chat(State(state.clone()), Path(id.clone()), chat("Hours?"))
            .await
            .unwrap();

        assert_eq!(response.outcome, OutcomeInfo::Quiescent);
        assert_eq!(response.module.as_deref(), Some("top-level"));
        let texts: Vec<&str> = response.outputs.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["9am–5:30pm"]);

        let Json(recording) = get_recording(State(state), Path(id)).await.unwrap();
        assert_eq!(recording.interactions.len(), 3);
        assert_eq!(recording.interactions[1], Interaction::User("Hours?".into()));
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let mock = Arc::new(MockLlmService::new("mock"));
        let state = app_state(&mock);
        let first = open(&state).await;
        let second = open(&state).await;
        assert_ne!(first, second);

        mock.queue_text("AI: We are open until 5:30pm");
        send_chat(State(state.clone()), Path(first.clone()), chat("Until when?"))
            .await
            .unwrap();

        let Json(untouched) = get_recording(State(state), Path(second)).await.unwrap();
        assert_eq!(untouched.interactions.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_deleted_conversations() {
        let mock = Arc::new(MockLlmService::new("mock"));
        let state = app_state(&mock);

        let result = send_chat(State(state.clone()), Path("missing".into()), chat("hi")).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let id = open(&state).await;
        let result = send_chat(State(state.clone()), Path(id.clone()), chat("   ")).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        assert_eq!(
            delete_conversation(State(state.clone()), Path(id.clone())).await.unwrap(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(state.conversation_count().await, 0);
        let result = delete_conversation(State(state.clone()), Path(id.clone())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(get_recording(State(state), Path(id)).await.is_err());
        assert!(mock.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_router() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        async fn body_json(response: Response) -> serde_json::Value {
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }

        let mock = Arc::new(MockLlmService::new("mock"));
        let app = create_router(app_state(&mock));

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["outputs"][0]["text"], "Hello");

        mock.queue_text("Thought: Do I need to use a tool? No\nAI: 9am–5:30pm");
        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/api/conversations/{id}/chat"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text": "Hours?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let chat = body_json(response).await;
        assert_eq!(chat["outcome"]["status"], "quiescent");
        assert_eq!(chat["outputs"][0]["text"], "9am–5:30pm");

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/conversations/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::get(format!("/api/conversations/{id}/recording"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains(&id));
    }
}
