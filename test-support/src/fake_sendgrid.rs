use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

const MAIL_SEND_PATH: &str = "/v3/mail/send";

/// A SendGrid `mail/send` endpoint which records every message it accepts.
#[derive(Clone)]
pub struct FakeSendGrid {
    api_key: Cow<'static, str>,
    failure_status: Option<StatusCode>,
    messages: Arc<Mutex<Vec<Value>>>,
}

impl FakeSendGrid {
    pub fn new(api_key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            api_key: api_key.into(),
            failure_status: None,
            messages: Default::default(),
        }
    }

    /// Answers every authorised request with `status` instead of accepting it.
    pub fn fail_with(self, status: StatusCode) -> Self {
        Self {
            failure_status: Some(status),
            ..self
        }
    }

    /// Serves on an ephemeral port and returns the `mail/send` URL.
    pub async fn start(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(MAIL_SEND_PATH, post(send))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{MAIL_SEND_PATH}")
    }

    pub fn received_messages(&self) -> Vec<Value> {
        self.messages.lock().unwrap().clone()
    }
}

async fn send(
    State(state): State<FakeSendGrid>,
    headers: HeaderMap,
    Json(message): Json<Value>,
) -> Response {
    let expected = format!("Bearer {}", state.api_key);
    let authorised = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected);
    if !authorised {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "The provided authorization grant is invalid, expired, or revoked",
        );
    }
    if let Some(status) = state.failure_status {
        return error_response(status, "Simulated provider failure");
    }
    state.messages.lock().unwrap().push(message);
    StatusCode::ACCEPTED.into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"errors": [{"message": message, "field": null, "help": null}]})),
    )
        .into_response()
}
