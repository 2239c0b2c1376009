use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/siteverify";

/// An hCaptcha `siteverify` endpoint which accepts a single secret and,
/// optionally, a single response token.
#[derive(Clone)]
pub struct FakeHCaptcha {
    required_secret: Cow<'static, str>,
    required_response: Option<String>,
    return_server_error: bool,
    return_invalid_response: bool,
    requests: Arc<Mutex<Vec<VerifyRequest>>>,
    on_request: Option<Arc<dyn Fn() + Send + Sync>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VerifyRequest {
    pub secret: String,
    pub response: String,
    #[serde(default)]
    pub remoteip: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    success: bool,
    #[serde(rename = "error-codes", skip_serializing_if = "Vec::is_empty")]
    error_codes: Vec<&'static str>,
}

impl FakeHCaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_response: None,
            return_server_error: false,
            return_invalid_response: false,
            requests: Default::default(),
            on_request: None,
        }
    }

    pub fn require_response(self, required_response: impl AsRef<str>) -> Self {
        Self {
            required_response: Some(required_response.as_ref().into()),
            ..self
        }
    }

    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    /// Runs `hook` whenever a verification request arrives, before answering it.
    pub fn on_request(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            on_request: Some(Arc::new(hook)),
            ..self
        }
    }

    /// Serves on an ephemeral port and returns the verify URL.
    pub async fn start(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{VERIFY_PATH}")
    }

    pub fn received_requests(&self) -> Vec<VerifyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn verify(State(state): State<FakeHCaptcha>, Form(request): Form<VerifyRequest>) -> Response {
    state.requests.lock().unwrap().push(request.clone());
    if let Some(hook) = &state.on_request {
        hook();
    }
    if state.return_server_error {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
    } else if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if request.secret != state.required_secret {
        rejection("invalid-input-secret")
    } else if state
        .required_response
        .as_ref()
        .is_some_and(|required| *required != request.response)
    {
        rejection("invalid-input-response")
    } else {
        Json(VerifyResponse {
            success: true,
            error_codes: vec![],
        })
        .into_response()
    }
}

fn rejection(code: &'static str) -> Response {
    Json(VerifyResponse {
        success: false,
        error_codes: vec![code],
    })
    .into_response()
}
