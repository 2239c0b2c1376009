use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::borrow::Cow;
use tracing::{error, warn};

#[derive(Debug)]
pub enum ContactFormError {
    PayloadTooLarge { max_file_size: u64, detail: String },
    MalformedForm(String),
    UploadStorageError(String),
    MissingFields,
    MissingCaptchaToken,
    ConfigurationError(&'static str),
    VerificationUnavailable(String),
    VerificationRejected(Vec<String>),
    AttachmentReadError(String),
    DeliveryFailed(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "errorCodes", skip_serializing_if = "Option::is_none")]
    error_codes: Option<Vec<String>>,
}

impl ContactFormError {
    pub fn status(&self) -> StatusCode {
        match self {
            ContactFormError::PayloadTooLarge { .. }
            | ContactFormError::MissingFields
            | ContactFormError::MissingCaptchaToken => StatusCode::BAD_REQUEST,
            ContactFormError::VerificationRejected(_) => StatusCode::UNAUTHORIZED,
            ContactFormError::MalformedForm(_)
            | ContactFormError::UploadStorageError(_)
            | ContactFormError::ConfigurationError(_)
            | ContactFormError::VerificationUnavailable(_)
            | ContactFormError::AttachmentReadError(_)
            | ContactFormError::DeliveryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the person filling in the form.
    pub fn message(&self) -> Cow<'static, str> {
        let message = match self {
            ContactFormError::PayloadTooLarge { max_file_size, .. } => {
                return Cow::Owned(format!(
                    "File is too large (max {})",
                    describe_size(*max_file_size)
                ))
            }
            ContactFormError::MalformedForm(_) => "Error parsing form data",
            ContactFormError::UploadStorageError(_) => "Error storing uploaded file",
            ContactFormError::MissingFields => "Missing required fields",
            ContactFormError::MissingCaptchaToken => "hCaptcha token is missing. Please try again.",
            ContactFormError::ConfigurationError(_) => {
                "Server configuration error: HCAPTCHA_SECRET_KEY not set."
            }
            ContactFormError::VerificationUnavailable(_) => {
                "Could not verify hCaptcha. Please try again later."
            }
            ContactFormError::VerificationRejected(_) => {
                "hCaptcha verification failed. Please try again."
            }
            ContactFormError::AttachmentReadError(_) => "Error processing attachment",
            ContactFormError::DeliveryFailed(_) => "Error sending email",
        };
        Cow::Borrowed(message)
    }

    fn detail(&self) -> Option<String> {
        match self {
            ContactFormError::PayloadTooLarge { detail, .. }
            | ContactFormError::MalformedForm(detail)
            | ContactFormError::UploadStorageError(detail)
            | ContactFormError::VerificationUnavailable(detail)
            | ContactFormError::AttachmentReadError(detail)
            | ContactFormError::DeliveryFailed(detail) => Some(detail.clone()),
            ContactFormError::ConfigurationError(key) => Some(format!("{key} is not configured")),
            ContactFormError::MissingFields
            | ContactFormError::MissingCaptchaToken
            | ContactFormError::VerificationRejected(_) => None,
        }
    }

    pub fn log(&self) {
        if self.status().is_client_error() {
            warn!("Client error handling contact form submission: {self}");
        } else {
            error!("Internal error handling contact form submission: {self}");
        }
    }
}

impl IntoResponse for ContactFormError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.message(),
            error: self.detail(),
            error_codes: match &self {
                ContactFormError::VerificationRejected(codes) => Some(codes.clone()),
                _ => None,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

impl std::fmt::Display for ContactFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactFormError::PayloadTooLarge { detail, .. } => {
                write!(f, "Payload too large: {detail}")
            }
            ContactFormError::MalformedForm(detail) => write!(f, "Malformed form: {detail}"),
            ContactFormError::UploadStorageError(detail) => {
                write!(f, "Could not stage upload: {detail}")
            }
            ContactFormError::MissingFields => write!(f, "Missing fields in request"),
            ContactFormError::MissingCaptchaToken => write!(f, "Missing hCaptcha token"),
            ContactFormError::ConfigurationError(key) => write!(f, "Missing configuration {key}"),
            ContactFormError::VerificationUnavailable(detail) => {
                write!(f, "hCaptcha verification unavailable: {detail}")
            }
            ContactFormError::VerificationRejected(codes) => {
                write!(f, "hCaptcha verification rejected: {codes:?}")
            }
            ContactFormError::AttachmentReadError(detail) => {
                write!(f, "Could not read attachment: {detail}")
            }
            ContactFormError::DeliveryFailed(detail) => write!(f, "Error sending message: {detail}"),
        }
    }
}

impl std::error::Error for ContactFormError {}

const MEGABYTE: u64 = 1024 * 1024;

fn describe_size(bytes: u64) -> String {
    if bytes >= MEGABYTE && bytes % MEGABYTE == 0 {
        format!("{}MB", bytes / MEGABYTE)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::ContactFormError;
    use axum::{body::to_bytes, response::IntoResponse};
    use googletest::prelude::*;
    use serde_json::{json, Value};

    async fn render(error: ContactFormError) -> (u16, Value) {
        let response = error.into_response();
        let status = response.status().as_u16();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_fields_is_bad_request_without_detail() -> Result<()> {
        let (status, body) = render(ContactFormError::MissingFields).await;

        verify_that!(status, eq(400))?;
        verify_that!(body, eq(json!({"message": "Missing required fields"})))
    }

    #[tokio::test]
    async fn rejection_echoes_error_codes() -> Result<()> {
        let (status, body) = render(ContactFormError::VerificationRejected(vec![
            "invalid-input-response".into(),
        ]))
        .await;

        verify_that!(status, eq(401))?;
        verify_that!(
            body,
            eq(json!({
                "message": "hCaptcha verification failed. Please try again.",
                "errorCodes": ["invalid-input-response"],
            }))
        )
    }

    #[tokio::test]
    async fn delivery_failure_carries_provider_message() -> Result<()> {
        let (status, body) =
            render(ContactFormError::DeliveryFailed("550 mailbox unavailable".into())).await;

        verify_that!(status, eq(500))?;
        verify_that!(
            body,
            eq(json!({
                "message": "Error sending email",
                "error": "550 mailbox unavailable",
            }))
        )
    }

    #[tokio::test]
    async fn oversized_upload_is_bad_request() -> Result<()> {
        let (status, body) = render(ContactFormError::PayloadTooLarge {
            max_file_size: 10 * 1024 * 1024,
            detail: "too big".into(),
        })
        .await;

        verify_that!(status, eq(400))?;
        verify_that!(body["message"], eq(json!("File is too large (max 10MB)")))
    }

    #[tokio::test]
    async fn oversized_upload_reports_configured_limit() -> Result<()> {
        let (_, body) = render(ContactFormError::PayloadTooLarge {
            max_file_size: 25 * 1024 * 1024,
            detail: "too big".into(),
        })
        .await;

        verify_that!(body["message"], eq(json!("File is too large (max 25MB)")))
    }

    #[tokio::test]
    async fn oversized_upload_reports_odd_limit_in_bytes() -> Result<()> {
        let (_, body) = render(ContactFormError::PayloadTooLarge {
            max_file_size: 1500,
            detail: "too big".into(),
        })
        .await;

        verify_that!(body["message"], eq(json!("File is too large (max 1500 bytes)")))
    }

    #[tokio::test]
    async fn missing_secret_is_internal_error() -> Result<()> {
        let (status, body) =
            render(ContactFormError::ConfigurationError("HCAPTCHA_SECRET_KEY")).await;

        verify_that!(status, eq(500))?;
        verify_that!(
            body["message"],
            eq(json!("Server configuration error: HCAPTCHA_SECRET_KEY not set."))
        )
    }
}
