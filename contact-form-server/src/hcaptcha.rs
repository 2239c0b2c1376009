use crate::{config::HCaptchaSettings, ContactFormError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::debug;

pub const HCAPTCHA_SECRET_NAME: &str = "HCAPTCHA_SECRET_KEY";

pub struct HCaptchaVerifier {
    client: Client,
    settings: HCaptchaSettings,
}

impl HCaptchaVerifier {
    pub fn new(settings: HCaptchaSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    /// Asks hCaptcha whether `token` was solved by a human. An `Ok` result
    /// always means the token was accepted.
    pub async fn verify_token(
        &self,
        token: &str,
        remote_ip: Option<IpAddr>,
    ) -> Result<VerificationResult, VerificationError> {
        let Some(secret) = self.settings.secret.as_deref() else {
            return Err(VerificationError::MissingSecret);
        };
        let remote_ip = remote_ip.map(|ip| ip.to_string()).unwrap_or_default();
        let payload = HCaptchaVerifyPayload {
            secret,
            response: token,
            remoteip: &remote_ip,
        };
        let response = self
            .client
            .post(&self.settings.verify_url)
            .form(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(VerificationError::Unavailable)?;
        let body: HCaptchaResponse = response
            .json()
            .await
            .map_err(VerificationError::Unavailable)?;
        let result = VerificationResult {
            accepted: body.success,
            error_codes: body.error_codes,
        };
        if result.accepted {
            debug!("hCaptcha accepted token from {remote_ip}");
            Ok(result)
        } else {
            Err(VerificationError::Rejected(result.error_codes))
        }
    }
}

#[derive(Serialize)]
struct HCaptchaVerifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
    remoteip: &'a str,
}

#[derive(Deserialize)]
struct HCaptchaResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub accepted: bool,
    pub error_codes: Vec<String>,
}

#[derive(Debug)]
pub enum VerificationError {
    MissingSecret,
    Unavailable(reqwest::Error),
    Rejected(Vec<String>),
}

impl From<VerificationError> for ContactFormError {
    fn from(error: VerificationError) -> Self {
        match error {
            VerificationError::MissingSecret => {
                ContactFormError::ConfigurationError(HCAPTCHA_SECRET_NAME)
            }
            VerificationError::Unavailable(error) => {
                ContactFormError::VerificationUnavailable(error.to_string())
            }
            VerificationError::Rejected(codes) => ContactFormError::VerificationRejected(codes),
        }
    }
}

impl std::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationError::MissingSecret => write!(f, "{HCAPTCHA_SECRET_NAME} not set"),
            VerificationError::Unavailable(error) => write!(f, "hCaptcha unavailable: {error}"),
            VerificationError::Rejected(codes) => write!(f, "Token rejected: {codes:?}"),
        }
    }
}

impl std::error::Error for VerificationError {}
