use crate::{
    config::{Config, MailSettings, UploadSettings},
    hcaptcha::HCaptchaVerifier,
    ingestion::ingest,
    mailer::MailSender,
    message::DeliveryMessage,
    ContactFormError,
};
use axum::{
    extract::{multipart::MultipartRejection, ConnectInfo, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::{debug, info};

const SUCCESS_MESSAGE: &str = "Email sent successfully!";

/// Runs one submission through ingestion, verification and delivery.
pub struct ContactFormHandler<M: MailSender> {
    uploads: UploadSettings,
    verifier: HCaptchaVerifier,
    mail: MailSettings,
    mail_sender: M,
}

#[derive(Serialize)]
struct SuccessBody {
    message: &'static str,
}

impl<M: MailSender> ContactFormHandler<M> {
    pub fn new(config: &Config, mail_sender: M) -> Self {
        Self {
            uploads: config.uploads.clone(),
            verifier: HCaptchaVerifier::new(config.hcaptcha.clone()),
            mail: config.mail.clone(),
            mail_sender,
        }
    }

    /// The staged upload, if any, is owned by the parsed form and removed when
    /// this returns, whichever way it returns.
    pub async fn process_submission(
        &self,
        remote_ip: Option<IpAddr>,
        multipart: Multipart,
    ) -> Result<(), ContactFormError> {
        let form = ingest(&self.uploads, multipart).await?;
        let submission = form.validate()?;
        self.verifier
            .verify_token(submission.captcha_token, remote_ip)
            .await?;
        let attachment = match form.upload() {
            Some(upload) => {
                let attachment = upload.read_attachment().await?;
                debug!(
                    "Attaching {} ({} bytes)",
                    upload.original_name(),
                    upload.size_bytes()
                );
                Some(attachment)
            }
            None => None,
        };
        let message = DeliveryMessage::compose(&submission, &self.mail, attachment)?;
        self.mail_sender.send(&message).await?;
        info!(
            "Delivered contact form message from {} with {} attachment(s)",
            submission.email,
            message.attachments.len()
        );
        Ok(())
    }
}

pub async fn send_email<M: MailSender>(
    State(handler): State<Arc<ContactFormHandler<M>>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = match multipart {
        Ok(multipart) => handler.process_submission(Some(remote.ip()), multipart).await,
        Err(rejection) => Err(ContactFormError::MalformedForm(rejection.body_text())),
    };
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(SuccessBody {
                message: SUCCESS_MESSAGE,
            }),
        )
            .into_response(),
        Err(error) => {
            error.log();
            error.into_response()
        }
    }
}
