mod sendgrid;
mod smtp;

pub use sendgrid::SendGridMailSender;
pub use smtp::SmtpMailSender;

use crate::{message::DeliveryMessage, ContactFormError};
use async_trait::async_trait;
use std::fmt::Display;

/// Hands a composed message to a delivery provider. One call is one delivery
/// attempt.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &DeliveryMessage) -> Result<(), MailSendError>;
}

#[derive(Debug)]
pub enum MailSendError {
    InvalidMessage(String),
    Transport(String),
    Rejected { status: u16, body: String },
}

impl From<MailSendError> for ContactFormError {
    fn from(error: MailSendError) -> Self {
        ContactFormError::DeliveryFailed(error.to_string())
    }
}

impl Display for MailSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailSendError::InvalidMessage(description) => {
                write!(f, "Error building message: {description}")
            }
            MailSendError::Transport(description) => write!(f, "Error sending message: {description}"),
            MailSendError::Rejected { status, body } => {
                write!(f, "Provider rejected message with status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for MailSendError {}
