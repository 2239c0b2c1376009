use super::{MailSendError, MailSender};
use crate::{config::SendGridSettings, message::DeliveryMessage};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lettre::message::Mailbox;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// Delivers through the SendGrid v3 `mail/send` endpoint.
pub struct SendGridMailSender {
    client: Client,
    settings: SendGridSettings,
}

#[derive(Serialize)]
struct SendGridMail<'a> {
    personalizations: [Personalization; 1],
    from: EmailAddress,
    reply_to: EmailAddress,
    subject: &'a str,
    content: [Content<'a>; 1],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendGridAttachment<'a>>,
}

#[derive(Serialize)]
struct Personalization {
    to: [EmailAddress; 1],
}

#[derive(Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Serialize)]
struct SendGridAttachment<'a> {
    content: String,
    filename: &'a str,
    #[serde(rename = "type")]
    mime_type: &'a str,
    disposition: &'static str,
}

impl SendGridMailSender {
    pub fn new(settings: SendGridSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    fn build_payload(message: &DeliveryMessage) -> Result<SendGridMail<'_>, MailSendError> {
        Ok(SendGridMail {
            personalizations: [Personalization {
                to: [email_address(&message.to)?],
            }],
            from: email_address(&message.from)?,
            reply_to: email_address(&message.reply_to)?,
            subject: &message.subject,
            content: [Content {
                content_type: "text/html",
                value: &message.html_body,
            }],
            attachments: message
                .attachments
                .iter()
                .map(|attachment| SendGridAttachment {
                    content: STANDARD.encode(&attachment.content),
                    filename: &attachment.filename,
                    mime_type: &attachment.mime_type,
                    disposition: "attachment",
                })
                .collect(),
        })
    }
}

#[async_trait]
impl MailSender for SendGridMailSender {
    async fn send(&self, message: &DeliveryMessage) -> Result<(), MailSendError> {
        let payload = Self::build_payload(message)?;
        let response = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| MailSendError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            debug!("SendGrid accepted message with status {status}");
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|error| format!("(unreadable body: {error})"));
        Err(MailSendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn email_address(address: &str) -> Result<EmailAddress, MailSendError> {
    let mailbox: Mailbox = address
        .parse()
        .map_err(|_| MailSendError::InvalidMessage(format!("Invalid email address {address}")))?;
    Ok(EmailAddress {
        email: mailbox.email.to_string(),
        name: mailbox.name,
    })
}

#[cfg(test)]
mod tests {
    use super::SendGridMailSender;
    use crate::{
        config::SendGridSettings,
        mailer::{MailSendError, MailSender},
        message::{DeliveryMessage, MessageAttachment},
    };
    use googletest::prelude::*;
    use serde_json::json;
    use test_support::fake_sendgrid::FakeSendGrid;

    const API_KEY: &str = "SG.fake-key";

    fn message() -> DeliveryMessage {
        DeliveryMessage {
            to: "Site owner <owner@example.com>".into(),
            from: "noreply@example.com".into(),
            reply_to: "mario@example.com".into(),
            subject: "Nuova richiesta da Mario Rossi - PrintMaster 3D".into(),
            html_body: "<p>Richiedo preventivo</p>".into(),
            attachments: vec![],
        }
    }

    async fn sender(fake: &FakeSendGrid, api_key: &str) -> SendGridMailSender {
        SendGridMailSender::new(SendGridSettings {
            api_key: api_key.into(),
            api_url: fake.start().await,
        })
    }

    #[tokio::test]
    async fn posts_message_envelope() -> Result<()> {
        let fake = FakeSendGrid::new(API_KEY);
        let subject = sender(&fake, API_KEY).await;

        subject.send(&message()).await.unwrap();

        verify_that!(
            fake.received_messages(),
            elements_are![eq(json!({
                "personalizations": [{"to": [{"email": "owner@example.com", "name": "Site owner"}]}],
                "from": {"email": "noreply@example.com"},
                "reply_to": {"email": "mario@example.com"},
                "subject": "Nuova richiesta da Mario Rossi - PrintMaster 3D",
                "content": [{"type": "text/html", "value": "<p>Richiedo preventivo</p>"}],
            }))]
        )
    }

    #[tokio::test]
    async fn encodes_attachment_as_base64() -> Result<()> {
        let fake = FakeSendGrid::new(API_KEY);
        let subject = sender(&fake, API_KEY).await;
        let message = DeliveryMessage {
            attachments: vec![MessageAttachment {
                filename: "model.stl".into(),
                content: b"solid cube".to_vec(),
                mime_type: "model/stl".into(),
            }],
            ..message()
        };

        subject.send(&message).await.unwrap();

        let received = fake.received_messages();
        verify_that!(received.len(), eq(1))?;
        verify_that!(
            received[0]["attachments"],
            eq(json!([{
                "content": "c29saWQgY3ViZQ==",
                "filename": "model.stl",
                "type": "model/stl",
                "disposition": "attachment",
            }]))
        )
    }

    #[tokio::test]
    async fn reports_provider_rejection() -> Result<()> {
        let fake = FakeSendGrid::new(API_KEY);
        let subject = sender(&fake, "SG.revoked-key").await;

        let result = subject.send(&message()).await;

        verify_that!(
            result,
            err(matches_pattern!(MailSendError::Rejected {
                status: eq(401),
                body: contains_substring("authorization"),
            }))
        )?;
        verify_that!(fake.received_messages(), empty())
    }

    #[tokio::test]
    async fn reports_unreachable_provider() -> Result<()> {
        let subject = SendGridMailSender::new(SendGridSettings {
            api_key: API_KEY.into(),
            api_url: "http://127.0.0.1:1/v3/mail/send".into(),
        });

        let result = subject.send(&message()).await;

        verify_that!(result, err(matches_pattern!(MailSendError::Transport(anything()))))
    }
}
