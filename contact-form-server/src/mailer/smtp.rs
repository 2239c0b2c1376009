use super::{MailSendError, MailSender};
use crate::{config::SmtpSettings, message::DeliveryMessage};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    message::{
        header::ContentType, Attachment, Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

pub struct SmtpMailSender {
    settings: SmtpSettings,
    mailer: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailSender {
    pub fn new(settings: SmtpSettings) -> Self {
        Self {
            settings,
            mailer: Default::default(),
        }
    }

    async fn initialise_mailer(
        &self,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error> {
        let smtp_url = self.settings.url.as_str();
        info!("initialise_mailer: Connecting to {smtp_url}");
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(smtp_url)?
            .authentication(vec![Mechanism::Plain, Mechanism::Login]);

        // Sending credentials over a non-TLS connection is risky, so we only set the credentials
        // when the connection URL is over TLS. If the environment is misconfigured so that
        // the credentials are not sent, the connection will be rejected. This is better than a
        // security breach.
        if smtp_url.starts_with("smtps://") {
            match (&self.settings.username, &self.settings.password) {
                (Some(username), Some(password)) => {
                    builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
                }
                _ => warn!("No SMTP credentials configured for {smtp_url}"),
            }
        }

        Ok(builder.build())
    }

    fn build_email(message: &DeliveryMessage) -> Result<Message, MailSendError> {
        let builder = Message::builder()
            .from(parse_mailbox(&message.from)?)
            .reply_to(parse_mailbox(&message.reply_to)?)
            .to(parse_mailbox(&message.to)?)
            .subject(message.subject.as_str());
        let email = if message.attachments.is_empty() {
            builder
                .header(ContentType::TEXT_HTML)
                .body(message.html_body.clone())
        } else {
            let mut parts = MultiPart::mixed().singlepart(SinglePart::html(message.html_body.clone()));
            for attachment in &message.attachments {
                let content_type = ContentType::parse(&attachment.mime_type).map_err(|error| {
                    MailSendError::InvalidMessage(format!(
                        "Invalid content type {}: {error}",
                        attachment.mime_type
                    ))
                })?;
                parts = parts.singlepart(
                    Attachment::new(attachment.filename.clone())
                        .body(attachment.content.clone(), content_type),
                );
            }
            builder.multipart(parts)
        };
        email.map_err(|error| MailSendError::InvalidMessage(error.to_string()))
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, message: &DeliveryMessage) -> Result<(), MailSendError> {
        let email = Self::build_email(message)?;
        let mailer = self
            .mailer
            .get_or_try_init(self.initialise_mailer())
            .await
            .map_err(|e| MailSendError::Transport(format!("Unable to connect to SMTP server: {e}")))?;
        mailer
            .send(email)
            .await
            .map_err(|error| MailSendError::Transport(error.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailSendError> {
    address
        .parse()
        .map_err(|_| MailSendError::InvalidMessage(format!("Invalid email address {address}")))
}

#[cfg(test)]
mod tests {
    use super::SmtpMailSender;
    use crate::{
        config::SmtpSettings,
        mailer::{MailSendError, MailSender},
        message::{DeliveryMessage, MessageAttachment},
    };
    use googletest::prelude::*;
    use serial_test::serial;
    use std::{sync::OnceLock, time::Duration};
    use test_support::fake_smtp::{
        start_poisoned_smtp_server, FakeSmtpServer, POISONED_SMTP_PORT, SMTP_PORT,
    };
    use tokio::time::timeout;

    fn message() -> DeliveryMessage {
        DeliveryMessage {
            to: "Site owner <owner@example.com>".into(),
            from: "Web contact form <noreply@example.com>".into(),
            reply_to: "mario@example.com".into(),
            subject: "Nuova richiesta da Mario Rossi - PrintMaster 3D".into(),
            html_body: "<p>Richiedo preventivo</p>".into(),
            attachments: vec![],
        }
    }

    fn sender(url: impl Into<String>) -> SmtpMailSender {
        SmtpMailSender::new(SmtpSettings {
            url: url.into(),
            username: None,
            password: None,
        })
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn delivers_html_message() {
        init().await;
        let subject = sender(format!("smtp://127.0.0.1:{SMTP_PORT}"));

        let result = subject.send(&message()).await;

        expect_that!(result, ok(anything()));
        expect_that!(
            timeout(Duration::from_secs(1), fake_smtp().last_mail_content()).await,
            ok(ok(all!(
                contains_substring("To: \"Site owner\" <owner@example.com>"),
                contains_substring("From: \"Web contact form\" <noreply@example.com>"),
                contains_substring("Reply-To: mario@example.com"),
                contains_substring("Subject: Nuova richiesta da Mario Rossi - PrintMaster 3D"),
                contains_substring("Content-Type: text/html"),
                contains_substring("<p>Richiedo preventivo</p>")
            )))
        );
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn delivers_attachment() {
        init().await;
        let subject = sender(format!("smtp://127.0.0.1:{SMTP_PORT}"));
        let message = DeliveryMessage {
            attachments: vec![MessageAttachment {
                filename: "model.stl".into(),
                content: b"solid cube".to_vec(),
                mime_type: "model/stl".into(),
            }],
            ..message()
        };

        let result = subject.send(&message).await;

        expect_that!(result, ok(anything()));
        expect_that!(
            timeout(Duration::from_secs(1), fake_smtp().last_mail_content()).await,
            ok(ok(all!(
                contains_substring("multipart/mixed"),
                contains_substring("Content-Disposition: attachment"),
                contains_substring("model.stl"),
                contains_substring("model/stl")
            )))
        );
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn fails_when_smtp_server_refuses_message() {
        init().await;
        start_poisoned_smtp_server();
        let subject = sender(format!("smtp://127.0.0.1:{POISONED_SMTP_PORT}"));

        let result = subject.send(&message()).await;

        expect_that!(result, err(matches_pattern!(MailSendError::Transport(anything()))));
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn fails_when_smtp_server_is_unreachable() {
        init().await;
        let subject = sender("smtp://127.0.0.1:1");

        let result = subject.send(&message()).await;

        expect_that!(result, err(matches_pattern!(MailSendError::Transport(anything()))));
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn rejects_invalid_reply_to_without_sending() {
        init().await;
        let subject = sender(format!("smtp://127.0.0.1:{SMTP_PORT}"));
        let message = DeliveryMessage {
            reply_to: "not an address".into(),
            ..message()
        };

        let result = subject.send(&message).await;

        expect_that!(
            result,
            err(matches_pattern!(MailSendError::InvalidMessage(contains_substring(
                "not an address"
            ))))
        );
        expect_that!(
            timeout(Duration::from_millis(200), fake_smtp().last_mail_content()).await,
            err(anything())
        );
    }

    async fn init() {
        fake_smtp().start();
        fake_smtp().flush().await;
    }

    fn fake_smtp() -> &'static FakeSmtpServer {
        static FAKE_SMTP: OnceLock<FakeSmtpServer> = OnceLock::new();
        FAKE_SMTP.get_or_init(FakeSmtpServer::new)
    }
}
