use crate::{config::MailSettings, ingestion::Submission, ContactFormError};
use serde::Serialize;
use tinytemplate::TinyTemplate;

const SUBJECT_TEMPLATE_NAME: &str = "contact-subject";
const BODY_TEMPLATE_NAME: &str = "contact-email";
const SUBJECT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-subject.txt"
));
const BODY_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-email.html"
));

pub const DEFAULT_ATTACHMENT_NAME: &str = "attachment";
pub const DEFAULT_ATTACHMENT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryMessage {
    pub to: String,
    pub from: String,
    pub reply_to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<MessageAttachment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub mime_type: String,
}

#[derive(Serialize)]
struct Context<'a> {
    name: &'a str,
    email: &'a str,
    message: &'a str,
}

impl DeliveryMessage {
    /// Fills in the notification templates. Submitted values are inserted
    /// verbatim, markup included.
    pub fn compose(
        submission: &Submission<'_>,
        mail: &MailSettings,
        attachment: Option<MessageAttachment>,
    ) -> Result<Self, ContactFormError> {
        let mut tt = TinyTemplate::new();
        tt.add_template(SUBJECT_TEMPLATE_NAME, SUBJECT_TEMPLATE)
            .map_err(template_error)?;
        tt.add_template(BODY_TEMPLATE_NAME, BODY_TEMPLATE)
            .map_err(template_error)?;
        let context = Context {
            name: submission.name,
            email: submission.email,
            message: submission.message,
        };
        Ok(Self {
            to: mail.to.clone(),
            from: mail.from.clone(),
            reply_to: submission.email.into(),
            subject: tt
                .render(SUBJECT_TEMPLATE_NAME, &context)
                .map_err(template_error)?,
            html_body: tt
                .render(BODY_TEMPLATE_NAME, &context)
                .map_err(template_error)?,
            attachments: attachment.into_iter().collect(),
        })
    }
}

fn template_error(error: tinytemplate::error::Error) -> ContactFormError {
    ContactFormError::DeliveryFailed(format!("Error building message: {error}"))
}
