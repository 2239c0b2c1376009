use crate::{
    config::UploadSettings,
    message::{MessageAttachment, DEFAULT_ATTACHMENT_MIME_TYPE, DEFAULT_ATTACHMENT_NAME},
    ContactFormError,
};
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart,
    },
    http::StatusCode,
};
use std::{
    collections::HashMap,
    ffi::OsStr,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, error};
use uuid::Uuid;

pub const NAME_FIELD: &str = "name";
pub const EMAIL_FIELD: &str = "email";
pub const MESSAGE_FIELD: &str = "message";
pub const CAPTCHA_TOKEN_FIELD: &str = "hcaptchaToken";
pub const FILE_FIELD: &str = "file";

/// A parsed submission whose fields have not been checked yet. Owns the
/// staged upload, so dropping the form removes it.
#[derive(Debug)]
pub struct ContactForm {
    name: String,
    email: String,
    message: String,
    captcha_token: String,
    upload: Option<TemporaryUpload>,
}

#[derive(Debug)]
pub struct Submission<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub message: &'a str,
    pub captcha_token: &'a str,
}

impl ContactForm {
    pub fn validate(&self) -> Result<Submission<'_>, ContactFormError> {
        let name = self.name.trim();
        let email = self.email.trim();
        if name.is_empty() || email.is_empty() || self.message.trim().is_empty() {
            return Err(ContactFormError::MissingFields);
        }
        let captcha_token = self.captcha_token.trim();
        if captcha_token.is_empty() {
            return Err(ContactFormError::MissingCaptchaToken);
        }
        Ok(Submission {
            name,
            email,
            message: &self.message,
            captcha_token,
        })
    }

    pub fn upload(&self) -> Option<&TemporaryUpload> {
        self.upload.as_ref()
    }
}

/// An uploaded file staged on local disk for the lifetime of one request.
#[derive(Debug)]
pub struct TemporaryUpload {
    path: PathBuf,
    original_name: String,
    mime_type: String,
    size_bytes: u64,
}

impl TemporaryUpload {
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    #[cfg(test)]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub async fn read_attachment(&self) -> Result<MessageAttachment, ContactFormError> {
        let content = tokio::fs::read(&self.path).await.map_err(|error| {
            ContactFormError::AttachmentReadError(format!("{}: {error}", self.path.display()))
        })?;
        Ok(MessageAttachment {
            filename: if self.original_name.is_empty() {
                DEFAULT_ATTACHMENT_NAME.into()
            } else {
                self.original_name.clone()
            },
            content,
            mime_type: if self.mime_type.is_empty() {
                DEFAULT_ATTACHMENT_MIME_TYPE.into()
            } else {
                self.mime_type.clone()
            },
        })
    }
}

impl Drop for TemporaryUpload {
    fn drop(&mut self) {
        // Drop cannot await, so this is a blocking unlink on the calling thread.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary upload {}", self.path.display()),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => error!(
                "Could not remove temporary upload {}: {error}",
                self.path.display()
            ),
        }
    }
}

pub async fn ensure_upload_dir(directory: &Path) -> std::io::Result<()> {
    // create_dir_all already tolerates a concurrent creator winning the race.
    tokio::fs::create_dir_all(directory).await
}

pub async fn ingest(
    settings: &UploadSettings,
    mut multipart: Multipart,
) -> Result<ContactForm, ContactFormError> {
    ensure_upload_dir(&settings.directory)
        .await
        .map_err(|error| {
            ContactFormError::UploadStorageError(format!(
                "Could not create {}: {error}",
                settings.directory.display()
            ))
        })?;

    let mut fields = HashMap::new();
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| classify(error, settings))?
    {
        let Some(name) = field.name().map(String::from) else {
            continue;
        };
        match field.file_name().map(String::from) {
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|error| classify(error, settings))?;
                fields.entry(name).or_insert(value);
            }
            Some(file_name) if name == FILE_FIELD && !file_name.is_empty() => {
                if upload.is_some() {
                    debug!("Ignoring additional file {file_name}");
                    continue;
                }
                upload = Some(stage_upload(settings, field).await?);
            }
            Some(_) => continue,
        }
    }

    let mut take = |key: &str| fields.remove(key).unwrap_or_default();
    Ok(ContactForm {
        name: take(NAME_FIELD),
        email: take(EMAIL_FIELD),
        message: take(MESSAGE_FIELD),
        captcha_token: take(CAPTCHA_TOKEN_FIELD),
        upload,
    })
}

async fn stage_upload(
    settings: &UploadSettings,
    mut field: Field<'_>,
) -> Result<TemporaryUpload, ContactFormError> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let mut upload = TemporaryUpload {
        path: settings
            .directory
            .join(temporary_file_name(&original_name)),
        mime_type: field
            .content_type()
            .unwrap_or(DEFAULT_ATTACHMENT_MIME_TYPE)
            .to_string(),
        original_name,
        size_bytes: 0,
    };
    let mut file = File::create(&upload.path)
        .await
        .map_err(|error| storage_error(&upload.path, error))?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|error| classify(error, settings))?
    {
        upload.size_bytes += chunk.len() as u64;
        if upload.size_bytes > settings.max_file_size {
            return Err(ContactFormError::PayloadTooLarge {
                max_file_size: settings.max_file_size,
                detail: format!(
                    "{} exceeds the limit of {} bytes",
                    upload.original_name, settings.max_file_size
                ),
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(|error| storage_error(&upload.path, error))?;
    }
    file.flush()
        .await
        .map_err(|error| storage_error(&upload.path, error))?;
    debug!(
        "Staged {} ({} bytes) at {}",
        upload.original_name,
        upload.size_bytes,
        upload.path.display()
    );
    Ok(upload)
}

fn temporary_file_name(original_name: &str) -> String {
    let id = Uuid::new_v4();
    let extension = Path::new(original_name)
        .extension()
        .and_then(OsStr::to_str)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(extension) => format!("{id}.{extension}"),
        None => id.to_string(),
    }
}

fn classify(error: MultipartError, settings: &UploadSettings) -> ContactFormError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ContactFormError::PayloadTooLarge {
            max_file_size: settings.max_file_size,
            detail: error.body_text(),
        }
    } else {
        ContactFormError::MalformedForm(error.body_text())
    }
}

fn storage_error(path: &Path, error: std::io::Error) -> ContactFormError {
    ContactFormError::UploadStorageError(format!("{}: {error}", path.display()))
}
