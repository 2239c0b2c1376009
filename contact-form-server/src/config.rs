use std::{fmt::Display, path::PathBuf, str::FromStr};
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_UPLOAD_DIR: &str = "./temp_uploads";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:8080",
    "http://localhost:5173",
    "http://localhost:4000",
    "http://localhost:4001",
    "https://printmaster3d.netlify.app",
    "https://printmaster3d.it",
    "https://www.printmaster3d.it",
    "https://licciardellogiuseppept.netlify.app",
];

const HCAPTCHA_VERIFY_URL: &str = "https://hcaptcha.com/siteverify";
const SMTP_URL: &str = "smtps://smtp.gmail.com";
const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const TO_ADDRESS: &str = "PrintMaster 3D <tecnolife46@gmail.com>";

/// Everything the server needs, resolved once at startup and handed to the
/// pipeline by value.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub uploads: UploadSettings,
    pub hcaptcha: HCaptchaSettings,
    pub mail: MailSettings,
    pub mail_provider: MailProviderSettings,
}

#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub directory: PathBuf,
    pub max_file_size: u64,
}

#[derive(Clone, Debug)]
pub struct HCaptchaSettings {
    /// Absence is only reported when a submission needs verifying.
    pub secret: Option<String>,
    pub verify_url: String,
}

#[derive(Clone, Debug)]
pub struct MailSettings {
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug)]
pub enum MailProviderSettings {
    Smtp(SmtpSettings),
    SendGrid(SendGridSettings),
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SendGridSettings {
    pub api_key: String,
    pub api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, EnvironmentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvironmentError> {
        let env = Lookup(&lookup);
        let hcaptcha_secret = env.optional("HCAPTCHA_SECRET_KEY");
        if hcaptcha_secret.is_none() {
            warn!("HCAPTCHA_SECRET_KEY is not set; contact form submissions will be refused");
        }
        Ok(Self {
            port: env.parse_or("PORT", DEFAULT_PORT)?,
            allowed_origins: env
                .optional("ALLOWED_ORIGINS")
                .map(|origins| parse_origins(&origins))
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()),
            uploads: UploadSettings {
                directory: env
                    .optional("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
                max_file_size: env.parse_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            },
            hcaptcha: HCaptchaSettings {
                secret: hcaptcha_secret,
                verify_url: env.or("HCAPTCHA_VERIFY_URL", HCAPTCHA_VERIFY_URL),
            },
            mail: MailSettings {
                from: env.required("MAIL_FROM")?,
                to: env.or("MAIL_TO", TO_ADDRESS),
            },
            mail_provider: Self::mail_provider(&env)?,
        })
    }

    fn mail_provider(env: &Lookup<'_>) -> Result<MailProviderSettings, EnvironmentError> {
        match env.or("MAIL_PROVIDER", "sendgrid").to_ascii_lowercase().as_str() {
            "smtp" => Ok(MailProviderSettings::Smtp(SmtpSettings {
                url: env.or("SMTP_URL", SMTP_URL),
                username: env.optional("SMTP_USERNAME"),
                password: env.optional("SMTP_PASSWORD"),
            })),
            "sendgrid" => Ok(MailProviderSettings::SendGrid(SendGridSettings {
                api_key: env.required("SENDGRID_API_KEY")?,
                api_url: env.or("SENDGRID_API_URL", SENDGRID_API_URL),
            })),
            other => Err(EnvironmentError::InvalidVariable {
                key: "MAIL_PROVIDER",
                value: other.into(),
                reason: "expected \"smtp\" or \"sendgrid\"".into(),
            }),
        }
    }
}

struct Lookup<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Lookup<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, EnvironmentError> {
        self.optional(key)
            .ok_or(EnvironmentError::MissingVariable(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.into()
        })
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, EnvironmentError>
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        let Some(value) = self.optional(key) else {
            info!("{key} not set, using default: {default}");
            return Ok(default);
        };
        value
            .parse()
            .map_err(|error: T::Err| EnvironmentError::InvalidVariable {
                key,
                value,
                reason: error.to_string(),
            })
    }
}

fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug)]
pub enum EnvironmentError {
    MissingVariable(&'static str),
    InvalidVariable {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for EnvironmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentError::MissingVariable(key) => {
                write!(f, "Missing environment variable {key}")
            }
            EnvironmentError::InvalidVariable { key, value, reason } => {
                write!(f, "Invalid value {value:?} for {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for EnvironmentError {}

#[cfg(test)]
mod tests {
    use super::{Config, EnvironmentError, MailProviderSettings, DEFAULT_ALLOWED_ORIGINS};
    use googletest::prelude::*;
    use std::{collections::HashMap, path::PathBuf};

    fn load(vars: &[(&str, &str)]) -> std::result::Result<Config, EnvironmentError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults_for_sendgrid_configuration() -> Result<()> {
        let config = load(&[
            ("MAIL_FROM", "noreply@example.com"),
            ("SENDGRID_API_KEY", "SG.key"),
        ])
        .unwrap();

        verify_that!(config.port, eq(10000))?;
        verify_that!(config.uploads.max_file_size, eq(10 * 1024 * 1024))?;
        verify_that!(config.uploads.directory, eq(PathBuf::from("./temp_uploads")))?;
        verify_that!(config.hcaptcha.secret, none())?;
        verify_that!(config.allowed_origins.len(), eq(DEFAULT_ALLOWED_ORIGINS.len()))?;
        let MailProviderSettings::SendGrid(sendgrid) = config.mail_provider else {
            return fail!("Expected SendGrid provider");
        };
        verify_that!(sendgrid.api_key, eq("SG.key"))?;
        verify_that!(sendgrid.api_url, eq("https://api.sendgrid.com/v3/mail/send"))
    }

    #[test]
    fn selects_smtp_provider() -> Result<()> {
        let config = load(&[
            ("MAIL_FROM", "noreply@example.com"),
            ("MAIL_PROVIDER", "SMTP"),
            ("SMTP_URL", "smtp://localhost:2525"),
            ("HCAPTCHA_SECRET_KEY", "0xsecret"),
        ])
        .unwrap();

        verify_that!(config.hcaptcha.secret, some(eq("0xsecret")))?;
        let MailProviderSettings::Smtp(smtp) = config.mail_provider else {
            return fail!("Expected SMTP provider");
        };
        verify_that!(smtp.url, eq("smtp://localhost:2525"))?;
        verify_that!(smtp.username, none())
    }

    #[test]
    fn splits_allowed_origins() -> Result<()> {
        let config = load(&[
            ("MAIL_FROM", "noreply@example.com"),
            ("SENDGRID_API_KEY", "SG.key"),
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
        ])
        .unwrap();

        verify_that!(
            config.allowed_origins,
            elements_are![eq("https://a.example"), eq("https://b.example")]
        )
    }

    #[test]
    fn rejects_missing_sender() -> Result<()> {
        let error = load(&[("SENDGRID_API_KEY", "SG.key")]).unwrap_err();

        verify_that!(error.to_string(), contains_substring("MAIL_FROM"))
    }

    #[test]
    fn rejects_missing_sendgrid_key() -> Result<()> {
        let error = load(&[("MAIL_FROM", "noreply@example.com")]).unwrap_err();

        verify_that!(error.to_string(), contains_substring("SENDGRID_API_KEY"))
    }

    #[test]
    fn rejects_unparseable_port() -> Result<()> {
        let error = load(&[
            ("MAIL_FROM", "noreply@example.com"),
            ("SENDGRID_API_KEY", "SG.key"),
            ("PORT", "eighty"),
        ])
        .unwrap_err();

        verify_that!(
            error.to_string(),
            eq("Invalid value \"eighty\" for PORT: invalid digit found in string")
        )
    }

    #[test]
    fn rejects_unknown_mail_provider() -> Result<()> {
        let error = load(&[
            ("MAIL_FROM", "noreply@example.com"),
            ("MAIL_PROVIDER", "carrier-pigeon"),
        ])
        .unwrap_err();

        verify_that!(error.to_string(), contains_substring("MAIL_PROVIDER"))
    }
}
