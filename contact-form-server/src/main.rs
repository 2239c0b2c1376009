use contact_form_server::{
    config::{Config, MailProviderSettings},
    mailer::{SendGridMailSender, SmtpMailSender},
    serve,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = Config::from_env()?;
    match config.mail_provider.clone() {
        MailProviderSettings::Smtp(settings) => {
            info!("Delivering mail over SMTP");
            serve(config, SmtpMailSender::new(settings)).await
        }
        MailProviderSettings::SendGrid(settings) => {
            info!("Delivering mail through SendGrid");
            serve(config, SendGridMailSender::new(settings)).await
        }
    }
}
