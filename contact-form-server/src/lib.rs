pub mod config;
mod error;
pub mod handler;
pub mod hcaptcha;
pub mod ingestion;
pub mod mailer;
pub mod message;

pub use error::ContactFormError;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use config::Config;
use handler::{send_email, ContactFormHandler};
use ingestion::ensure_upload_dir;
use mailer::MailSender;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Room for the text fields and multipart framing.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Whole-request cap, in multiples of the per-file limit. Extra `file` parts
/// are drained and ignored, but their bytes still count towards this cap.
const REQUEST_LIMIT_FILES: u64 = 4;

const HEALTH_MESSAGE: &str = "API Server for PrintMaster3D is running correctly.";

pub fn router<M: MailSender + 'static>(config: &Config, handler: Arc<ContactFormHandler<M>>) -> Router {
    let body_limit = request_body_limit(config.uploads.max_file_size);
    Router::new()
        .route("/", get(health))
        .route("/api/send-email", post(send_email::<M>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&config.allowed_origins))
        .with_state(handler)
}

/// Binds the configured port and serves until Ctrl-C or SIGTERM.
pub async fn serve<M: MailSender + 'static>(config: Config, mail_sender: M) -> anyhow::Result<()> {
    ensure_upload_dir(&config.uploads.directory).await?;
    let handler = Arc::new(ContactFormHandler::new(&config, mail_sender));
    let app = router(&config, handler);

    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(address).await?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("Server shut down");
    Ok(())
}

fn request_body_limit(max_file_size: u64) -> usize {
    let limit = max_file_size
        .saturating_mul(REQUEST_LIMIT_FILES)
        .saturating_add(FORM_OVERHEAD_BYTES);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

async fn health() -> &'static str {
    HEALTH_MESSAGE
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
