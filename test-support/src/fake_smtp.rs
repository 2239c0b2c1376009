use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::{
    sync::watch::{self, error::RecvError, Receiver, Sender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "contact-form.test";

#[derive(Clone)]
struct RecordingHandler {
    buffer: Vec<u8>,
    mails: Arc<Sender<String>>,
}

impl Handler for RecordingHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buffer.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let mail = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        debug!("Fake SMTP server received:\n{mail}");
        let _ = self.mails.send(mail);
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> mailin_embedded::Response {
        debug!("Fake SMTP server accepted credentials for {authentication_id}");
        mailin_embedded::response::AUTH_OK
    }
}

/// An SMTP server on [SMTP_PORT] which keeps the most recent message it
/// received. Tests sharing it must run serially.
pub struct FakeSmtpServer {
    server: std::sync::Mutex<Option<Server<RecordingHandler>>>,
    mails: tokio::sync::Mutex<Receiver<String>>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(String::new());
        let handler = RecordingHandler {
            buffer: Vec::new(),
            mails: Arc::new(sender),
        };
        Self {
            server: std::sync::Mutex::new(Some(configure(Server::new(handler), SMTP_PORT))),
            mails: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Starts serving on a background thread. Later calls do nothing.
    pub fn start(&self) {
        let server = self.server.lock().unwrap().take();
        if let Some(server) = server {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    /// Waits for the next message to arrive and returns its raw content.
    pub async fn last_mail_content(&self) -> Result<String, RecvError> {
        let mut receiver = self.mails.lock().await;
        receiver.changed().await?;
        let content = receiver.borrow_and_update().clone();
        Ok(content)
    }

    /// Discards any message left over from an earlier test.
    pub async fn flush(&self) {
        let mut receiver = self.mails.lock().await;
        let _ = timeout(Duration::from_millis(100), receiver.changed()).await;
        receiver.borrow_and_update();
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct PoisonedHandler;

impl Handler for PoisonedHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts an SMTP server on [POISONED_SMTP_PORT] which refuses every session.
pub fn start_poisoned_smtp_server() {
    let server = configure(Server::new(PoisonedHandler), POISONED_SMTP_PORT);
    std::thread::spawn(move || {
        let _ = server.serve();
    });
}

fn configure<H: Handler + Clone + Send + 'static>(mut server: Server<H>, port: u16) -> Server<H> {
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("127.0.0.1:{port}"))
        .unwrap();
    server
}
