use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::{
    net::{IpAddr, TcpListener},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        watch::{self, error::RecvError, Receiver, Sender},
        Mutex,
    },
    time::timeout,
};

const SERVER_NAME: &str = "contact-us.test";

/// Per-session state. mailin clones the handler for every connection.
#[derive(Clone)]
struct MailSink {
    reject_transactions: bool,
    current_message: Vec<u8>,
    delivered: Arc<Sender<String>>,
}

impl MailSink {
    fn greet(&self) -> Response {
        if self.reject_transactions {
            response::INTERNAL_ERROR
        } else {
            response::OK
        }
    }
}

impl Handler for MailSink {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> Response {
        self.greet()
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> Response {
        self.greet()
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.current_message.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let message = std::mem::take(&mut self.current_message);
        let message = String::from_utf8_lossy(&message).into_owned();
        debug!("Fake SMTP server received:\n{message}");
        self.delivered.send_replace(message);
        response::OK
    }
}

/// Configures a [`FakeSmtpServer`].
#[derive(Default)]
pub struct FakeSmtpServerBuilder {
    reject_transactions: bool,
}

impl FakeSmtpServerBuilder {
    /// Answers every greeting and sender with a transient `451` error.
    pub fn reject_transactions(self) -> Self {
        Self {
            reject_transactions: true,
        }
    }

    /// Binds an ephemeral port and serves on a background thread.
    ///
    /// The socket is bound before this returns, so clients may connect immediately.
    pub fn start(self) -> FakeSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let (sender, receiver) = watch::channel(String::new());
        let mut server = Server::new(MailSink {
            reject_transactions: self.reject_transactions,
            current_message: Vec::new(),
            delivered: Arc::new(sender),
        });
        server
            .with_name(SERVER_NAME)
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_tcp_listener(listener);
        std::thread::spawn(move || {
            if let Err(error) = server.serve() {
                debug!("Fake SMTP server stopped: {error}");
            }
        });
        FakeSmtpServer {
            url: format!("smtp://{address}"),
            received: Mutex::new(receiver),
        }
    }
}

/// A local SMTP server that records the messages it accepts.
pub struct FakeSmtpServer {
    url: String,
    received: Mutex<Receiver<String>>,
}

impl FakeSmtpServer {
    pub fn builder() -> FakeSmtpServerBuilder {
        FakeSmtpServerBuilder::default()
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Waits for a message not yet seen and returns its raw content.
    pub async fn last_mail_content(&self) -> Result<String, RecvError> {
        let mut received = self.received.lock().await;
        received.changed().await?;
        let value = received.borrow_and_update().clone();
        Ok(value)
    }

    /// Marks any message received so far as seen.
    pub async fn flush(&self) {
        let mut received = self.received.lock().await;
        let _ = timeout(Duration::from_millis(100), received.changed()).await;
        let _ = received.borrow_and_update();
    }
}
