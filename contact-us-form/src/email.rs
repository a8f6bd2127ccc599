use crate::{
    email_address::EmailAddress,
    secrets::{SecretError, SecretFetcher},
};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// A message ready to hand to an [`EmailSender`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEmail {
    pub source_email_address: EmailAddress,
    pub reply_to_email_addresses: Vec<EmailAddress>,
    pub to_email_addresses: Vec<EmailAddress>,
    pub subject: String,
    pub message: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends the email and returns the identifier the transport assigned to it.
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailSendError>;
}

#[derive(Debug, Error)]
pub enum EmailSendError {
    /// The transport refused the message and said why.
    #[error("{0}")]
    Rejected(String),
    /// Anything else. The source is only for the logs.
    #[error("An unknown error occurred.")]
    Unknown(#[source] lambda_http::Error),
}

#[derive(Deserialize)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}

#[derive(Debug, Error)]
enum MailerError {
    #[error("SmtpCredentialsParameterPath parameter is not set.")]
    MissingCredentialsPath,
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("SMTP credentials are malformed: {0}")]
    MalformedCredentials(#[from] serde_json::Error),
    #[error("Invalid SMTP URL: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Sends email through an SMTP relay, such as the SES SMTP interface.
pub struct SmtpEmailSender<SecretFetcherT: SecretFetcher> {
    smtp_url: String,
    credentials_parameter_path: Option<String>,
    secret_fetcher: SecretFetcherT,
    mailer: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl<SecretFetcherT: SecretFetcher> SmtpEmailSender<SecretFetcherT> {
    pub fn new(
        smtp_url: impl Into<String>,
        credentials_parameter_path: Option<String>,
        secret_fetcher: SecretFetcherT,
    ) -> Self {
        Self {
            smtp_url: smtp_url.into(),
            credentials_parameter_path,
            secret_fetcher,
            mailer: OnceCell::new(),
        }
    }

    async fn initialise_mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailerError> {
        info!("Connecting to SMTP server {}", self.smtp_url);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&self.smtp_url)?
            .authentication(vec![Mechanism::Plain]);

        // Credentials only go over TLS. Without them a relay that needs authentication rejects
        // the message.
        if self.smtp_url.starts_with("smtps://") {
            let path = self
                .credentials_parameter_path
                .as_deref()
                .ok_or(MailerError::MissingCredentialsPath)?;
            let raw_credentials = self.secret_fetcher.get_parameter(path, true).await?;
            let credentials: SmtpCredentials = serde_json::from_str(&raw_credentials)?;
            builder = builder.credentials(Credentials::new(
                credentials.username,
                credentials.password,
            ));
        }

        Ok(builder.build())
    }

    fn build_message(email: &OutboundEmail, message_id: &str) -> Result<Message, EmailSendError> {
        let mut builder = Message::builder()
            .message_id(Some(format!(
                "<{message_id}@{}>",
                email.source_email_address.domain()
            )))
            .from(mailbox(&email.source_email_address)?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for address in &email.reply_to_email_addresses {
            builder = builder.reply_to(mailbox(address)?);
        }
        for address in &email.to_email_addresses {
            builder = builder.to(mailbox(address)?);
        }
        builder
            .body(email.message.clone())
            .map_err(|error| EmailSendError::Rejected(format!("Error building message: {error}")))
    }
}

fn mailbox(address: &EmailAddress) -> Result<Mailbox, EmailSendError> {
    address
        .as_str()
        .parse::<Address>()
        .map(|address| Mailbox::new(None, address))
        .map_err(|error| {
            EmailSendError::Rejected(format!(
                "Email address {} is not accepted: {error}",
                address.as_str()
            ))
        })
}

#[async_trait]
impl<SecretFetcherT: SecretFetcher> EmailSender for SmtpEmailSender<SecretFetcherT> {
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailSendError> {
        let message_id = Uuid::new_v4().to_string();
        let message = Self::build_message(email, &message_id)?;
        let mailer = self
            .mailer
            .get_or_try_init(self.initialise_mailer())
            .await
            .map_err(|error| {
                error!("Unable to set up SMTP transport: {error}");
                EmailSendError::Unknown(Box::new(error))
            })?;
        match mailer.send(message).await {
            Ok(_) => Ok(message_id),
            Err(error) if error.is_permanent() || error.is_transient() => {
                Err(EmailSendError::Rejected(format!("Error sending message: {error}")))
            }
            Err(error) => Err(EmailSendError::Unknown(Box::new(error))),
        }
    }
}
