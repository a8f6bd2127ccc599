mod captcha;
mod config;
mod email;
mod email_address;
mod form;
mod secrets;

use captcha::{CaptchaVerifier, TurnstileVerifier};
use config::Config;
use email::{EmailSendError, EmailSender, OutboundEmail, SmtpEmailSender};
use email_address::EmailAddress;
use form::{FormError, FormInput};
use lambda_http::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    request::RequestContext,
    run, service_fn, Body, Error, Request, RequestExt, Response,
};
use secrets::SsmParameterStore;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
const CONTENT_TYPE_JSON: &str = "application/json";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = Config::from_env();
    let secret_fetcher = SsmParameterStore::open().await;
    let email_sender = SmtpEmailSender::new(
        config.smtp_url.clone(),
        config.smtp_credentials_parameter_path.clone(),
        secret_fetcher.clone(),
    );
    let captcha_verifier = config.captcha_enabled.then(|| {
        TurnstileVerifier::new(
            secret_fetcher,
            config
                .captcha_secret_parameter_path
                .clone()
                .unwrap_or_default(),
            config.captcha_verify_url.clone(),
            config.captcha_verify_timeout,
        )
    });
    let handler = ContactFormHandler::new(config, email_sender, captcha_verifier);
    run(service_fn(|event| handler.handle(event))).await
}

struct ContactFormHandler<EmailSenderT: EmailSender, CaptchaVerifierT: CaptchaVerifier> {
    config: Config,
    email_sender: EmailSenderT,
    captcha_verifier: Option<CaptchaVerifierT>,
}

impl<EmailSenderT: EmailSender, CaptchaVerifierT: CaptchaVerifier>
    ContactFormHandler<EmailSenderT, CaptchaVerifierT>
{
    fn new(
        config: Config,
        email_sender: EmailSenderT,
        captcha_verifier: Option<CaptchaVerifierT>,
    ) -> Self {
        Self {
            config,
            email_sender,
            captcha_verifier,
        }
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let source_ip = source_ip(&event);
        let body = match event.body() {
            Body::Empty => None,
            Body::Text(text) => Some(text.as_str()),
            Body::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Some(text),
                Err(_) => {
                    let error = ContactFormError::from(FormError::MalformedJson(
                        String::from_utf8_lossy(bytes).into_owned(),
                    ));
                    error.log();
                    return Ok(error.into_response());
                }
            },
        };
        Ok(self.process(body, source_ip.as_deref()).await)
    }

    async fn process(&self, body: Option<&str>, source_ip: Option<&str>) -> Response<Body> {
        match self.process_message(body, source_ip).await {
            Ok(message_id) => {
                let result = format!("Email sent with reference number {message_id}.");
                info!("{result}");
                response(StatusCode::CREATED, CONTENT_TYPE_TEXT, result)
            }
            Err(error) => {
                error.log();
                error.into_response()
            }
        }
    }

    async fn process_message(
        &self,
        body: Option<&str>,
        source_ip: Option<&str>,
    ) -> Result<String, ContactFormError> {
        let destination = self.destination_email_address()?;
        let form = FormInput::parse(body, self.config.captcha_field())?;
        if let Some(captcha_verifier) = self.captcha_verifier()? {
            Self::verify_captcha(captcha_verifier, &form, source_ip).await?;
        }
        let email = self.compose_email(destination, form);
        Ok(self.email_sender.send(&email).await?)
    }

    fn destination_email_address(&self) -> Result<EmailAddress, ContactFormError> {
        let Some(raw) = self.config.destination_email_address.as_deref() else {
            return Err(ContactFormError::Configuration(
                "ValidatedEmailAddress parameter is not set.".into(),
            ));
        };
        EmailAddress::parse(raw).map_err(|_| {
            ContactFormError::Configuration(
                "ValidatedEmailAddress parameter is not a valid email address.".into(),
            )
        })
    }

    fn captcha_verifier(&self) -> Result<Option<&CaptchaVerifierT>, ContactFormError> {
        if !self.config.captcha_enabled {
            return Ok(None);
        }
        if self.config.captcha_token_field_name.is_none() {
            return Err(ContactFormError::Configuration(
                "CaptchaTokenFieldName parameter is not set.".into(),
            ));
        }
        if self.config.captcha_secret_parameter_path.is_none() {
            return Err(ContactFormError::Configuration(
                "CaptchaSecretKeyParameterPath parameter is not set.".into(),
            ));
        }
        match self.captcha_verifier.as_ref() {
            Some(captcha_verifier) => Ok(Some(captcha_verifier)),
            None => Err(ContactFormError::Configuration(
                "Captcha verification is enabled but no verifier is available.".into(),
            )),
        }
    }

    async fn verify_captcha(
        captcha_verifier: &CaptchaVerifierT,
        form: &FormInput,
        source_ip: Option<&str>,
    ) -> Result<(), ContactFormError> {
        let Some(token) = form.captcha_token.as_deref() else {
            return Err(FormError::MissingCaptchaToken.into());
        };
        let verified = captcha_verifier
            .verify(token, source_ip)
            .await
            .map_err(|error| {
                error!("{error}");
                ContactFormError::Configuration("Captcha secret key could not be retrieved.".into())
            })?;
        if verified {
            Ok(())
        } else {
            Err(ContactFormError::CaptchaRejected)
        }
    }

    fn compose_email(&self, destination: EmailAddress, form: FormInput) -> OutboundEmail {
        let mut subject = format!("Message from {}: {}", form.from_name, form.subject);
        if let Some(suffix) = self.config.subject_suffix.as_deref() {
            subject.push(' ');
            subject.push_str(suffix);
        }
        OutboundEmail {
            source_email_address: destination.clone(),
            reply_to_email_addresses: vec![form.from_email_address],
            to_email_addresses: vec![destination],
            subject,
            message: form.message,
        }
    }
}

fn source_ip(event: &Request) -> Option<String> {
    let from_context = match event.request_context_ref() {
        Some(RequestContext::ApiGatewayV1(context)) => context.identity.source_ip.clone(),
        Some(RequestContext::ApiGatewayV2(context)) => context.http.source_ip.clone(),
        _ => None,
    };
    from_context.or_else(|| {
        event
            .headers()
            .get("X-Forwarded-For")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
    })
}

fn response(status: StatusCode, content_type: &'static str, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[derive(Debug, Error)]
enum ContactFormError {
    #[error("{0}")]
    Configuration(String),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("Captcha verification failed.")]
    CaptchaRejected,
    #[error(transparent)]
    EmailTransport(#[from] EmailSendError),
}

impl ContactFormError {
    fn log(&self) {
        match self {
            ContactFormError::Configuration(description) => {
                error!("Configuration error: {description}");
            }
            ContactFormError::Form(FormError::MalformedJson(body)) => {
                error!("Client error: {self}");
                info!("{body}");
            }
            ContactFormError::Form(error) => {
                error!("Client error: {}", error.messages().join(" "));
            }
            ContactFormError::CaptchaRejected => {
                error!("Client error: {self}");
            }
            ContactFormError::EmailTransport(EmailSendError::Rejected(description)) => {
                error!("Error sending contact form email: {description}");
            }
            ContactFormError::EmailTransport(EmailSendError::Unknown(source)) => {
                error!("Unknown error sending contact form email: {source}");
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ContactFormError::Configuration(_) | ContactFormError::EmailTransport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ContactFormError::Form(_) => StatusCode::BAD_REQUEST,
            ContactFormError::CaptchaRejected => StatusCode::UNAUTHORIZED,
        }
    }

    fn messages(&self) -> Vec<String> {
        match self {
            ContactFormError::Form(error) => error.messages(),
            other => vec![other.to_string()],
        }
    }

    fn into_response(self) -> Response<Body> {
        response(
            self.status(),
            CONTENT_TYPE_JSON,
            json!({ "errors": self.messages() }).to_string(),
        )
    }
}
