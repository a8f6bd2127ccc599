use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/turnstile/v0/siteverify";

/// A stand-in for Cloudflare Turnstile's `siteverify` endpoint.
#[derive(Clone)]
pub struct FakeTurnstile {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    return_invalid_response: bool,
    return_server_error: bool,
    delay: Option<Duration>,
    received_requests: Arc<Mutex<Vec<ReceivedVerifyRequest>>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReceivedVerifyRequest {
    pub secret: String,
    pub response: String,
    pub remoteip: Option<String>,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Handle to a [`FakeTurnstile`] serving on a local port.
pub struct RunningFakeTurnstile {
    verify_url: String,
    received_requests: Arc<Mutex<Vec<ReceivedVerifyRequest>>>,
}

impl FakeTurnstile {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            return_invalid_response: false,
            return_server_error: false,
            delay: None,
            received_requests: Default::default(),
        }
    }

    pub fn require_token(self, required_token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(required_token.as_ref().into()),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    pub fn delay_response(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    /// Binds an ephemeral port and serves in the background.
    pub async fn start(self) -> RunningFakeTurnstile {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let received_requests = self.received_requests.clone();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        RunningFakeTurnstile {
            verify_url: format!("http://{address}{VERIFY_PATH}"),
            received_requests,
        }
    }
}

impl RunningFakeTurnstile {
    pub fn verify_url(&self) -> String {
        self.verify_url.clone()
    }

    pub fn received_requests(&self) -> Vec<ReceivedVerifyRequest> {
        self.received_requests.lock().unwrap().clone()
    }
}

async fn verify(
    State(state): State<FakeTurnstile>,
    Form(payload): Form<ReceivedVerifyRequest>,
) -> Response {
    state
        .received_requests
        .lock()
        .unwrap()
        .push(payload.clone());
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    if state.return_server_error {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if payload.secret != state.required_secret {
        verify_response(false, &["invalid-input-secret"])
    } else if state
        .required_token
        .as_ref()
        .is_some_and(|required_token| *required_token != payload.response)
    {
        verify_response(false, &["invalid-input-response"])
    } else {
        verify_response(true, &[])
    }
}

fn verify_response(success: bool, error_codes: &[&str]) -> Response {
    (
        StatusCode::OK,
        Json(VerifyResponsePayload {
            success,
            error_codes: error_codes.iter().map(|code| code.to_string()).collect(),
        }),
    )
        .into_response()
}
