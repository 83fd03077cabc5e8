//! Scripted in-memory transport and fixtures shared by the portal tests.

use crate::core::config::defaults::{DEFAULT_LOGIN_MARKERS, DEFAULT_LOGIN_PATH};
use crate::core::config::LoginScheme;
use crate::core::credentials::Credentials;
use crate::portal::classifier::{LoginPageMarkers, ResponseClassifier};
use crate::portal::session::{AuthSession, LoginSettings};
use crate::portal::transport::{HttpRequest, RawResponse, Transport, TransportError};
use crate::utils::url::construct_api_url;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const BASE_URL: &str = "https://portal.test/api";

pub(crate) const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Sign in</title></head>
<body><form id="loginForm" action="j_security_check" method="post">
<input type="password" name="j_password"></form></body></html>"#;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Reply(RawResponse),
    Fail(TransportError),
    /// Wait, then reply.
    Stall(Duration, RawResponse),
}

pub(crate) fn json(status: u16, body: serde_json::Value) -> Step {
    Step::Reply(RawResponse::new(
        status,
        body.to_string(),
        Some("application/json"),
    ))
}

pub(crate) fn ok_login(token: &str) -> RawResponse {
    RawResponse::new(
        200,
        serde_json::json!({ "token": token }).to_string(),
        Some("application/json"),
    )
}

pub(crate) fn reply_response(text: &str) -> RawResponse {
    RawResponse::new(
        200,
        serde_json::json!({ "reply": text }).to_string(),
        Some("application/json"),
    )
}

pub(crate) fn ok_reply(text: &str) -> Step {
    Step::Reply(reply_response(text))
}

pub(crate) fn login_page(status: u16) -> Step {
    Step::Reply(RawResponse::new(
        status,
        LOGIN_PAGE,
        Some("text/html;charset=UTF-8"),
    ))
}

pub(crate) fn status(status: u16) -> Step {
    Step::Reply(RawResponse::new(status, "", Some("text/plain")))
}

pub(crate) fn denied() -> Step {
    json(403, serde_json::json!({ "error": "portal not permitted" }))
}

/// Replays queued steps. Login requests are recognised by URL; an empty login
/// queue issues `token-<n>` for the n-th login, an empty chat queue replies
/// `"unscripted"`. Chat requests bearing an expired token get the login page
/// without consuming the chat queue.
pub(crate) struct ScriptedTransport {
    login_script: Mutex<VecDeque<Step>>,
    chat_script: Mutex<VecDeque<Step>>,
    login_delay_ms: AtomicU64,
    expired_tokens: Mutex<Vec<String>>,
    login_requests: Mutex<Vec<HttpRequest>>,
    chat_requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            login_script: Mutex::new(VecDeque::new()),
            chat_script: Mutex::new(VecDeque::new()),
            login_delay_ms: AtomicU64::new(0),
            expired_tokens: Mutex::new(Vec::new()),
            login_requests: Mutex::new(Vec::new()),
            chat_requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_login_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.login_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub(crate) fn push_login(&self, step: Step) {
        self.login_script.lock().unwrap().push_back(step);
    }

    pub(crate) fn push_chat(&self, step: Step) {
        self.chat_script.lock().unwrap().push_back(step);
    }

    pub(crate) fn expire_token(&self, token: &str) {
        self.expired_tokens.lock().unwrap().push(token.to_string());
    }

    fn is_expired(&self, request: &HttpRequest) -> bool {
        let Some(token) = request
            .header_value("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
        else {
            return false;
        };
        self.expired_tokens
            .lock()
            .unwrap()
            .iter()
            .any(|expired| expired == token)
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_requests.lock().unwrap().len()
    }

    pub(crate) fn chat_calls(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub(crate) fn login_requests(&self) -> Vec<HttpRequest> {
        self.login_requests.lock().unwrap().clone()
    }

    pub(crate) fn chat_requests(&self) -> Vec<HttpRequest> {
        self.chat_requests.lock().unwrap().clone()
    }

    /// Portal IDs of the chat requests, in order.
    pub(crate) fn chat_portals(&self) -> Vec<String> {
        self.chat_requests()
            .iter()
            .filter_map(|request| {
                let path = request.url.strip_prefix(BASE_URL)?;
                let mut segments = path.trim_start_matches('/').split('/');
                match (segments.next(), segments.next()) {
                    (Some("portals"), Some(id)) => Some(id.to_string()),
                    _ => None,
                }
            })
            .collect()
    }

    async fn play(step: Step) -> Result<RawResponse, TransportError> {
        match step {
            Step::Reply(response) => Ok(response),
            Step::Fail(err) => Err(err),
            Step::Stall(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        if request.url.ends_with(DEFAULT_LOGIN_PATH) {
            let step = {
                let mut requests = self.login_requests.lock().unwrap();
                requests.push(request);
                let issued = requests.len();
                self.login_script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Step::Reply(ok_login(&format!("token-{issued}"))))
            };
            let delay = self.login_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Self::play(step).await
        } else {
            let step = if self.is_expired(&request) {
                self.chat_requests.lock().unwrap().push(request);
                login_page(200)
            } else {
                self.chat_requests.lock().unwrap().push(request);
                self.chat_script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| ok_reply("unscripted"))
            };
            Self::play(step).await
        }
    }
}

pub(crate) fn credentials() -> Credentials {
    Credentials::new("alice", "p@ss word", BASE_URL)
}

pub(crate) fn classifier() -> ResponseClassifier {
    ResponseClassifier::new(LoginPageMarkers::new(DEFAULT_LOGIN_MARKERS))
}

pub(crate) fn login_settings() -> LoginSettings {
    LoginSettings {
        login_url: construct_api_url(BASE_URL, DEFAULT_LOGIN_PATH),
        scheme: LoginScheme::Json,
        token_pointer: "/token".to_string(),
        timeout: Duration::from_secs(1),
    }
}

pub(crate) fn session_with(transport: &Arc<ScriptedTransport>) -> AuthSession {
    AuthSession::new(
        credentials(),
        login_settings(),
        transport.clone(),
        classifier(),
    )
}
