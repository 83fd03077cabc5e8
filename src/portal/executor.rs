//! One logical chat request, made resilient.
//!
//! Every send runs the same loop: make sure a session exists, address the
//! current Portal ID, send, classify, then decide. The three recovery paths
//! have independent budgets: one re-authentication per send, one hop per
//! configured Portal ID, and `max_transient_attempts` transient failures.

use crate::api::{ChatReply, ChatReplyPayload, ChatRequest};
use crate::core::config::Config;
use crate::core::credentials::Credentials;
use crate::portal::classifier::{
    body_snippet, ClassificationVerdict, LoginPageMarkers, ResponseClassifier, TransientCause,
};
use crate::portal::retry::RetryPolicy;
use crate::portal::selector::{CandidateFailure, PortalIdSelector, SelectorError};
use crate::portal::session::{AuthError, AuthSession, LoginSettings, Session, SessionState};
use crate::portal::transport::{HttpRequest, RawResponse, Transport, TransportError};
use crate::utils::url::construct_portal_url;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMPONENT: &str = "ResilientRequestExecutor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorKind {
    /// The Portal rejected the credentials.
    AuthFailed,
    /// The session expired again right after a fresh login.
    PersistentAuthFailure,
    /// Every configured Portal ID was denied.
    NoUsablePortalId,
    /// The login or chat endpoint does not exist.
    EndpointMisconfigured,
    /// Transient failures exhausted the retry budget.
    Unavailable,
    Cancelled,
}

impl fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutorErrorKind::AuthFailed => "authentication failed",
            ExecutorErrorKind::PersistentAuthFailure => "session keeps expiring",
            ExecutorErrorKind::NoUsablePortalId => "no usable Portal ID",
            ExecutorErrorKind::EndpointMisconfigured => "endpoint misconfigured",
            ExecutorErrorKind::Unavailable => "Portal unavailable",
            ExecutorErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorError {
    pub kind: ExecutorErrorKind,
    pub detail: String,
    /// Network attempts made by the send, successful logins excluded.
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub body_snippet: Option<String>,
    pub candidate_failures: Vec<CandidateFailure>,
}

impl ExecutorError {
    /// What the user should do about this failure.
    pub fn guidance(&self) -> String {
        match self.kind {
            ExecutorErrorKind::AuthFailed => {
                "The Portal rejected your username or password. Re-enter your credentials with `portal-relay auth`.".to_string()
            }
            ExecutorErrorKind::PersistentAuthFailure => {
                "Signing in succeeded but the Portal ended the session immediately. Contact your Portal administrator.".to_string()
            }
            ExecutorErrorKind::NoUsablePortalId => {
                let mut guidance = "Your account is not permitted on any configured Portal ID. Ask your administrator for access or update the list with `portal-relay set portal-ids`.".to_string();
                for failure in &self.candidate_failures {
                    guidance.push_str(&format!("\n  - {failure}"));
                }
                guidance
            }
            ExecutorErrorKind::EndpointMisconfigured => {
                "The Portal endpoint was not found. Check `base-url`, `login-path` and `chat-path`, or contact your Portal administrator.".to_string()
            }
            ExecutorErrorKind::Unavailable => {
                "The Portal is not responding right now. Try again later.".to_string()
            }
            ExecutorErrorKind::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)?;
        if self.attempts > 0 {
            write!(f, " (after {} attempts", self.attempts)?;
            if let Some(status) = self.last_status {
                write!(f, ", last HTTP {status}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutorError {}

/// Bookkeeping for one logical send.
#[derive(Debug, Clone)]
struct RequestAttempt<'a> {
    message: &'a str,
    attempts: u32,
    last_status: Option<u16>,
    last_snippet: Option<String>,
    last_verdict: Option<&'static str>,
}

impl<'a> RequestAttempt<'a> {
    fn new(message: &'a str) -> Self {
        Self {
            message,
            attempts: 0,
            last_status: None,
            last_snippet: None,
            last_verdict: None,
        }
    }

    fn record(&mut self, response: &RawResponse) {
        self.last_status = Some(response.status);
        self.last_snippet = Some(body_snippet(&response.body)).filter(|s| !s.is_empty());
    }

    /// No response arrived, so nothing from an earlier one may be reported.
    fn record_no_response(&mut self) {
        self.last_status = None;
        self.last_snippet = None;
    }

    fn error(&self, kind: ExecutorErrorKind, detail: impl Into<String>) -> ExecutorError {
        debug!(
            component = COMPONENT,
            kind = %kind,
            message_chars = self.message.chars().count(),
            last_verdict = ?self.last_verdict,
            "Giving up on send"
        );
        ExecutorError {
            kind,
            detail: detail.into(),
            attempts: self.attempts,
            last_status: self.last_status,
            body_snippet: self.last_snippet.clone(),
            candidate_failures: Vec::new(),
        }
    }
}

/// Where chat requests go and how the session token travels.
#[derive(Debug, Clone)]
pub struct ChatEndpoint {
    pub base_url: String,
    pub chat_path: String,
    /// Send the token as this cookie instead of a bearer header.
    pub session_cookie: Option<String>,
}

impl ChatEndpoint {
    pub fn from_config(config: &Config, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            chat_path: config.chat_path().to_string(),
            session_cookie: config
                .portal
                .session_cookie
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    fn request(&self, session: &Session, portal_id: &str, body: Vec<u8>) -> HttpRequest {
        let url = construct_portal_url(&self.base_url, &self.chat_path, portal_id);
        let request = HttpRequest::post(url).header("Accept", "application/json");
        let request = match &self.session_cookie {
            Some(name) => request.header("Cookie", format!("{name}={}", session.token)),
            None => request.header("Authorization", format!("Bearer {}", session.token)),
        };
        request.body("application/json", body)
    }
}

pub struct ResilientRequestExecutor {
    session: AuthSession,
    selector: Arc<PortalIdSelector>,
    transport: Arc<dyn Transport>,
    classifier: ResponseClassifier,
    policy: RetryPolicy,
    endpoint: ChatEndpoint,
}

impl ResilientRequestExecutor {
    pub fn new(
        session: AuthSession,
        selector: Arc<PortalIdSelector>,
        transport: Arc<dyn Transport>,
        classifier: ResponseClassifier,
        policy: RetryPolicy,
        endpoint: ChatEndpoint,
    ) -> Self {
        Self {
            session,
            selector,
            transport,
            classifier,
            policy,
            endpoint,
        }
    }

    /// Wire the whole layer from configuration.
    pub fn from_config(
        config: &Config,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SelectorError> {
        let selector = PortalIdSelector::new(config.portal.portal_ids.iter().cloned())?;
        let classifier = ResponseClassifier::new(LoginPageMarkers::new(config.login_markers()));
        let login = LoginSettings::from_config(config, &credentials.base_url);
        let endpoint = ChatEndpoint::from_config(config, &credentials.base_url);
        let session = AuthSession::new(credentials, login, transport.clone(), classifier.clone());

        Ok(Self::new(
            session,
            Arc::new(selector),
            transport,
            classifier,
            RetryPolicy::from_config(config),
            endpoint,
        ))
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn selector(&self) -> &PortalIdSelector {
        &self.selector
    }

    pub fn session_states(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Like [`send`](Self::send), but gives up with `Cancelled` as soon as
    /// `cancel` fires. Shared session and selector state are left as they
    /// were at the last completed step.
    pub async fn send_with_cancel(
        &self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ExecutorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(component = COMPONENT, "Send cancelled");
                Err(RequestAttempt::new(message)
                    .error(ExecutorErrorKind::Cancelled, "cancelled by caller"))
            }
            result = self.send(message) => result,
        }
    }

    pub async fn send(&self, message: &str) -> Result<ChatReply, ExecutorError> {
        let body = serde_json::to_vec(&ChatRequest { message }).map_err(|err| {
            RequestAttempt::new(message).error(
                ExecutorErrorKind::Unavailable,
                format!("could not encode chat request: {err}"),
            )
        })?;

        let mut attempt = RequestAttempt::new(message);
        let mut reauthenticated = false;
        let mut portal_hops = 0usize;
        let mut transient_failures = 0u32;

        loop {
            if self.selector.is_exhausted() {
                return Err(self.no_usable_portal_id(&attempt, self.selector.failures()));
            }

            let session = match self.session.ensure_valid().await {
                Ok(session) => session,
                Err(AuthError::InvalidCredentials) => {
                    return Err(self.fail(
                        attempt.error(ExecutorErrorKind::AuthFailed, "the Portal rejected the credentials"),
                    ));
                }
                Err(AuthError::LoginEndpointMisconfigured) => {
                    return Err(self.fail(attempt.error(
                        ExecutorErrorKind::EndpointMisconfigured,
                        "the login endpoint returned 404",
                    )));
                }
                Err(AuthError::NetworkFailure(cause)) => {
                    attempt.attempts += 1;
                    attempt.last_verdict = Some("login_failed");
                    self.back_off(&attempt, &mut transient_failures, TransientCause::Network(cause))
                        .await?;
                    continue;
                }
            };

            if self.selector.is_exhausted() {
                return Err(self.no_usable_portal_id(&attempt, self.selector.failures()));
            }
            let candidate = self.selector.current();

            attempt.attempts += 1;
            let request = self.endpoint.request(&session, &candidate.id, body.clone());
            let verdict = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.transport.execute(request),
            )
            .await
            {
                Ok(Ok(response)) => {
                    attempt.record(&response);
                    self.classifier.classify(
                        response.status,
                        &response.body,
                        response.content_type.as_deref(),
                    )
                }
                Ok(Err(TransportError::Timeout)) | Err(_) => {
                    attempt.record_no_response();
                    ClassificationVerdict::TransientError(TransientCause::Timeout)
                }
                Ok(Err(err)) => {
                    attempt.record_no_response();
                    ClassificationVerdict::TransientError(TransientCause::Network(err.to_string()))
                }
            };
            attempt.last_verdict = Some(verdict.label());
            debug!(
                component = COMPONENT,
                portal_id = %candidate.id,
                attempt = attempt.attempts,
                status = ?attempt.last_status,
                verdict = verdict.label(),
                "Classified chat response"
            );

            match verdict {
                ClassificationVerdict::Success(payload) => {
                    match serde_json::from_value::<ChatReplyPayload>(payload) {
                        Ok(reply) => {
                            self.selector.confirm(&candidate.id);
                            self.session.mark_confirmed(&session);
                            return Ok(ChatReply {
                                text: reply.reply,
                                conversation_id: reply.conversation_id,
                                portal_id: candidate.id,
                                attempts: attempt.attempts,
                            });
                        }
                        Err(err) => {
                            let cause = TransientCause::MalformedBody(err.to_string());
                            self.back_off(&attempt, &mut transient_failures, cause).await?;
                        }
                    }
                }
                ClassificationVerdict::SessionExpired => {
                    if reauthenticated {
                        return Err(self.fail(attempt.error(
                            ExecutorErrorKind::PersistentAuthFailure,
                            "the session expired again right after logging in",
                        )));
                    }
                    reauthenticated = true;
                    debug!(
                        component = COMPONENT,
                        generation = session.generation,
                        "Session expired, re-authenticating"
                    );
                    self.session.invalidate_stale(&session);
                }
                ClassificationVerdict::PermissionDenied { status } => {
                    portal_hops += 1;
                    let reason = match attempt.last_snippet.as_deref() {
                        Some(snippet) => format!("HTTP {status}: {snippet}"),
                        None => format!("HTTP {status}"),
                    };
                    match self.selector.advance(&candidate.id, reason) {
                        Ok(next) if portal_hops < self.selector.candidate_count() => {
                            debug!(
                                component = COMPONENT,
                                from = %candidate.id,
                                to = %next.id,
                                "Retrying with another Portal ID"
                            );
                        }
                        Ok(_) => {
                            return Err(self.no_usable_portal_id(&attempt, self.selector.failures()));
                        }
                        Err(SelectorError::Exhausted { failures }) => {
                            return Err(self.no_usable_portal_id(&attempt, failures));
                        }
                        Err(SelectorError::NoCandidates) => {
                            return Err(self.no_usable_portal_id(&attempt, Vec::new()));
                        }
                    }
                }
                ClassificationVerdict::NotFound => {
                    return Err(self.fail(attempt.error(
                        ExecutorErrorKind::EndpointMisconfigured,
                        format!("the chat endpoint for Portal ID {} returned 404", candidate.id),
                    )));
                }
                ClassificationVerdict::TransientError(cause) => {
                    self.back_off(&attempt, &mut transient_failures, cause).await?;
                }
            }
        }
    }

    /// Count a transient failure and sleep before the next attempt, or give
    /// up once the budget is spent.
    async fn back_off(
        &self,
        attempt: &RequestAttempt<'_>,
        transient_failures: &mut u32,
        cause: TransientCause,
    ) -> Result<(), ExecutorError> {
        *transient_failures += 1;
        if *transient_failures >= self.policy.max_transient_attempts {
            return Err(self.fail(attempt.error(ExecutorErrorKind::Unavailable, cause.to_string())));
        }
        let delay = self.policy.backoff(*transient_failures);
        debug!(
            component = COMPONENT,
            failures = *transient_failures,
            delay_ms = delay.as_millis() as u64,
            cause = %cause,
            "Transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn no_usable_portal_id(
        &self,
        attempt: &RequestAttempt<'_>,
        failures: Vec<CandidateFailure>,
    ) -> ExecutorError {
        let mut err = attempt.error(
            ExecutorErrorKind::NoUsablePortalId,
            "every configured Portal ID was denied",
        );
        err.candidate_failures = failures;
        self.fail(err)
    }

    fn fail(&self, err: ExecutorError) -> ExecutorError {
        warn!(
            component = COMPONENT,
            kind = %err.kind,
            attempts = err.attempts,
            status = ?err.last_status,
            detail = %err.detail,
            "Send failed"
        );
        err
    }
}
