//! Authentication state machine for the single Portal session.
//!
//! ```text
//! Unauthenticated ──ensure_valid──▶ Authenticating ──ok──▶ Valid
//!        ▲                               │                  │
//!        └──────────login failed─────────┘            invalidate
//!                                        ▲                  ▼
//!                                        └──ensure_valid── Expired
//! ```
//!
//! Logins are single-flight: callers that arrive while one is outstanding
//! await the same attempt. The attempt runs in its own task and applies its
//! outcome to the shared state itself, so dropping any waiter (including the
//! one that started it) cannot strand the others.

use crate::api::LoginRequest;
use crate::core::config::{Config, LoginScheme};
use crate::core::credentials::Credentials;
use crate::portal::classifier::{ClassificationVerdict, ResponseClassifier};
use crate::portal::transport::{HttpRequest, Transport};
use crate::utils::url::construct_api_url;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const COMPONENT: &str = "AuthSession";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Valid,
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Valid => "valid",
            SessionState::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// Snapshot of an established session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    /// Increments with every successful login in this process.
    pub generation: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("last_confirmed_at", &self.last_confirmed_at)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    NetworkFailure(String),
    LoginEndpointMisconfigured,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "the Portal rejected the credentials"),
            AuthError::NetworkFailure(cause) => write!(f, "login failed: {cause}"),
            AuthError::LoginEndpointMisconfigured => {
                write!(f, "the Portal login endpoint does not exist")
            }
        }
    }
}

impl std::error::Error for AuthError {}

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub login_url: String,
    pub scheme: LoginScheme,
    pub token_pointer: String,
    pub timeout: Duration,
}

impl LoginSettings {
    pub fn from_config(config: &Config, base_url: &str) -> Self {
        Self {
            login_url: construct_api_url(base_url, config.login_path()),
            scheme: config.portal.login_scheme,
            token_pointer: config.token_pointer().to_string(),
            timeout: config.attempt_timeout(),
        }
    }
}

type LoginFuture = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

struct InFlightLogin {
    id: u64,
    future: LoginFuture,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    in_flight: Option<InFlightLogin>,
    generation: u64,
    next_login_id: u64,
}

struct SessionCore {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    credentials: Credentials,
    settings: LoginSettings,
    transport: Arc<dyn Transport>,
    classifier: ResponseClassifier,
    login_attempts: AtomicU64,
}

#[derive(Clone)]
pub struct AuthSession {
    core: Arc<SessionCore>,
}

impl AuthSession {
    pub fn new(
        credentials: Credentials,
        settings: LoginSettings,
        transport: Arc<dyn Transport>,
        classifier: ResponseClassifier,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            core: Arc::new(SessionCore {
                inner: Mutex::new(Inner {
                    state: SessionState::Unauthenticated,
                    session: None,
                    in_flight: None,
                    generation: 0,
                    next_login_id: 0,
                }),
                state_tx,
                credentials,
                settings,
                transport,
                classifier,
                login_attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Observable session state for presenting connectivity.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.core.state_tx.subscribe()
    }

    /// Number of login requests sent to the transport so far.
    pub fn login_attempts(&self) -> u64 {
        self.core.login_attempts.load(Ordering::SeqCst)
    }

    /// Return the valid session, logging in (or joining the login already in
    /// flight) when there is none.
    pub async fn ensure_valid(&self) -> Result<Session, AuthError> {
        let login = {
            let mut inner = self.core.lock();
            if inner.state == SessionState::Valid {
                if let Some(session) = inner.session.as_ref() {
                    return Ok(session.clone());
                }
            }

            match inner.in_flight.as_ref() {
                Some(in_flight) => {
                    debug!(
                        component = COMPONENT,
                        login_id = in_flight.id,
                        "Joining in-flight login"
                    );
                    in_flight.future.clone()
                }
                None => {
                    inner.next_login_id += 1;
                    let id = inner.next_login_id;
                    let future = Arc::clone(&self.core).spawn_login(id);
                    inner.in_flight = Some(InFlightLogin {
                        id,
                        future: future.clone(),
                    });
                    self.core.transition(&mut inner, SessionState::Authenticating);
                    future
                }
            }
        };

        login.await
    }

    /// Force the session to `Expired`. A login already in flight is left alone
    /// since it will produce a fresh session anyway.
    pub fn invalidate(&self) {
        let mut inner = self.core.lock();
        if matches!(
            inner.state,
            SessionState::Valid | SessionState::Unauthenticated
        ) && inner.in_flight.is_none()
        {
            self.core.transition(&mut inner, SessionState::Expired);
        }
    }

    /// Expire the session only if `stale` is still the current one. Reports
    /// about a session that has already been replaced are ignored.
    pub fn invalidate_stale(&self, stale: &Session) -> bool {
        let mut inner = self.core.lock();
        let is_current = inner.state == SessionState::Valid
            && inner
                .session
                .as_ref()
                .is_some_and(|session| session.generation == stale.generation);
        if is_current {
            self.core.transition(&mut inner, SessionState::Expired);
        } else {
            debug!(
                component = COMPONENT,
                generation = stale.generation,
                "Ignoring expiry report for a replaced session"
            );
        }
        is_current
    }

    /// Record that `session` just served a request successfully.
    pub fn mark_confirmed(&self, session: &Session) {
        let mut inner = self.core.lock();
        if let Some(current) = inner.session.as_mut() {
            if current.generation == session.generation {
                current.last_confirmed_at = Utc::now();
            }
        }
    }

    /// Drop the session and any login in flight.
    pub fn logout(&self) {
        let mut inner = self.core.lock();
        inner.session = None;
        inner.in_flight = None;
        self.core
            .transition(&mut inner, SessionState::Unauthenticated);
    }
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No critical section can leave `Inner` half-updated.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut Inner, next: SessionState) {
        if inner.state == next {
            return;
        }
        debug!(
            component = COMPONENT,
            from = %inner.state,
            to = %next,
            "Session state transition"
        );
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    fn spawn_login(self: Arc<Self>, id: u64) -> LoginFuture {
        let task_core = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let outcome = task_core.perform_login().await;
            task_core.finish_login(id, outcome)
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    let failure = AuthError::NetworkFailure(format!("login task failed: {join_error}"));
                    self.finish_login(id, Err(failure))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn finish_login(
        &self,
        id: u64,
        outcome: Result<String, AuthError>,
    ) -> Result<Session, AuthError> {
        let mut inner = self.lock();
        let is_current = inner
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.id == id);

        let result = match outcome {
            Ok(token) => {
                let now = Utc::now();
                inner.generation += 1;
                Ok(Session {
                    token,
                    created_at: now,
                    last_confirmed_at: now,
                    generation: inner.generation,
                })
            }
            Err(err) => Err(err),
        };

        if !is_current {
            debug!(
                component = COMPONENT,
                login_id = id,
                "Discarding outcome of a superseded login"
            );
            return result;
        }

        inner.in_flight = None;
        match &result {
            Ok(session) => {
                inner.session = Some(session.clone());
                self.transition(&mut inner, SessionState::Valid);
            }
            Err(err) => {
                warn!(component = COMPONENT, error = %err, "Login failed");
                inner.session = None;
                self.transition(&mut inner, SessionState::Unauthenticated);
            }
        }
        result
    }

    async fn perform_login(&self) -> Result<String, AuthError> {
        let request = self.login_request()?;
        self.login_attempts.fetch_add(1, Ordering::SeqCst);
        debug!(
            component = COMPONENT,
            url = %self.settings.login_url,
            username = %self.credentials.username,
            "Sending login request"
        );

        let response =
            match tokio::time::timeout(self.settings.timeout, self.transport.execute(request)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => return Err(AuthError::NetworkFailure(err.to_string())),
                Err(_) => {
                    return Err(AuthError::NetworkFailure(
                        "login request timed out".to_string(),
                    ))
                }
            };

        let verdict = self.classifier.classify(
            response.status,
            &response.body,
            response.content_type.as_deref(),
        );
        debug!(
            component = COMPONENT,
            status = response.status,
            verdict = verdict.label(),
            "Classified login response"
        );

        match verdict {
            ClassificationVerdict::Success(payload) => payload
                .pointer(&self.settings.token_pointer)
                .and_then(|value| value.as_str())
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    AuthError::NetworkFailure(format!(
                        "login response has no session token at {}",
                        self.settings.token_pointer
                    ))
                }),
            ClassificationVerdict::SessionExpired | ClassificationVerdict::PermissionDenied { .. } => {
                Err(AuthError::InvalidCredentials)
            }
            ClassificationVerdict::NotFound => Err(AuthError::LoginEndpointMisconfigured),
            ClassificationVerdict::TransientError(cause) => {
                Err(AuthError::NetworkFailure(cause.to_string()))
            }
        }
    }

    fn login_request(&self) -> Result<HttpRequest, AuthError> {
        let request = HttpRequest::post(&self.settings.login_url).header("Accept", "application/json");
        let username = self.credentials.username.as_str();
        let password = self.credentials.password.as_str();

        Ok(match self.settings.scheme {
            LoginScheme::Json => {
                let body = serde_json::to_vec(&LoginRequest { username, password }).map_err(
                    |err| AuthError::NetworkFailure(format!("could not encode login request: {err}")),
                )?;
                request.body("application/json", body)
            }
            LoginScheme::Form => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("username", username)
                    .append_pair("password", password)
                    .finish();
                request.body("application/x-www-form-urlencoded", body.into_bytes())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::test_support::{
        login_page, login_settings, ok_login, session_with, ScriptedTransport, Step,
    };
    use crate::portal::transport::{RawResponse, TransportError};

    #[tokio::test]
    async fn first_call_logs_in_and_caches_the_session() {
        let transport = ScriptedTransport::new();
        let session = session_with(&transport);
        assert_eq!(session.state(), SessionState::Unauthenticated);

        let first = session.ensure_valid().await.expect("login");
        assert_eq!(first.token, "token-1");
        assert_eq!(first.generation, 1);
        assert_eq!(session.state(), SessionState::Valid);

        let second = session.ensure_valid().await.expect("cached");
        assert_eq!(second, first);
        assert_eq!(transport.login_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_login() {
        let transport = ScriptedTransport::new().with_login_delay(Duration::from_millis(50));
        let session = session_with(&transport);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let session = session.clone();
            handles.push(tokio::spawn(async move { session.ensure_valid().await }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.expect("join").expect("login").token);
        }

        assert_eq!(transport.login_calls(), 1);
        assert_eq!(session.login_attempts(), 1);
        assert!(tokens.iter().all(|token| token == "token-1"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let transport = ScriptedTransport::new().with_login_delay(Duration::from_millis(30));
        transport.push_login(login_page(200));
        let session = session_with(&transport);

        let results = futures_util::future::join_all(
            (0..8).map(|_| {
                let session = session.clone();
                async move { session.ensure_valid().await }
            }),
        )
        .await;

        assert_eq!(transport.login_calls(), 1);
        assert!(results
            .iter()
            .all(|result| result == &Err(AuthError::InvalidCredentials)));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn cancelled_initiator_does_not_strand_waiters() {
        let transport = ScriptedTransport::new().with_login_delay(Duration::from_millis(80));
        let session = session_with(&transport);

        let initiator = session.clone();
        let cancelled = tokio::time::timeout(Duration::from_millis(10), async move {
            initiator.ensure_valid().await
        })
        .await;
        assert!(cancelled.is_err(), "initiator should have been cancelled");
        assert_eq!(session.state(), SessionState::Authenticating);

        let joined = session.ensure_valid().await.expect("joined login");
        assert_eq!(joined.token, "token-1");
        assert_eq!(transport.login_calls(), 1);
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test]
    async fn abandoned_login_still_settles_state() {
        let transport = ScriptedTransport::new().with_login_delay(Duration::from_millis(20));
        let session = session_with(&transport);

        let initiator = session.clone();
        let _ = tokio::time::timeout(Duration::from_millis(5), async move {
            initiator.ensure_valid().await
        })
        .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(session.state(), SessionState::Valid);
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_invalid_credentials() {
        for step in [
            login_page(200),
            Step::Reply(RawResponse::new(401, "{}", Some("application/json"))),
            Step::Reply(RawResponse::new(403, "denied", Some("text/plain"))),
        ] {
            let transport = ScriptedTransport::new();
            transport.push_login(step);
            let session = session_with(&transport);
            assert_eq!(
                session.ensure_valid().await,
                Err(AuthError::InvalidCredentials)
            );
            assert_eq!(session.state(), SessionState::Unauthenticated);
        }
    }

    #[tokio::test]
    async fn network_problems_map_to_network_failure() {
        let transport = ScriptedTransport::new();
        transport.push_login(Step::Fail(TransportError::Connect("refused".into())));
        transport.push_login(Step::Reply(RawResponse::new(503, "busy", None)));
        transport.push_login(Step::Reply(RawResponse::new(
            200,
            r#"{"user":"alice"}"#,
            Some("application/json"),
        )));
        let session = session_with(&transport);

        for _ in 0..3 {
            assert!(matches!(
                session.ensure_valid().await,
                Err(AuthError::NetworkFailure(_))
            ));
        }
        // Unauthenticated is a resting state: the next demand logs in again.
        assert_eq!(session.ensure_valid().await.expect("login").token, "token-4");
    }

    #[tokio::test]
    async fn missing_login_endpoint_is_reported() {
        let transport = ScriptedTransport::new();
        transport.push_login(Step::Reply(RawResponse::new(404, "", None)));
        let session = session_with(&transport);
        assert_eq!(
            session.ensure_valid().await,
            Err(AuthError::LoginEndpointMisconfigured)
        );
    }

    #[tokio::test]
    async fn login_timeout_is_a_network_failure() {
        let transport = ScriptedTransport::new();
        transport.push_login(Step::Stall(Duration::from_millis(200), ok_login("late")));
        let mut settings = login_settings();
        settings.timeout = Duration::from_millis(20);
        let session = AuthSession::new(
            crate::portal::test_support::credentials(),
            settings,
            transport.clone(),
            crate::portal::test_support::classifier(),
        );

        match session.ensure_valid().await {
            Err(AuthError::NetworkFailure(cause)) => assert!(cause.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalidate_expires_and_next_demand_relogs() {
        let transport = ScriptedTransport::new();
        let session = session_with(&transport);
        let mut states = session.subscribe();

        let first = session.ensure_valid().await.expect("login");
        session.invalidate();
        assert_eq!(session.state(), SessionState::Expired);
        assert_eq!(*states.borrow_and_update(), SessionState::Expired);

        let second = session.ensure_valid().await.expect("relogin");
        assert_eq!(second.generation, first.generation + 1);
        assert_eq!(second.token, "token-2");
        assert_eq!(transport.login_calls(), 2);
    }

    #[tokio::test]
    async fn stale_expiry_reports_are_ignored() {
        let transport = ScriptedTransport::new();
        let session = session_with(&transport);

        let old = session.ensure_valid().await.expect("login");
        assert!(session.invalidate_stale(&old));
        let fresh = session.ensure_valid().await.expect("relogin");

        assert!(!session.invalidate_stale(&old));
        assert_eq!(session.state(), SessionState::Valid);
        assert_eq!(session.ensure_valid().await.expect("cached"), fresh);
    }

    #[tokio::test]
    async fn login_uses_configured_scheme() {
        let transport = ScriptedTransport::new();
        let mut settings = login_settings();
        settings.scheme = LoginScheme::Form;
        let session = AuthSession::new(
            crate::portal::test_support::credentials(),
            settings,
            transport.clone(),
            crate::portal::test_support::classifier(),
        );
        session.ensure_valid().await.expect("login");

        let request = transport.login_requests().pop().expect("login request");
        assert_eq!(
            request.header_value("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            request.body.as_deref(),
            Some(&b"username=alice&password=p%40ss+word"[..])
        );
    }

    #[tokio::test]
    async fn json_login_body_and_token_pointer() {
        let transport = ScriptedTransport::new();
        transport.push_login(Step::Reply(RawResponse::new(
            200,
            r#"{"data":{"session":"abc"}}"#,
            Some("application/json"),
        )));
        let mut settings = login_settings();
        settings.token_pointer = "/data/session".to_string();
        let session = AuthSession::new(
            crate::portal::test_support::credentials(),
            settings,
            transport.clone(),
            crate::portal::test_support::classifier(),
        );
        assert_eq!(session.ensure_valid().await.expect("login").token, "abc");

        let request = transport.login_requests().pop().expect("login request");
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().expect("body")).expect("json body");
        assert_eq!(body["username"], "alice");
        assert_eq!(body["password"], "p@ss word");
    }

    #[tokio::test]
    async fn state_stream_reports_every_transition() {
        let transport = ScriptedTransport::new().with_login_delay(Duration::from_millis(20));
        let session = session_with(&transport);
        let mut states = session.subscribe();

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.ensure_valid().await })
        };
        states.changed().await.expect("authenticating");
        assert_eq!(*states.borrow_and_update(), SessionState::Authenticating);
        states.changed().await.expect("valid");
        assert_eq!(*states.borrow_and_update(), SessionState::Valid);
        waiter.await.expect("join").expect("login");

        session.logout();
        states.changed().await.expect("logout");
        assert_eq!(*states.borrow(), SessionState::Unauthenticated);
    }

    #[test]
    fn session_debug_redacts_token() {
        let now = Utc::now();
        let session = Session {
            token: "secret-token".into(),
            created_at: now,
            last_confirmed_at: now,
            generation: 3,
        };
        assert!(!format!("{session:?}").contains("secret-token"));
    }
}
