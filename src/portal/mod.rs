//! Session and endpoint resilience for the Portal chat service.

pub mod classifier;
pub mod executor;
pub mod retry;
pub mod selector;
pub mod session;
pub mod transport;

pub use classifier::{ClassificationVerdict, LoginPageMarkers, ResponseClassifier, TransientCause};
pub use executor::{ChatEndpoint, ExecutorError, ExecutorErrorKind, ResilientRequestExecutor};
pub use retry::RetryPolicy;
pub use selector::{CandidateFailure, PortalIdCandidate, PortalIdSelector, SelectorError};
pub use session::{AuthError, AuthSession, LoginSettings, Session, SessionState};
pub use transport::{HttpRequest, RawResponse, ReqwestTransport, Transport, TransportError};

#[cfg(test)]
pub(crate) mod test_support;
