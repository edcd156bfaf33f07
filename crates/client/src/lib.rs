//! `vmpanel-client` -- session lifecycle and authenticated HTTP access.
//!
//! Owns token persistence ([`storage`]), signature-blind claim
//! decoding ([`claims`]), the session state machine ([`session`]),
//! and the [`ApiClient`] whose response path coordinates a
//! single-flight token refresh across concurrently failing requests.

pub mod api;
pub mod claims;
pub mod session;
pub mod single_flight;
pub mod storage;

pub use api::{ApiClient, ApiError, LoginResponse};
pub use session::{AuthState, SessionManager};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenKind, TokenStorage};
