//! Authentication module for managing the user session and credentials.
//!
//! This module provides:
//! - `SessionStore`: the stored auth snapshot (token, token type, API key)
//! - `TokenStorage`: pluggable durable storage for the session slots
//! - `CredentialStore`: optional OS keychain storage for the login password
//!
//! Sessions live until logout or until the server answers 401.

pub mod credentials;
pub mod session;
pub mod storage;

pub use credentials::CredentialStore;
pub use session::{AuthSnapshot, SessionStore};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, TokenStorage};
