//! Core library for xlsxmatch.
//!
//! Holds everything a front end needs to talk to the matching service:
//! - `config`: persisted settings and environment overrides
//! - `auth`: the session store, its storage backends and keychain credentials
//! - `api`: the HTTP client with its auth layer
//! - `submission`: the spreadsheet submission lifecycle
//! - `download`: the scoped holder for a downloaded result

pub mod api;
pub mod auth;
pub mod config;
pub mod download;
pub mod submission;

pub use api::{
    ApiClient, ApiError, LoginOptions, LoginResponse, MatchRequest, MatchResult, UploadFile,
};
pub use auth::{AuthSnapshot, SessionStore};
pub use config::Config;
