//! REST API client module for the matching service.
//!
//! This module provides the `ApiClient` for logging in, verifying the stored
//! session and submitting spreadsheets for matching.
//!
//! Every request goes through an `AuthLayer` which attaches the stored
//! credentials and reacts to 401 responses by clearing the session and
//! sending the user back to the login screen.

pub mod client;
pub mod disposition;
pub mod error;
pub mod layer;
pub mod types;

pub use client::{ApiClient, PendingMatch};
pub use error::ApiError;
pub use layer::{AuthLayer, Navigator, ScreenNavigator, HOME_PATH, LOGIN_PATH};
pub use types::{LoginOptions, LoginResponse, MatchRequest, MatchResult, UploadFile};
