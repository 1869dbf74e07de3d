//! Auth handling shared by every request the client sends.

use std::sync::{Arc, Mutex};

use reqwest::{header, RequestBuilder, StatusCode};
use tracing::{debug, info, warn};

use crate::auth::SessionStore;

/// Location of the login entry point
pub const LOGIN_PATH: &str = "/login";

/// Location of the main screen
pub const HOME_PATH: &str = "/home";

/// Where the user currently is in the front end, and how to move them.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;

    fn navigate(&self, location: &str);
}

/// Navigator that records locations in memory.
#[derive(Debug)]
pub struct ScreenNavigator {
    history: Mutex<Vec<String>>,
}

impl ScreenNavigator {
    pub fn new(initial: &str) -> Self {
        Self {
            history: Mutex::new(vec![initial.to_string()]),
        }
    }

    /// Every location visited, starting with the initial one
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl Navigator for ScreenNavigator {
    fn current_location(&self) -> String {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.last().cloned())
            .unwrap_or_default()
    }

    fn navigate(&self, location: &str) {
        info!(location = location, "Navigating");
        if let Ok(mut history) = self.history.lock() {
            history.push(location.to_string());
        }
    }
}

/// Attaches stored credentials to requests and enforces the 401 policy.
#[derive(Clone)]
pub struct AuthLayer {
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
}

impl AuthLayer {
    pub fn new(session: Arc<SessionStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self { session, navigator }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Set `Authorization: <token_type> <access_token>` when a session exists
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.get_auth() {
            Some(snapshot) => request.header(header::AUTHORIZATION, snapshot.authorization_value()),
            None => request,
        }
    }

    /// Apply the response policy. Returns true when the session was dropped.
    ///
    /// A 401 clears the whole session and sends the user to the login screen
    /// unless they are already there. The request is not retried.
    pub fn on_response(&self, status: StatusCode) -> bool {
        if status != StatusCode::UNAUTHORIZED {
            return false;
        }

        warn!("Server answered 401, clearing session");
        if let Err(e) = self.session.clear_auth() {
            warn!(error = %e, "Failed to clear session");
        }

        let location = self.navigator.current_location();
        if location.starts_with(LOGIN_PATH) {
            debug!(location = %location, "Already at login");
        } else {
            self.navigator.navigate(LOGIN_PATH);
        }
        true
    }
}
