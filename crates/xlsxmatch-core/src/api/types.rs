//! Request and response types for the matching service.

use std::num::NonZeroU32;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::auth::AuthSnapshot;

/// Default API path for the password grant
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Default API path for spreadsheet matching
pub const DEFAULT_MATCH_PATH: &str = "/match";

const XLSX_EXTENSION: &str = ".xlsx";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// ============================================================================
// Login
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl From<LoginResponse> for AuthSnapshot {
    fn from(response: LoginResponse) -> Self {
        AuthSnapshot::new(
            response.access_token,
            response.token_type.as_deref(),
            response.api_key,
        )
    }
}

/// Optional OAuth2 password-grant fields and an alternate login path
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub path: Option<String>,
}

impl LoginOptions {
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_LOGIN_PATH)
    }

    /// Form body for the password grant; absent options are sent empty.
    pub fn form_fields<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> [(&'static str, &'a str); 6] {
        [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", self.scope.as_deref().unwrap_or("")),
            ("client_id", self.client_id.as_deref().unwrap_or("")),
            ("client_secret", self.client_secret.as_deref().unwrap_or("")),
        ]
    }
}

// ============================================================================
// Match
// ============================================================================

/// A named spreadsheet payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its final path component as the name
    pub async fn read(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self { name, bytes })
    }

    pub fn has_xlsx_extension(&self) -> bool {
        is_xlsx_name(&self.name)
    }

    /// Reject anything that is not named `*.xlsx` (any case)
    pub fn ensure_xlsx(&self) -> Result<(), ApiError> {
        if self.has_xlsx_extension() {
            Ok(())
        } else {
            Err(ApiError::Validation(format!(
                "Please choose a valid .xlsx file (got \"{}\")",
                self.name
            )))
        }
    }
}

pub fn is_xlsx_name(name: &str) -> bool {
    name.len() >= XLSX_EXTENSION.len()
        && name
            .get(name.len() - XLSX_EXTENSION.len()..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(XLSX_EXTENSION))
}

/// Spreadsheet plus the column parameters for one matching run
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub file: UploadFile,
    pub desc_col: String,
    pub unit_col: String,
    pub extra_num_cols: Vec<String>,
    pub rerank_top_k: Option<NonZeroU32>,
    pub cross_encoder_model: Option<String>,
    pub target_path: String,
}

impl MatchRequest {
    pub fn new(file: UploadFile, desc_col: impl Into<String>) -> Self {
        Self {
            file,
            desc_col: desc_col.into(),
            unit_col: String::new(),
            extra_num_cols: Vec::new(),
            rerank_top_k: None,
            cross_encoder_model: None,
            target_path: DEFAULT_MATCH_PATH.to_string(),
        }
    }

    /// Text fields of the multipart body, in submission order.
    ///
    /// Optional fields are left out entirely rather than sent empty.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("desc_col", self.desc_col.clone()),
            ("unit_col", self.unit_col.clone()),
        ];
        if !self.extra_num_cols.is_empty() {
            fields.push(("extra_num_cols", self.extra_num_cols.join(",")));
        }
        if let Some(top_k) = self.rerank_top_k {
            fields.push(("rerank_top_k", top_k.to_string()));
        }
        if let Some(model) = self.cross_encoder_model.as_deref().filter(|m| !m.is_empty()) {
            fields.push(("cross_encoder_model", model.to_string()));
        }
        fields
    }

    /// Consume the request into a multipart form: `file` first, then the text fields
    pub fn into_form(self) -> Result<Form, ApiError> {
        let fields = self.text_fields();
        let file_part = Part::bytes(self.file.bytes)
            .file_name(self.file.name)
            .mime_str(XLSX_MIME)?;

        Ok(fields
            .into_iter()
            .fold(Form::new().part("file", file_part), |form, (name, value)| {
                form.text(name, value)
            }))
    }
}

/// Downloaded result of a matching run. Owned by the caller.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub payload: Vec<u8>,
    pub filename: String,
    pub content_type: Option<String>,
}
