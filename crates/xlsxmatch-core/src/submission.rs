//! Spreadsheet submission lifecycle.
//!
//! `SubmissionState` is a plain state machine with a pure transition
//! function; `SubmissionSession` drives it against the API client and owns
//! the chosen file, the form parameters and the downloadable result.

use std::num::NonZeroU32;

use tracing::{debug, info, warn};

use crate::api::types::DEFAULT_MATCH_PATH;
use crate::api::{ApiClient, ApiError, MatchRequest, UploadFile};
use crate::download::{DownloadHandle, DownloadSlot};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DESC_COL: &str = "Descrição do Material";
pub const DEFAULT_EXTRA_COLS: [&str; 2] = ["Diâmetro", "Comprimento (m)"];
pub const DEFAULT_RERANK_TOP_K: u32 = 15;
pub const DEFAULT_CROSS_ENCODER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Ready,
    Submitting,
    AwaitingResult,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    FileChosen,
    FileCleared,
    FileRejected(String),
    Submit,
    ResponseStarted,
    Succeeded,
    Failed(String),
}

impl SubmissionState {
    /// State after `event`, or `None` if the event is not allowed here.
    pub fn next(&self, event: &SubmissionEvent) -> Option<SubmissionState> {
        use SubmissionEvent as E;
        use SubmissionState as S;

        match (self, event) {
            (S::Submitting | S::AwaitingResult, E::Failed(msg)) => Some(S::Failed(msg.clone())),
            (S::Submitting, E::ResponseStarted) => Some(S::AwaitingResult),
            (S::AwaitingResult, E::Succeeded) => Some(S::Done),
            // Nothing else may interrupt a running submission
            (s, _) if s.is_busy() => None,
            (_, E::FileChosen) => Some(S::Ready),
            (_, E::FileCleared) => Some(S::Idle),
            (_, E::FileRejected(msg)) => Some(S::Failed(msg.clone())),
            (S::Ready, E::Submit) => Some(S::Submitting),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, SubmissionState::Submitting | SubmissionState::AwaitingResult)
    }

    /// `Done` and `Failed` only move on when a new file is chosen
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Done | SubmissionState::Failed(_))
    }

    pub fn can_submit(&self) -> bool {
        *self == SubmissionState::Ready
    }

    /// Progress percentage to display; `None` keeps whatever was shown
    pub fn progress(&self) -> Option<u8> {
        match self {
            SubmissionState::Idle | SubmissionState::Ready => Some(0),
            SubmissionState::Submitting => Some(15),
            SubmissionState::AwaitingResult => Some(60),
            SubmissionState::Done => Some(100),
            SubmissionState::Failed(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            SubmissionState::Idle => "Choose a .xlsx file to begin.".to_string(),
            SubmissionState::Ready => "Ready to process.".to_string(),
            SubmissionState::Submitting => "Uploading...".to_string(),
            SubmissionState::AwaitingResult => "Processing...".to_string(),
            SubmissionState::Done => "Done! The result archive is ready.".to_string(),
            SubmissionState::Failed(msg) => msg.clone(),
        }
    }
}

// ============================================================================
// Form parameters
// ============================================================================

/// Extra numeric column names, kept unique ignoring case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnList {
    columns: Vec<String>,
}

impl ColumnList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut list = Self::new();
        for column in DEFAULT_EXTRA_COLS {
            list.add(column);
        }
        list
    }

    /// Add a trimmed column name. Returns false for blanks and duplicates.
    pub fn add(&mut self, input: &str) -> bool {
        let value = input.trim();
        if value.is_empty() || self.contains(value) {
            return false;
        }
        self.columns.push(value.to_string());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        self.columns.iter().any(|c| c.to_lowercase() == wanted)
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        (index < self.columns.len()).then(|| self.columns.remove(index))
    }

    pub fn pop(&mut self) -> Option<String> {
        self.columns.pop()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Everything in a match request except the file
#[derive(Debug, Clone)]
pub struct MatchParams {
    pub desc_col: String,
    pub unit_col: String,
    pub extra_cols: ColumnList,
    pub rerank_top_k: Option<NonZeroU32>,
    pub cross_encoder_model: Option<String>,
    pub target_path: String,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            desc_col: DEFAULT_DESC_COL.to_string(),
            unit_col: String::new(),
            extra_cols: ColumnList::with_defaults(),
            rerank_top_k: NonZeroU32::new(DEFAULT_RERANK_TOP_K),
            cross_encoder_model: Some(DEFAULT_CROSS_ENCODER_MODEL.to_string()),
            target_path: DEFAULT_MATCH_PATH.to_string(),
        }
    }
}

impl MatchParams {
    pub fn to_request(&self, file: UploadFile) -> MatchRequest {
        MatchRequest {
            file,
            desc_col: self.desc_col.clone(),
            unit_col: self.unit_col.clone(),
            extra_num_cols: self.extra_cols.as_slice().to_vec(),
            rerank_top_k: self.rerank_top_k,
            cross_encoder_model: self.cross_encoder_model.clone().filter(|m| !m.is_empty()),
            target_path: self.target_path.clone(),
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// One user's submission flow: chosen file, parameters, state and result
#[derive(Debug)]
pub struct SubmissionSession {
    state: SubmissionState,
    file: Option<UploadFile>,
    pub params: MatchParams,
    download: DownloadSlot,
}

impl SubmissionSession {
    pub fn new(params: MatchParams) -> Self {
        Self {
            state: SubmissionState::Idle,
            file: None,
            params,
            download: DownloadSlot::new(),
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn file(&self) -> Option<&UploadFile> {
        self.file.as_ref()
    }

    pub fn download(&self) -> Option<&DownloadHandle> {
        self.download.current()
    }

    fn apply(&mut self, event: SubmissionEvent) -> bool {
        match self.state.next(&event) {
            Some(next) => {
                debug!(from = ?self.state, to = ?next, "Submission state changed");
                self.state = next;
                true
            }
            None => {
                warn!(state = ?self.state, event = ?event, "Ignoring submission event");
                false
            }
        }
    }

    /// Choose a new spreadsheet. Anything not named `.xlsx` is rejected.
    pub fn choose_file(&mut self, file: UploadFile) -> Result<(), ApiError> {
        if self.state.is_busy() {
            return Err(ApiError::Validation(
                "A submission is already in progress".to_string(),
            ));
        }
        if let Err(e) = file.ensure_xlsx() {
            self.file = None;
            self.apply(SubmissionEvent::FileRejected(e.user_message()));
            return Err(e);
        }

        self.download.release();
        self.file = Some(file);
        self.apply(SubmissionEvent::FileChosen);
        Ok(())
    }

    pub fn clear_file(&mut self) {
        if self.apply(SubmissionEvent::FileCleared) {
            self.file = None;
            self.download.release();
        }
    }

    /// Submit the chosen file and stage the result for download.
    pub async fn submit(&mut self, client: &ApiClient) -> Result<&DownloadHandle, ApiError> {
        self.submit_with(client, |_| {}).await
    }

    /// Like `submit`, calling `on_change` after every state change.
    pub async fn submit_with(
        &mut self,
        client: &ApiClient,
        mut on_change: impl FnMut(&SubmissionState),
    ) -> Result<&DownloadHandle, ApiError> {
        if self.state.is_terminal() {
            return Err(ApiError::Validation(
                "Choose a new .xlsx file before submitting again".to_string(),
            ));
        }
        if !self.state.can_submit() {
            return Err(ApiError::Validation(format!(
                "Cannot submit now: {}",
                self.state.message()
            )));
        }
        let file = self.file.take().ok_or_else(|| {
            ApiError::Validation("Choose a .xlsx file first".to_string())
        })?;

        self.download.release();
        self.apply(SubmissionEvent::Submit);
        on_change(&self.state);

        let pending = match client.start_match(self.params.to_request(file)).await {
            Ok(pending) => pending,
            Err(e) => return Err(self.fail(e, &mut on_change)),
        };
        self.apply(SubmissionEvent::ResponseStarted);
        on_change(&self.state);

        let result = match pending.collect().await {
            Ok(result) => result,
            Err(e) => return Err(self.fail(e, &mut on_change)),
        };
        let staged = self.download.acquire(result).map(|_| ());
        if let Err(e) = staged {
            let error = ApiError::Submission(format!("Failed to stage the result: {}", e));
            return Err(self.fail(error, &mut on_change));
        }

        self.apply(SubmissionEvent::Succeeded);
        on_change(&self.state);
        info!("Submission finished");
        self.download
            .current()
            .ok_or_else(|| ApiError::Submission("Result was released before use".to_string()))
    }

    fn fail(&mut self, error: ApiError, on_change: &mut impl FnMut(&SubmissionState)) -> ApiError {
        warn!(error = %error, "Submission failed");
        self.apply(SubmissionEvent::Failed(error.user_message()));
        on_change(&self.state);
        error
    }
}

impl Default for SubmissionSession {
    fn default() -> Self {
        Self::new(MatchParams::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::{ScreenNavigator, HOME_PATH};
    use crate::auth::SessionStore;

    use SubmissionEvent as E;
    use SubmissionState as S;

    fn xlsx() -> UploadFile {
        UploadFile::new("planilha.xlsx", b"PK\x03\x04".to_vec())
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    #[test]
    fn test_happy_path() {
        let mut state = S::Idle;
        for (event, expected) in [
            (E::FileChosen, S::Ready),
            (E::Submit, S::Submitting),
            (E::ResponseStarted, S::AwaitingResult),
            (E::Succeeded, S::Done),
        ] {
            state = state.next(&event).expect("legal transition");
            assert_eq!(state, expected);
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failure_from_busy_states() {
        let failed = S::Failed("boom".into());
        assert_eq!(S::Submitting.next(&E::Failed("boom".into())), Some(failed.clone()));
        assert_eq!(S::AwaitingResult.next(&E::Failed("boom".into())), Some(failed));
        assert_eq!(S::Ready.next(&E::Failed("boom".into())), None);
    }

    #[test]
    fn test_terminal_states_wait_for_new_file() {
        for terminal in [S::Done, S::Failed("x".into())] {
            assert_eq!(terminal.next(&E::Submit), None);
            assert_eq!(terminal.next(&E::Succeeded), None);
            assert_eq!(terminal.next(&E::FileChosen), Some(S::Ready));
        }
    }

    #[test]
    fn test_busy_states_ignore_file_events() {
        for busy in [S::Submitting, S::AwaitingResult] {
            assert_eq!(busy.next(&E::FileChosen), None);
            assert_eq!(busy.next(&E::FileCleared), None);
            assert_eq!(busy.next(&E::Submit), None);
            assert_eq!(busy.next(&E::FileRejected("bad".into())), None);
        }
    }

    #[test]
    fn test_idle_cannot_submit() {
        assert_eq!(S::Idle.next(&E::Submit), None);
        assert!(!S::Idle.can_submit());
        assert!(S::Ready.can_submit());
    }

    #[test]
    fn test_rejected_file_fails_and_clear_returns_to_idle() {
        assert_eq!(
            S::Ready.next(&E::FileRejected("bad".into())),
            Some(S::Failed("bad".into()))
        );
        assert_eq!(S::Failed("bad".into()).next(&E::FileCleared), Some(S::Idle));
    }

    #[test]
    fn test_progress_and_messages() {
        assert_eq!(S::Submitting.progress(), Some(15));
        assert_eq!(S::AwaitingResult.progress(), Some(60));
        assert_eq!(S::Done.progress(), Some(100));
        assert_eq!(S::Failed("x".into()).progress(), None);
        assert_eq!(S::Failed("Coluna ausente".into()).message(), "Coluna ausente");
    }

    // -------------------------------------------------------------------------
    // Column list
    // -------------------------------------------------------------------------

    #[test]
    fn test_column_list_dedupes_ignoring_case() {
        let mut list = ColumnList::with_defaults();
        assert_eq!(list.as_slice(), &["Diâmetro".to_string(), "Comprimento (m)".to_string()]);

        assert!(!list.add("DIÂMETRO"));
        assert!(!list.add("  comprimento (m) "));
        assert!(!list.add("   "));
        assert!(list.add("  Espessura "));
        assert_eq!(list.as_slice().last().map(String::as_str), Some("Espessura"));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_column_list_remove_and_pop() {
        let mut list = ColumnList::with_defaults();
        assert_eq!(list.remove(5), None);
        assert_eq!(list.remove(0).as_deref(), Some("Diâmetro"));
        assert_eq!(list.pop().as_deref(), Some("Comprimento (m)"));
        assert!(list.is_empty());
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn test_params_to_request() {
        let mut params = MatchParams::default();
        params.cross_encoder_model = Some(String::new());
        params.rerank_top_k = None;

        let request = params.to_request(xlsx());
        assert_eq!(request.desc_col, DEFAULT_DESC_COL);
        assert_eq!(request.unit_col, "");
        assert_eq!(request.extra_num_cols, vec!["Diâmetro", "Comprimento (m)"]);
        assert_eq!(request.cross_encoder_model, None);
        assert_eq!(request.target_path, "/match");
    }

    // -------------------------------------------------------------------------
    // Controller
    // -------------------------------------------------------------------------

    fn client_for(uri: &str) -> ApiClient {
        ApiClient::new(
            uri,
            Arc::new(SessionStore::in_memory()),
            Arc::new(ScreenNavigator::new(HOME_PATH)),
        )
        .expect("client")
    }

    #[test]
    fn test_choose_non_xlsx_file_fails() {
        let mut session = SubmissionSession::default();
        let err = session
            .choose_file(UploadFile::new("dados.csv", vec![]))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(matches!(session.state(), S::Failed(_)));
        assert!(session.file().is_none());

        session.choose_file(xlsx()).expect("choose");
        assert_eq!(session.state(), &S::Ready);
    }

    #[tokio::test]
    async fn test_submit_without_file_is_rejected() {
        let mut session = SubmissionSession::default();
        let client = client_for("http://127.0.0.1:1");
        let err = session.submit(&client).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(session.state(), &S::Idle);
    }

    #[tokio::test]
    async fn test_successful_submission_stages_download() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", r#"attachment; filename="saida.zip""#)
                    .set_body_bytes(b"PK\x05\x06".to_vec()),
            )
            .expect(2)
            .mount(&server)
            .await;
        let client = client_for(&server.uri());

        let mut session = SubmissionSession::default();
        session.choose_file(xlsx()).expect("choose");
        let first_path = {
            let handle = session.submit(&client).await.expect("submit");
            assert_eq!(handle.filename(), "saida.zip");
            handle.path().to_path_buf()
        };
        assert_eq!(session.state(), &S::Done);
        assert!(first_path.exists());

        // Done is terminal until a new file arrives; choosing one drops the old result
        assert!(session.submit(&client).await.is_err());
        session.choose_file(xlsx()).expect("choose");
        assert!(!first_path.exists());
        assert!(session.download().is_none());

        session.submit(&client).await.expect("second submit");
        assert_eq!(session.state(), &S::Done);
    }

    #[tokio::test]
    async fn test_submit_reports_each_state_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK".to_vec()))
            .mount(&server)
            .await;
        let client = client_for(&server.uri());

        let mut session = SubmissionSession::default();
        session.choose_file(xlsx()).expect("choose");
        let mut seen = Vec::new();
        session
            .submit_with(&client, |state| seen.push((state.clone(), state.progress())))
            .await
            .expect("submit");

        assert_eq!(
            seen,
            vec![
                (S::Submitting, Some(15)),
                (S::AwaitingResult, Some(60)),
                (S::Done, Some(100)),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_submit_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = client_for(&server.uri());

        let mut session = SubmissionSession::default();
        session.choose_file(xlsx()).expect("choose");
        let mut seen = Vec::new();
        let result = session.submit_with(&client, |state| seen.push(state.clone())).await;

        assert!(result.is_err());
        assert_eq!(seen, vec![S::Submitting, S::Failed("Unexpected error.".into())]);
        assert!(session.state().is_terminal());
    }

    #[tokio::test]
    async fn test_failed_submission_records_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"message": "Planilha vazia"})),
            )
            .mount(&server)
            .await;
        let client = client_for(&server.uri());

        let mut session = SubmissionSession::default();
        session.choose_file(xlsx()).expect("choose");
        let err = session.submit(&client).await.unwrap_err();
        assert!(matches!(err, ApiError::Submission(_)));
        assert_eq!(session.state(), &S::Failed("Planilha vazia".into()));
        assert!(session.download().is_none());
    }
}
