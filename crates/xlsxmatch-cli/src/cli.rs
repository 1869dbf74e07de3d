use std::num::NonZeroU32;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use xlsxmatch_core::api::LoginOptions;
use xlsxmatch_core::submission::{
    ColumnList, MatchParams, DEFAULT_CROSS_ENCODER_MODEL, DEFAULT_DESC_COL, DEFAULT_RERANK_TOP_K,
};

/// Command line client for the spreadsheet matching service.
#[derive(Parser, Debug)]
#[command(name = "xlsxmatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the session.
    Login(LoginArgs),

    /// Clear the stored session.
    Logout {
        /// Also forget the remembered password for the last user.
        #[arg(long)]
        forget: bool,
    },

    /// Check whether the stored session is still valid.
    Status,

    /// Upload a spreadsheet for matching and save the result archive.
    Match(MatchArgs),
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Username (prompted for when omitted).
    #[arg(long, short)]
    pub username: Option<String>,

    /// Keep the password in the OS keychain.
    #[arg(long)]
    pub remember: bool,

    /// Alternate login path on the server.
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    #[arg(long)]
    pub scope: Option<String>,

    #[arg(long = "client-id")]
    pub client_id: Option<String>,

    #[arg(long = "client-secret")]
    pub client_secret: Option<String>,
}

impl LoginArgs {
    pub fn options(&self) -> LoginOptions {
        LoginOptions {
            scope: self.scope.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            path: self.path.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct MatchArgs {
    /// Spreadsheet to upload (.xlsx).
    pub file: PathBuf,

    /// Column holding the item description.
    #[arg(long = "desc-col", default_value = DEFAULT_DESC_COL)]
    pub desc_col: String,

    /// Column holding the unit, if any.
    #[arg(long = "unit-col", default_value = "")]
    pub unit_col: String,

    /// Extra numeric column (repeatable).
    #[arg(long = "extra-col", value_name = "NAME")]
    pub extra_cols: Vec<String>,

    /// Do not start from the built-in extra numeric columns.
    #[arg(long)]
    pub no_default_extra_cols: bool,

    /// Candidates passed to the re-ranker.
    #[arg(long = "rerank-top-k", default_value_t = DEFAULT_RERANK_TOP_K)]
    pub rerank_top_k: u32,

    /// Cross-encoder model used for re-ranking. Empty to use the server default.
    #[arg(long = "cross-encoder-model", default_value = DEFAULT_CROSS_ENCODER_MODEL)]
    pub cross_encoder_model: String,

    /// Match endpoint path.
    #[arg(long, value_name = "PATH", default_value = "/match")]
    pub path: String,

    /// Directory for the result archive.
    ///
    /// Defaults to the config's output_dir, then the current directory.
    #[arg(long, short, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

impl MatchArgs {
    pub fn params(&self) -> MatchParams {
        let mut extra_cols = if self.no_default_extra_cols {
            ColumnList::new()
        } else {
            ColumnList::with_defaults()
        };
        for column in &self.extra_cols {
            extra_cols.add(column);
        }

        MatchParams {
            desc_col: self.desc_col.clone(),
            unit_col: self.unit_col.clone(),
            extra_cols,
            // 0 means "let the server decide"
            rerank_top_k: NonZeroU32::new(self.rerank_top_k),
            cross_encoder_model: Some(self.cross_encoder_model.trim().to_string())
                .filter(|m| !m.is_empty()),
            target_path: self.path.clone(),
        }
    }
}
