//! xlsxmatch - command line client for the spreadsheet matching service.
//!
//! Logs in against the service, keeps the session in the configured store
//! and uploads spreadsheets for matching, saving the returned archive.

mod cli;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xlsxmatch_core::api::{Navigator, ScreenNavigator, HOME_PATH, LOGIN_PATH};
use xlsxmatch_core::auth::{CredentialStore, FileStorage, KeyringStorage, SessionStore};
use xlsxmatch_core::config::SessionBackend;
use xlsxmatch_core::submission::{SubmissionSession, SubmissionState};
use xlsxmatch_core::{ApiClient, ApiError, AuthSnapshot, Config, UploadFile};

use cli::{Cli, Command, LoginArgs, MatchArgs};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g. RUST_LOG=xlsxmatch_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;

    match cli.command {
        Command::Login(args) => login(&mut config, args).await,
        Command::Logout { forget } => logout(&config, forget),
        Command::Status => status(&config).await,
        Command::Match(args) => run_match(&config, args).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

struct Connection {
    client: ApiClient,
    navigator: Arc<ScreenNavigator>,
}

fn open_session(config: &Config) -> Result<SessionStore> {
    let store = match config.session_backend {
        SessionBackend::File => SessionStore::new(FileStorage::new(config.data_dir()?)),
        SessionBackend::Keyring => SessionStore::new(KeyringStorage::new()),
    };
    Ok(store)
}

fn connect(config: &Config, location: &str) -> Result<Connection> {
    let base_url = config.resolve_base_url()?;
    let session = Arc::new(open_session(config)?);
    let navigator = Arc::new(ScreenNavigator::new(location));
    let client = ApiClient::with_timeout(
        &base_url,
        session,
        navigator.clone(),
        config.request_timeout(),
    )?;
    info!(base_url = %base_url, "Client ready");
    Ok(Connection { client, navigator })
}

// ============================================================================
// Commands
// ============================================================================

async fn login(config: &mut Config, args: LoginArgs) -> Result<()> {
    let ctx = connect(config, LOGIN_PATH)?;
    let credentials = CredentialStore::new();

    let username = match args.username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => prompt_username(config.last_username.as_deref())?,
    };
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }

    let remembered = credentials.lookup(&username).unwrap_or_else(|e| {
        warn!(error = %e, "Keychain unavailable");
        None
    });
    let used_remembered = remembered.is_some();
    let mut password = match remembered {
        Some(password) => password,
        None => prompt_password()?,
    };

    eprintln!("Authenticating...");
    let options = args.options();
    let mut result = ctx.client.login(&username, &password, &options).await;
    if matches!(&result, Err(e) if should_reprompt(e, used_remembered)) {
        eprintln!("Remembered password was rejected.");
        password = prompt_password()?;
        result = ctx.client.login(&username, &password, &options).await;
    }
    let response = result.map_err(|e| anyhow::anyhow!(e.user_message()))?;

    ctx.client
        .session()
        .set_auth(&AuthSnapshot::from(response))
        .context("Failed to store session")?;

    // Keep an existing keychain entry current even without --remember
    if args.remember || used_remembered {
        if let Err(e) = credentials.remember(&username, &password) {
            warn!(error = %e, "Failed to store credentials");
        }
    }

    config.last_username = Some(username.clone());
    config.save()?;

    ctx.navigator.navigate(HOME_PATH);
    println!("Logged in as {}", username);
    Ok(())
}

/// A remembered password that the server rejects is asked for again once
fn should_reprompt(error: &ApiError, used_remembered: bool) -> bool {
    used_remembered && matches!(error, ApiError::Auth(_))
}

fn prompt_password() -> Result<String> {
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

fn prompt_username(last_user: Option<&str>) -> Result<String> {
    match last_user {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last_user) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

fn logout(config: &Config, forget: bool) -> Result<()> {
    open_session(config)?
        .clear_auth()
        .context("Failed to clear session")?;

    if forget {
        if let Some(username) = config.last_username.as_deref() {
            CredentialStore::new().forget(username)?;
        }
    }

    println!("Logged out");
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let ctx = connect(config, HOME_PATH)?;

    if ctx.client.verify_session().await {
        let saved = ctx
            .client
            .session()
            .saved_at()
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string());
        match saved {
            Some(saved) => println!("Session valid (saved {})", saved),
            None => println!("Session valid"),
        }
        Ok(())
    } else {
        anyhow::bail!("Not logged in or session expired. Run `xlsxmatch login`.")
    }
}

async fn run_match(config: &Config, args: MatchArgs) -> Result<()> {
    let ctx = connect(config, HOME_PATH)?;

    let file = UploadFile::read(&args.file).await?;
    let mut submission = SubmissionSession::new(args.params());
    submission
        .choose_file(file)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if !ctx.client.verify_session().await {
        ctx.navigator.navigate(LOGIN_PATH);
        anyhow::bail!("Session is not valid. Run `xlsxmatch login` first.");
    }

    eprintln!("{}", args.file.display());
    let handle = submission
        .submit_with(&ctx.client, report_progress)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let output_dir = args
        .output
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let saved = handle.persist_into(&output_dir)?;

    info!(location = %ctx.navigator.current_location(), "Match finished");
    println!("{}", saved.display());
    Ok(())
}

fn report_progress(state: &SubmissionState) {
    eprintln!("{}", progress_line(state));
}

fn progress_line(state: &SubmissionState) -> String {
    match state.progress() {
        Some(percent) => format!("[{:>3}%] {}", percent, state.message()),
        None => format!("[ -- ] {}", state.message()),
    }
}
