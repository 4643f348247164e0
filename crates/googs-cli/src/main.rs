//! Googs CLI - a command-line front end for the Googs backend session.
//!
//! This binary is the composition root: it loads configuration, builds the
//! secure session store and the session manager, and runs one command
//! against them.

mod identity;

use std::io;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use googs_core::auth::{EncryptedFileBackend, KeychainBackend};
use googs_core::{ApiError, Config, Environment, SessionManager, SessionStore, StoreKind};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Passphrase for the encrypted-file session store
const ENV_STORE_PASSPHRASE: &str = "GOOGS_STORE_PASSPHRASE";

/// Set to `1` to also write logs to the cache directory
const ENV_LOG_FILE: &str = "GOOGS_LOG_FILE";

const LOG_FILE_NAME: &str = "googs.log";

const USAGE: &str = "\
Usage: googs <command> [args]

Commands:
  status                 Show session and environment
  login [ID_TOKEN]       Exchange an identity token for a backend session
  logout                 Sign out (local state is always cleared)
  env [local|production] Show or switch the backend environment
  ping                   Check that the backend is reachable
  get <PATH>             Authenticated GET, prints the JSON response
  post <PATH> [JSON]     Authenticated POST with an optional JSON body
  push-token <TOKEN>     Register a push-notification token";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file_writer() {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn log_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    if std::env::var(ENV_LOG_FILE).ok().as_deref() != Some("1") {
        return None;
    }
    let dir = Config::cache_dir().ok()?;
    std::fs::create_dir_all(&dir).ok()?;
    Some(tracing_appender::non_blocking(tracing_appender::rolling::never(
        dir,
        LOG_FILE_NAME,
    )))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &anyhow::Error) {
    let expired = err
        .chain()
        .any(|cause| cause.downcast_ref::<ApiError>().is_some_and(ApiError::is_session_expired));
    if expired {
        eprintln!("Session expired, please sign in again");
    } else {
        eprintln!("Error: {:#}", err);
    }
}

fn build_store(config: &Config) -> Result<SessionStore> {
    match config.store {
        StoreKind::Keychain => Ok(SessionStore::new(KeychainBackend::default())),
        StoreKind::EncryptedFile => {
            let passphrase = std::env::var(ENV_STORE_PASSPHRASE).with_context(|| {
                format!("{} must be set for the encrypted-file store", ENV_STORE_PASSPHRASE)
            })?;
            let backend = EncryptedFileBackend::new(Config::session_dir()?, passphrase)
                .context("Failed to open encrypted session store")?;
            Ok(SessionStore::new(backend))
        }
    }
}

async fn run(args: &[String]) -> Result<()> {
    let command = args.first().map(String::as_str).unwrap_or("status");
    if matches!(command, "help" | "-h" | "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    config.apply_env_overrides()?;

    let store = build_store(&config)?;
    let manager = SessionManager::with_default_transport(store, config.target())
        .context("Failed to create HTTP client")?;
    info!(command, environment = %manager.environment(), "Running command");

    match command {
        "status" => print_json(&serde_json::to_value(manager.status())?),
        "login" => login(&manager, args.get(1).cloned()).await,
        "logout" => {
            manager.sign_out().await;
            println!("Signed out");
            Ok(())
        }
        "env" => switch_environment(&manager, &config, args.get(1).map(String::as_str)),
        "ping" => {
            let environment = manager.environment().display_name();
            if manager.test_connection().await? {
                println!("Connected successfully to {}", environment);
                Ok(())
            } else {
                bail!("Failed to connect to {}", environment)
            }
        }
        "get" => {
            let path = required(args, 1, "PATH")?;
            let value: serde_json::Value = manager.get(path).await?;
            print_json(&value)
        }
        "post" => {
            let path = required(args, 1, "PATH")?;
            let body: serde_json::Value = match args.get(2) {
                Some(raw) => serde_json::from_str(raw).context("Request body is not valid JSON")?,
                None => serde_json::json!({}),
            };
            let value: serde_json::Value = manager.post(path, &body).await?;
            print_json(&value)
        }
        "push-token" => {
            let token = required(args, 1, "TOKEN")?;
            manager.update_push_token(token).await?;
            println!("Push token registered");
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(manager: &SessionManager, token: Option<String>) -> Result<()> {
    let environment = manager.environment().display_name();
    match token {
        Some(token) => {
            manager.exchange(&token).await?;
            println!("Signed in to {}", environment);
        }
        None => {
            let provider = identity::PromptIdentityProvider;
            if manager.ensure_authenticated(&provider).await? {
                println!("Signed in to {}", environment);
            } else {
                println!("Already signed in to {}", environment);
            }
        }
    }
    Ok(())
}

fn switch_environment(manager: &SessionManager, config: &Config, name: Option<&str>) -> Result<()> {
    let Some(name) = name else {
        for environment in Environment::ALL {
            let marker = if environment == manager.environment() { "*" } else { " " };
            println!(
                "{} {:<11} {}",
                marker,
                environment.as_str(),
                config.base_url(environment)
            );
        }
        return Ok(());
    };

    let environment: Environment = name.parse()?;
    manager.switch_environment(config.target_for(environment));

    // Persist the selection without baking in any environment-variable overrides
    let mut saved = Config::load()?;
    saved.environment = environment;
    saved.save().context("Failed to save config")?;

    println!(
        "Switched to {}. Authentication has been cleared for security.",
        environment.display_name()
    );
    Ok(())
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("Missing {}\n\n{}", name, USAGE))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
