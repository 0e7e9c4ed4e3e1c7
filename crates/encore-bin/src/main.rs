//! Encore command-line host for the session lifecycle.

mod auth;

use std::path::PathBuf;
use std::process::ExitCode;

use auth_engine::{AuthError, LifecyclePayload, SessionLifecycle};
use clap::{Parser, Subcommand};
use encore_config_and_utils::{init_logging, Config, Paths};

/// Encore command-line interface.
#[derive(Parser)]
#[command(name = "encore")]
#[command(about = "Sign Encore in to your music service account")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "ENCORE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Base directory for config, logs and credentials. Defaults to ~/.encore
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser
    Login {
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Local callback port
        #[arg(long)]
        port: Option<u16>,

        /// Seconds to wait for the browser to come back
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Reject callbacks whose `state` does not match
        #[arg(long)]
        strict_state: bool,
    },
    /// Use an existing session key
    Adopt {
        /// Session key issued by the music service
        #[arg(long, env = "ENCORE_SESSION_KEY", hide_env_values = true)]
        key: String,
    },
    /// Show whether a session is active
    Status,
    /// Load the stored session
    Restore,
    /// Forget the session and delete the stored record
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let lifecycle = match SessionLifecycle::from_config(&config, &paths) {
        Ok(lifecycle) => lifecycle,
        Err(e) => return emit(&LifecyclePayload::from_auth_error(&e)),
    };

    if !matches!(cli.command, Commands::Restore) {
        auth::restore_quietly(&lifecycle).await;
    }

    let payload = match cli.command {
        Commands::Login {
            no_browser,
            port,
            timeout_secs,
            strict_state,
        } => {
            if let Err(e) = config.validate_for_auth() {
                return emit(&LifecyclePayload::from_auth_error(&AuthError::from(e)));
            }
            let options = auth::login_options(no_browser, port, timeout_secs, strict_state);
            auth::login(&lifecycle, options).await
        }
        Commands::Adopt { key } => {
            if let Err(e) = config.validate_for_auth() {
                return emit(&LifecyclePayload::from_auth_error(&AuthError::from(e)));
            }
            auth::adopt(&lifecycle, &key).await
        }
        Commands::Status => auth::status(&lifecycle),
        Commands::Restore => auth::restore(&lifecycle).await,
        Commands::Logout => auth::logout(&lifecycle).await,
    };

    emit(&payload)
}

/// Print the payload as JSON; failures exit non-zero.
fn emit(payload: &LifecyclePayload) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(if payload.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
