//! gymtrack - command-line client for the gymtrack fitness service.
//!
//! Restores the stored session on start, then runs one command against it:
//! signing in or out, showing the current user, or editing the profile.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use gymtrack_core::{
    ApiError, Config, SessionError, SessionManager, SessionState, UserProfile,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variables consulted by `login` before prompting
const EMAIL_ENV: &str = "GYMTRACK_EMAIL";
const PASSWORD_ENV: &str = "GYMTRACK_PASSWORD";

const USAGE: &str = "\
Usage: gymtrack <command>

Commands:
  login [email]      Sign in and remember the session
  logout             Sign out and forget the stored session
  whoami             Show the signed-in user
  rename <name>      Change the display name
  password           Change the password
  avatar <image>     Upload a new avatar (up to 5MB)
  avatar-url         Print the URL of the current avatar";

#[derive(Debug, PartialEq)]
enum Command {
    Login { email: Option<String> },
    Logout,
    WhoAmI,
    Rename { name: String },
    Password,
    Avatar { image: PathBuf },
    AvatarUrl,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let command = match (args.next(), args.next()) {
            (Some("login"), email) => Command::Login {
                email: email.map(str::to_string),
            },
            (Some("logout"), None) => Command::Logout,
            (Some("whoami"), None) => Command::WhoAmI,
            (Some("rename"), Some(name)) if !name.trim().is_empty() => Command::Rename {
                name: name.trim().to_string(),
            },
            (Some("password"), None) => Command::Password,
            (Some("avatar"), Some(image)) => Command::Avatar {
                image: PathBuf::from(image),
            },
            (Some("avatar-url"), None) => Command::AvatarUrl,
            _ => bail!("{}", USAGE),
        };
        if args.next().is_some() {
            bail!("{}", USAGE);
        }
        Ok(command)
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let session = SessionManager::new(config.api_client()?, config.credential_store()?);
    let restored = session.bootstrap().await?;
    info!(authenticated = restored.is_authenticated(), "Session bootstrapped");

    match run(&session, &mut config, command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", describe(&e));
            std::process::exit(1);
        }
    }
}

async fn run(session: &SessionManager, config: &mut Config, command: Command) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = match email.or_else(|| std::env::var(EMAIL_ENV).ok()) {
                Some(email) => email,
                None => prompt_email(config.last_email.as_deref())?,
            };
            let password = match std::env::var(PASSWORD_ENV) {
                Ok(password) => password,
                Err(_) => rpassword::prompt_password("Password: ")?,
            };
            if email.is_empty() || password.is_empty() {
                bail!("Email and password required");
            }

            let user = session.sign_in(&email, &password).await?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Signed in as {}", user.name);
        }
        Command::Logout => {
            let report = session.sign_out().await?;
            if let Some(e) = report.storage_error {
                eprintln!("Warning: {}", e);
            }
            println!("Signed out");
        }
        Command::WhoAmI => match session.snapshot().state {
            SessionState::Authenticated(user) => print_user(&user)?,
            _ => println!("Not signed in"),
        },
        Command::Rename { name } => {
            let user = session.change_profile(&name, None, None).await?;
            println!("Name changed to {}", user.name);
        }
        Command::Password => {
            let user = session.current_user().ok_or(SessionError::NotAuthenticated)?;
            let old_password = rpassword::prompt_password("Current password: ")?;
            let password = rpassword::prompt_password("New password: ")?;
            let confirmation = rpassword::prompt_password("Confirm new password: ")?;
            if password != confirmation {
                bail!("Password confirmation does not match");
            }
            session
                .change_profile(&user.name, Some(password), Some(old_password))
                .await?;
            println!("Password changed");
        }
        Command::Avatar { image } => {
            let user = session.change_avatar(&image).await?;
            if let Some(avatar) = user.avatar {
                println!("Avatar updated: {}", session.api().avatar_url(&avatar));
            }
        }
        Command::AvatarUrl => {
            let user = session.current_user().ok_or(SessionError::NotAuthenticated)?;
            match user.avatar {
                Some(avatar) => println!("{}", session.api().avatar_url(&avatar)),
                None => println!("No avatar set"),
            }
        }
    }
    Ok(())
}

fn prompt_email(last_email: Option<&str>) -> Result<String> {
    match last_email {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last_email) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

fn print_user(user: &UserProfile) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

/// User-facing text for a failed command
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<SessionError>() {
        Some(SessionError::Api(api)) => api.user_message(),
        Some(other) => other.to_string(),
        None => match err.downcast_ref::<ApiError>() {
            Some(api) => api.user_message(),
            None => err.to_string(),
        },
    }
}
