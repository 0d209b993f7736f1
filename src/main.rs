use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use feedwatch::api::{ApiClient, ApiError};
use feedwatch::config::Config;
use feedwatch::engine::{Engine, EngineError, EngineEvent};
use feedwatch::feed::FeedItem;
use feedwatch::storage::{Database, DatabaseError};

/// How long a one-shot command waits for a token refresh before giving up.
const REFRESH_WAIT: Duration = Duration::from_secs(30);

/// Get the config directory path (~/.config/feedwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedwatch");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "feedwatch", version, about = "Headless Feedly unread counter and feed sync")]
struct Args {
    /// Config file (default: ~/.config/feedwatch/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine until interrupted, logging its events
    Run,
    /// Authorize feedwatch against your Feedly account
    Login {
        /// Exchange an authorization code obtained elsewhere
        #[arg(long)]
        code: Option<String>,
        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Forget stored tokens
    Logout,
    /// Show session state
    Status,
    /// List unread (or saved) entries
    Feeds {
        #[arg(long)]
        saved: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Mark entries as read
    MarkRead {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Save an entry for later
    Save { id: String },
    /// Remove an entry from saved
    Unsave { id: String },
    /// List categories, for use as filters
    Categories,
    /// Print the unread count
    Unread,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // Tokens live under this directory: user-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = config_dir.join("session.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedwatch appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let client = ApiClient::build().context("Failed to build HTTP client")?;
    let engine = Engine::new(config, db, client)
        .await
        .context("Failed to start engine")?;

    let outcome = dispatch(&engine, args.command).await;
    engine.shutdown().await;
    outcome
}

async fn dispatch(engine: &Arc<Engine>, command: Command) -> Result<()> {
    match command {
        Command::Run => run(engine).await,
        Command::Login { code, no_browser } => login(engine, code, no_browser).await,
        Command::Logout => {
            engine.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            let summary = engine.session_summary().await;
            println!("Access token:   {}", yes_no(summary.has_access_token));
            println!("Refresh token:  {}", yes_no(summary.has_refresh_token));
            println!(
                "User id:        {}",
                summary.user_id.as_deref().unwrap_or("(unknown)")
            );
            println!(
                "Last new entry: {}",
                summary
                    .last_feed_seen_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "(never)".to_string())
            );
            if summary.authorization_retry_pending {
                println!("A token refresh is pending.");
            }
            Ok(())
        }
        Command::Feeds { saved, json } => {
            let list = with_reauth(engine, move || async move {
                let list = if saved {
                    engine.get_saved_feeds(true).await
                } else {
                    engine.get_feeds().await
                };
                if list.is_logged_in {
                    Ok(list)
                } else {
                    Err(EngineError::Api(ApiError::AuthorizationRequired))
                }
            })
            .await?;
            print_feeds(&list.feeds, json)
        }
        Command::MarkRead { ids } => {
            let count = ids.len();
            with_reauth(engine, || engine.mark_as_read(ids.clone())).await?;
            println!("Marked {} entries as read.", count);
            Ok(())
        }
        Command::Save { id } => {
            with_reauth(engine, || engine.set_saved(&id, true)).await?;
            println!("Saved {}.", id);
            Ok(())
        }
        Command::Unsave { id } => {
            with_reauth(engine, || engine.set_saved(&id, false)).await?;
            println!("Removed {} from saved.", id);
            Ok(())
        }
        Command::Categories => {
            let categories = with_reauth(engine, || engine.get_categories()).await?;
            if categories.is_empty() {
                println!("No categories (not logged in?).");
            }
            for category in categories {
                println!("{}\t{}", category.id, category.label);
            }
            Ok(())
        }
        Command::Unread => {
            let count = with_reauth(engine, || engine.update_counter()).await?;
            println!("{}", count);
            Ok(())
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Run `op`; if the access token was rejected, wait for the engine's
/// background refresh and try once more.
async fn with_reauth<T, F, Fut>(engine: &Arc<Engine>, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    match op().await {
        Err(EngineError::Api(ApiError::AuthorizationRequired)) => {}
        Err(EngineError::NotLoggedIn) => {
            anyhow::bail!("Not logged in. Run `feedwatch login` first.")
        }
        other => return Ok(other?),
    }

    if !engine.session_summary().await.has_refresh_token {
        anyhow::bail!("Authorization required. Run `feedwatch login`.");
    }

    let deadline = tokio::time::Instant::now() + REFRESH_WAIT;
    while engine.session_summary().await.authorization_retry_pending {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("Timed out waiting for token refresh");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    op().await
        .map_err(|e| anyhow::anyhow!("{} (try `feedwatch login`)", e))
}

fn print_feeds(feeds: &[FeedItem], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(feeds)?);
        return Ok(());
    }

    if feeds.is_empty() {
        println!("No entries.");
    }
    for item in feeds {
        let when = item
            .crawled_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<16} {}{} | {}",
            when,
            if item.is_saved { "* " } else { "" },
            item.title.as_deref().unwrap_or("(untitled)"),
            item.blog.as_deref().unwrap_or("")
        );
        println!("                 {}  [{}]", item.url, item.id);
    }
    Ok(())
}

async fn login(engine: &Arc<Engine>, code: Option<String>, no_browser: bool) -> Result<()> {
    if let Some(code) = code {
        engine.exchange_code(&code).await?;
        println!("Logged in.");
        return Ok(());
    }

    let url = engine.begin_authorization().await?;
    println!("Open this URL to authorize feedwatch:\n\n  {}\n", url);
    if !no_browser {
        if let Err(e) = open::that(url.as_str()) {
            tracing::warn!(error = %e, "Failed to open browser");
        }
    }

    println!("After approving, paste the address your browser was redirected to:");
    let redirect = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await
    .context("Failed to read redirect URL")??;

    engine.complete_authorization(redirect.trim()).await?;
    println!("Logged in.");
    Ok(())
}

async fn run(engine: &Arc<Engine>) -> Result<()> {
    let mut events = engine.subscribe();
    if let Err(e) = engine.initialize().await {
        tracing::warn!(error = %e, "Initialization failed, waiting for login");
    }

    // Signal handlers for graceful shutdown (Unix only)
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = async {
            let _ = tokio::signal::ctrl_c().await;
            Some(())
        };

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }
            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::UnreadCountUpdated {
            count,
            is_logged_in,
        } => {
            tracing::info!(count = count, logged_in = is_logged_in, "Unread count");
        }
        EngineEvent::NewFeedsDetected { feeds, many } => {
            if feeds.len() > 1 {
                let count = if *many {
                    format!("{}+", feeds.len())
                } else {
                    feeds.len().to_string()
                };
                tracing::info!(count = %count, "New entries");
            } else {
                for item in feeds {
                    tracing::info!(
                        blog = item.blog.as_deref().unwrap_or(""),
                        title = item.title.as_deref().unwrap_or(""),
                        url = %item.url,
                        "New entry"
                    );
                }
            }
        }
        EngineEvent::OpenUrl { url, .. } => {
            tracing::info!(url = %url, "Open in browser");
        }
        other => tracing::debug!(event = ?other, "Engine event"),
    }
}
