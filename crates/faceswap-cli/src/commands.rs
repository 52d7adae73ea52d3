//! Subcommand implementations.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use faceswap_core::api::UploadFile;
use faceswap_core::config::TokenStoreKind;
use faceswap_core::{ApiClient, Config, JobPoller, SessionEvent, SessionManager, SwapEvent};

/// Everything a command needs: configuration, session and API client.
pub struct Context {
    pub config: Config,
    pub api: ApiClient,
}

impl Context {
    pub fn open() -> Result<Self> {
        let config = Config::load()?;
        let session = Arc::new(SessionManager::new(config.token_store()?));
        let api = ApiClient::from_config(&config, session).context("Failed to create API client")?;
        Ok(Self { config, api })
    }
}

pub async fn login(ctx: &Context, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(name) => name,
        None => prompt("Username: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    match ctx.api.login(&username, &password).await {
        Ok(user) => {
            println!("Signed in as {}", user.display_name());
            Ok(())
        }
        Err(e) => Err(anyhow!(e.notification())),
    }
}

pub async fn logout(ctx: &Context) -> Result<()> {
    if !ctx.api.session().is_authenticated().await {
        println!("Not signed in");
        return Ok(());
    }
    if ctx.api.logout().await {
        println!("Signed out");
    } else {
        println!("Signed out locally (the server did not confirm)");
    }
    Ok(())
}

pub async fn whoami(ctx: &Context) -> Result<()> {
    let user = ctx
        .api
        .restore_session()
        .await
        .map_err(|e| anyhow!(e.notification()))?;

    match (user, ctx.api.session().session().await) {
        (Some(user), Some(session)) => {
            println!("{}", user.display_name());
            if let Some(email) = &user.email {
                println!("  email: {}", email);
            }
            println!("  token refreshed {} minutes ago", session.age_minutes());
        }
        _ => println!("Not signed in"),
    }
    Ok(())
}

pub async fn swap(ctx: &Context, face: &Path, target: &Path, seed: Option<u64>) -> Result<()> {
    if ctx.api.restore_session().await.map_err(|e| anyhow!(e.notification()))?.is_none() {
        bail!("Not signed in, run `faceswap login` first");
    }
    let mut session_events = ctx.api.session().subscribe();

    let face_name = ctx
        .api
        .upload_face(UploadFile::from_path(face).await?)
        .await
        .map_err(|e| anyhow!("Face image: {}", e.notification()))?;
    let target_name = ctx
        .api
        .upload_target(UploadFile::from_path(target).await?)
        .await
        .map_err(|e| anyhow!("Target image: {}", e.notification()))?;
    debug!(face = %face_name, target = %target_name, "Images uploaded");

    let (poller, mut events) = JobPoller::new(ctx.api.clone(), ctx.config.poll_config());
    poller
        .submit(&face_name, &target_name, seed)
        .await
        .map_err(|e| anyhow!(e.notification()))?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("Swap stopped unexpectedly");
                };
                match event {
                    SwapEvent::Submitted { job_id } => println!("Job {} submitted", job_id),
                    SwapEvent::Progress { status, .. } => debug!(status = status.as_str(), "Job progress"),
                    SwapEvent::PollMiss { message, .. } => eprintln!("{}", message),
                    SwapEvent::Done { links, .. } => {
                        for link in links {
                            println!("{}", link.url);
                        }
                        return Ok(());
                    }
                    SwapEvent::Failed { message, .. } => bail!(message),
                }
            }
            event = session_events.recv() => match event {
                Ok(SessionEvent::Unauthorized) => {
                    poller.cancel().await;
                    bail!("Session expired, run `faceswap login` again");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => warn!("Session event channel closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                poller.cancel().await;
                bail!("Cancelled");
            }
        }
    }
}

pub fn configure(
    base_url: Option<String>,
    token_store: Option<String>,
    poll_interval_ms: Option<u64>,
) -> Result<()> {
    // Edit the file as saved, without environment overrides
    let path = Config::config_path()?;
    let mut config = Config::load_from(&path)?;
    let changed = base_url.is_some() || token_store.is_some() || poll_interval_ms.is_some();

    if let Some(url) = base_url {
        config.base_url = url;
    }
    if let Some(raw) = token_store {
        config.token_store =
            TokenStoreKind::parse(&raw).ok_or_else(|| anyhow!("Unknown token store: {}", raw))?;
    }
    if let Some(ms) = poll_interval_ms {
        if ms == 0 {
            bail!("Poll interval must be greater than zero");
        }
        config.poll_interval_ms = ms;
    }

    if changed {
        config.save_to(&path)?;
    }
    println!("{}", describe(&config));
    Ok(())
}

fn describe(config: &Config) -> String {
    format!(
        "base_url: {}\npoll_interval_ms: {}\nmax_poll_attempts: {}\nrequest_timeout_secs: {}\ntoken_store: {:?}",
        config.base_url,
        config.poll_interval_ms,
        config
            .max_poll_attempts
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".to_string()),
        config.request_timeout_secs,
        config.token_store,
    )
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No username given");
    }
    Ok(value)
}
