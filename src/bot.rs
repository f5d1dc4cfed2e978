use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use grammers_client::types::{Chat, Message, User};
use grammers_client::{Client, Config as ClientConfig, InitParams, SignInError, Update};
use grammers_session::Session;
use tracing::{error, info};

use crate::commands;
use crate::config::{prompt, Settings};
use crate::gate::AdminGate;
use crate::intake::{self, MediaKind};
use crate::registry::{FolderRegistry, SenderIdentity};

/// Shared application state
pub struct App {
    pub client: Client,
    pub me: User,
    pub registry: FolderRegistry,
    pub gate: AdminGate,
    pub settings: Settings,
    pub http: reqwest::Client,
    pub started_at: DateTime<Utc>,
}

impl App {
    pub async fn new(client: Client, settings: Settings) -> Result<Self> {
        let me = client
            .get_me()
            .await
            .context("Failed to resolve own account")?;
        let admin_id = settings.admin_id()?;
        Ok(Self {
            registry: FolderRegistry::new(settings.media_root.clone()),
            gate: AdminGate::new(admin_id),
            http: reqwest::Client::new(),
            started_at: Utc::now(),
            client,
            me,
            settings,
        })
    }
}

/// Connect with the saved session, signing in interactively on first run.
pub async fn connect(settings: &Settings) -> Result<Client> {
    let session = Session::load_file_or_create(&settings.session_file).with_context(|| {
        format!(
            "Failed to load session file: {}",
            settings.session_file.display()
        )
    })?;

    let client = Client::connect(ClientConfig {
        session,
        api_id: settings.api_id,
        api_hash: settings.api_hash.clone(),
        params: InitParams::default(),
    })
    .await
    .context("Failed to connect to Telegram")?;

    if !client.is_authorized().await? {
        info!("No authorized session, signing in");
        let phone = prompt("Enter your phone number (international format): ")?;
        let token = client
            .request_login_code(&phone)
            .await
            .context("Failed to request login code")?;
        let code = prompt("Enter the login code: ")?;
        match client.sign_in(&token, &code).await {
            Ok(user) => info!("Signed in as user {}", user.id()),
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().unwrap_or("none").to_string();
                let password = prompt(&format!("Enter your 2FA password (hint: {}): ", hint))?;
                let user = client
                    .check_password(password_token, password.trim())
                    .await
                    .context("2FA password check failed")?;
                info!("Signed in as user {}", user.id());
            }
            Err(e) => return Err(e).context("Sign-in failed"),
        }
        client
            .session()
            .save_to_file(&settings.session_file)
            .with_context(|| {
                format!(
                    "Failed to save session file: {}",
                    settings.session_file.display()
                )
            })?;
    }

    Ok(client)
}

/// Pump updates until Ctrl-C (Ok) or a transport failure (Err, which the
/// caller's reconnect loop handles). Each update runs on its own task, so
/// a slow download never stalls dispatch.
pub async fn run(app: Arc<App>) -> Result<()> {
    info!(
        "Listening for updates as @{} (id {})",
        app.me.username().unwrap_or("None"),
        app.me.id()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, exiting");
                return Ok(());
            }

            update = app.client.next_update() => {
                let update = update.context("Update stream failed")?;
                let app = app.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_update(&app, update).await {
                        error!("Error handling update: {:#}", err);
                    }
                });
            }
        }
    }
}

async fn handle_update(app: &App, update: Update) -> Result<()> {
    match update {
        Update::NewMessage(msg) => handle_message(app, msg).await,
        _ => Ok(()),
    }
}

async fn handle_message(app: &App, msg: Message) -> Result<()> {
    // Only private conversations matter, for intake and commands alike.
    if !matches!(msg.chat(), Chat::User(_)) {
        return Ok(());
    }
    let sender = match msg.sender() {
        Some(sender) => sender,
        None => return Ok(()),
    };
    let sender_id = sender.id();

    // Media intake: unread photos/videos from anyone but ourselves. The
    // unread flag keeps a redelivered message from being stored twice in
    // one session.
    if sender_id != app.me.id() && !msg.outgoing() {
        if let Some(media) = msg.media() {
            if MediaKind::classify(&media).is_some() && msg.raw.media_unread {
                let identity =
                    SenderIdentity::new(sender_id, sender.username().map(str::to_string));
                if let Err(e) = intake::handle_media(app, &msg, &identity).await {
                    error!("Intake failed for sender {}: {:#}", sender_id, e);
                    // Best effort; the sender may have blocked us by now.
                    msg.respond(e.user_message()).await.ok();
                }
                return Ok(());
            }
        }
    }

    // Owner-only: replying /save to a media message stores it on demand,
    // unread or not.
    if sender_id == app.me.id() && intake::is_save_trigger(msg.text()) {
        if let Err(e) = intake::handle_reply_save(app, &msg).await {
            error!("Reply save failed: {:#}", e);
            msg.respond(e.user_message()).await.ok();
        }
        return Ok(());
    }

    if let Some(cmd) = commands::parse(msg.text()) {
        commands::handle(app, &msg, sender_id, cmd).await?;
    }

    Ok(())
}
