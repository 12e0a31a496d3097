use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use commons_client::{HttpApi, WsPushChannel};
use commons_sync::{Draft, Session, StoreUpdate, SyncConfig};
use commons_types::{CurrentUser, MessageId, Subject, ThreadId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commons=debug,commons_client=debug,commons_sync=debug".into()),
        )
        .init();

    // Config
    let api_url =
        std::env::var("COMMONS_API_URL").unwrap_or_else(|_| "http://localhost:5000/api".into());
    let push_url = std::env::var("COMMONS_PUSH_URL")
        .unwrap_or_else(|_| "ws://localhost:5000/hubs/community".into());
    let token = std::env::var("COMMONS_TOKEN").context("COMMONS_TOKEN is not set")?;
    let user_id: i64 = std::env::var("COMMONS_USER_ID")
        .context("COMMONS_USER_ID is not set")?
        .parse()?;
    let username = std::env::var("COMMONS_USERNAME").unwrap_or_else(|_| format!("user{}", user_id));
    let channel_id: i64 = std::env::var("COMMONS_CHANNEL_ID")
        .unwrap_or_else(|_| "1".into())
        .parse()?;

    let me = CurrentUser {
        id: user_id,
        username,
        nickname: None,
    };

    // Transports
    let rest = HttpApi::new(&api_url, token.clone(), user_id)?;
    let (push, events) = WsPushChannel::connect(&push_url, &token).await?;
    info!("Connected to {}", push_url);

    let session = Arc::new(Session::new(
        me,
        Arc::new(push),
        Arc::new(rest),
        SyncConfig::from_env(),
    ));

    let thread = ThreadId::Channel(channel_id);
    session.enter_thread(thread).await?;
    print_thread(&session, thread);

    // Echo store changes for the open thread
    let mut updates = session.store().subscribe();
    let printer = session.clone();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            if update == StoreUpdate::Thread(thread) {
                print_thread(&printer, thread);
            }
        }
    });

    let pump = session.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tokio::select! {
        _ = pump.pump(events) => warn!("Push channel closed"),
        _ = async {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Err(e) = run_command(&session, thread, line.trim()).await {
                    warn!("{}", e);
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    session.leave_thread(thread).await?;
    session.shutdown();
    Ok(())
}

/// `/react <id> <emoji>`, `/edit <id> <text>`, `/delete <id>`, `/retry <id>`.
/// Anything else is sent as a message.
async fn run_command(session: &Session, thread: ThreadId, line: &str) -> anyhow::Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    let outbox = session.outbox();
    let Some(rest) = line.strip_prefix('/') else {
        outbox.send_message(Draft::text(thread, line)).await?;
        return Ok(());
    };

    let mut parts = rest.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let id = parts
        .next()
        .context("missing message id")?
        .parse::<i64>()
        .map(MessageId)
        .context("bad message id")?;
    let arg = parts.next().unwrap_or_default();

    match command {
        "react" => outbox.toggle_reaction(Subject::Message(id), arg).await?,
        "edit" => outbox.edit_message(id, arg).await?,
        "delete" => outbox.delete_message(id).await?,
        "retry" => outbox.retry_send(id).await?,
        other => anyhow::bail!("unknown command /{}", other),
    }
    Ok(())
}

fn print_thread(session: &Session, thread: ThreadId) {
    let Ok(messages) = session.store().messages(thread) else {
        return;
    };
    println!("---- {} ----", thread);
    for m in messages.iter().rev().take(20).rev() {
        let reactions: Vec<String> = session
            .store()
            .reaction_groups(Subject::Message(m.id))
            .unwrap_or_default()
            .into_iter()
            .map(|g| format!("{}x{}", g.emoji, g.count))
            .collect();
        println!(
            "[{}] {:?} {}: {} {}",
            m.id,
            m.state,
            m.user
                .as_ref()
                .map(|u| u.username.clone())
                .unwrap_or_else(|| m.user_id.to_string()),
            m.content,
            reactions.join(" ")
        );
    }
}
