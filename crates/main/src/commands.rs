use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use application::{ChatClient, ChatClientDependencies, SystemClock, ViewState};
use config::{ClientConfig, IdentityRole};
use domain::{ConversationId, MessageEntry, MessageId, StoreId, Viewer, ViewerRole};
use infrastructure::Infrastructure;
use tracing::info;

pub fn build_client(config: &ClientConfig) -> Result<ChatClient> {
    if config.identity.user_id.trim().is_empty() {
        bail!("identity.user_id is not configured (use --user-id or CHAT_IDENTITY__USER_ID)");
    }

    let infra = Infrastructure::from_config(config).context("failed to build network adapters")?;
    let role = match config.identity.role {
        IdentityRole::User => ViewerRole::User,
        IdentityRole::Store => ViewerRole::Store,
    };

    Ok(ChatClient::new(ChatClientDependencies {
        api: infra.api_trait(),
        channel: infra.channel_trait(),
        clock: Arc::new(SystemClock),
        viewer: Viewer::new(config.identity.user_id.clone(), role),
        max_message_length: config.chat.max_message_length,
    }))
}

pub async fn conversations(client: &ChatClient) -> Result<()> {
    let role = client.viewer().role;
    for conversation in client.list_conversations().await? {
        let preview = conversation
            .last_message
            .as_ref()
            .map_or("", |last| last.text.as_str());
        println!(
            "{}\tstore={}\tunread={}\t{}",
            conversation.id,
            conversation.store_id,
            conversation.unread_for(role),
            preview
        );
    }
    Ok(())
}

pub async fn unread(client: &ChatClient) -> Result<()> {
    println!("{}", client.get_unread_count().await?);
    Ok(())
}

pub async fn start(client: &ChatClient, store_id: StoreId) -> Result<()> {
    let conversation = client.get_or_create_conversation(&store_id).await?;
    println!("{}", conversation.id);
    Ok(())
}

pub async fn open(client: &ChatClient, id: ConversationId) -> Result<()> {
    client.open_conversation(&id).await?;
    let view = client.messages().borrow().clone();
    if view.view == ViewState::NotFound {
        bail!("conversation {id} not found");
    }
    for entry in view.timeline.entries() {
        print_entry(entry);
    }
    Ok(())
}

pub async fn send(client: &ChatClient, id: ConversationId, text: &str) -> Result<()> {
    match client.send(&id, text).await {
        Ok(message) => {
            println!("{}\t{}", message.id, message.created_at.to_rfc3339());
            Ok(())
        }
        Err(failure) => {
            let draft = failure.draft.clone();
            Err(anyhow::Error::new(failure).context(format!("message not sent, draft kept: {draft:?}")))
        }
    }
}

pub async fn watch(client: &ChatClient, id: Option<ConversationId>) -> Result<()> {
    client.start().await?;
    if let Some(id) = &id {
        client.open_conversation(id).await?;
    }

    let mut state = client.connection_state();
    let mut messages = client.messages();
    let mut conversations = client.conversations();
    let mut printed: HashSet<MessageId> = HashSet::new();
    let mut badge = None;

    info!(conversation_id = ?id, "watching, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                eprintln!("[connection] {}", *state.borrow_and_update());
            }
            changed = messages.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = messages.borrow_and_update().clone();
                for entry in view.timeline.entries() {
                    if let MessageEntry::Confirmed(message) = entry {
                        if printed.insert(message.id.clone()) {
                            print_entry(entry);
                        }
                    }
                }
            }
            changed = conversations.changed() => {
                if changed.is_err() {
                    break;
                }
                let total = conversations.borrow_and_update().unread_total;
                if badge != Some(total) {
                    badge = Some(total);
                    eprintln!("[unread] {total}");
                }
            }
        }
    }

    client.dispose().await;
    Ok(())
}

fn print_entry(entry: &MessageEntry) {
    let marker = if entry.is_pending() { "…" } else { " " };
    println!(
        "{}{}\t{}\t{}",
        marker,
        entry.created_at().format("%Y-%m-%d %H:%M:%S"),
        entry.sender_id(),
        entry.text()
    );
}
