use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::invite::generate_invite_code;
use crate::common::{
    Chat, ChatMessage, ClientCommand, ClientEvent, Credentials, Session, StoredChat,
    StoredMessage,
};
use crate::storage::ClientDatabase;

use super::Backend;
use super::store::{
    AuthUser, BackendError, ProfileUpdate, Query, RealtimeStore, ServerValue, Snapshot,
    Subscription, content_type_for,
};

/// Most recent messages kept in the live view of a room.
pub const MESSAGE_LIMIT: usize = 100;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Which live query a subscription belongs to.
#[derive(Debug, Clone, Copy)]
enum Feed {
    Chats,
    Messages,
    Presence,
}

enum FeedUpdate {
    Snapshot(Snapshot),
    Ended,
    RetryDue,
}

/// One live query: either open, waiting to be retried, or idle.
struct LiveFeed {
    subscription: Option<Subscription>,
    retry_at: Option<Instant>,
}

impl LiveFeed {
    fn new() -> Self {
        Self {
            subscription: None,
            retry_at: None,
        }
    }

    async fn open(&mut self, store: &dyn RealtimeStore, path: &str, query: Query) {
        self.subscription = None;
        match store.subscribe(path, query).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.retry_at = None;
            }
            Err(err) => {
                log::warn!("Failed to subscribe to {path}: {err}");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.subscription = None;
        self.retry_at = Some(Instant::now() + RESUBSCRIBE_DELAY);
    }

    fn close(&mut self) {
        self.subscription = None;
        self.retry_at = None;
    }

    /// Next thing to act on. Pends forever on an idle feed so the select
    /// loop simply skips it.
    async fn next(&mut self) -> FeedUpdate {
        if let Some(subscription) = &mut self.subscription {
            return match subscription.next().await {
                Some(snapshot) => FeedUpdate::Snapshot(snapshot),
                None => FeedUpdate::Ended,
            };
        }
        match self.retry_at {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.retry_at = None;
                FeedUpdate::RetryDue
            }
            None => std::future::pending().await,
        }
    }
}

/// Giữ state đồng bộ giữa backend và UI: mở/đóng subscription, ghi dữ liệu
/// theo lệnh từ UI.
pub struct ChatClient {
    event_sender: mpsc::Sender<ClientEvent>,
    command_receiver: mpsc::Receiver<ClientCommand>,
    backend: Backend,
    database: Option<ClientDatabase>,
    default_chat_icon: String,
    pending_invite: Option<String>,
    session: Option<Session>,
    chats: Vec<Chat>,
    active_chat: Option<String>,
    chat_feed: LiveFeed,
    message_feed: LiveFeed,
    presence_feed: LiveFeed,
}

impl ChatClient {
    pub fn new(
        event_sender: mpsc::Sender<ClientEvent>,
        command_receiver: mpsc::Receiver<ClientCommand>,
        backend: Backend,
        database: Option<ClientDatabase>,
        default_chat_icon: String,
        pending_invite: Option<String>,
    ) -> Self {
        Self {
            event_sender,
            command_receiver,
            backend,
            database,
            default_chat_icon,
            pending_invite,
            session: None,
            chats: Vec::new(),
            active_chat: None,
            chat_feed: LiveFeed::new(),
            message_feed: LiveFeed::new(),
            presence_feed: LiveFeed::new(),
        }
    }

    /// Run until the UI drops its command sender.
    pub async fn run(mut self) {
        log::info!("Chat client event loop started");
        self.load_preferences().await;
        self.restore_session().await;

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                update = self.chat_feed.next() => {
                    match update {
                        FeedUpdate::Snapshot(snapshot) => self.apply_chats(snapshot).await,
                        FeedUpdate::Ended => self.feed_ended(Feed::Chats),
                        FeedUpdate::RetryDue => self.open_feed(Feed::Chats).await,
                    }
                }
                update = self.message_feed.next() => {
                    match update {
                        FeedUpdate::Snapshot(snapshot) => self.apply_messages(snapshot).await,
                        FeedUpdate::Ended => self.feed_ended(Feed::Messages),
                        FeedUpdate::RetryDue => self.open_feed(Feed::Messages).await,
                    }
                }
                update = self.presence_feed.next() => {
                    match update {
                        FeedUpdate::Snapshot(snapshot) => self.apply_presence(snapshot).await,
                        FeedUpdate::Ended => self.feed_ended(Feed::Presence),
                        FeedUpdate::RetryDue => self.open_feed(Feed::Presence).await,
                    }
                }
            }
        }

        self.close_subscriptions();
        self.backend.store.go_offline().await;
        log::info!("Chat client stopped");
    }

    async fn handle_command(&mut self, command: ClientCommand) {
        let name = command.name();
        let result = match command {
            ClientCommand::SignIn(credentials) => self.sign_in(credentials).await,
            ClientCommand::SignOut => self.sign_out().await,
            ClientCommand::SelectChat(chat_id) => {
                if self.chats.iter().any(|chat| chat.id == chat_id) {
                    self.select_chat(Some(chat_id)).await;
                } else {
                    log::warn!("Ignoring selection of unknown chat {chat_id}");
                }
                Ok(())
            }
            ClientCommand::CreateChat { name } => self.create_chat(name).await,
            ClientCommand::JoinChat { invite_code } => self.join_chat(&invite_code).await,
            ClientCommand::SendMessage { text } => self.send_message(text).await,
            ClientCommand::DeleteMessage { message_id } => self.delete_message(&message_id).await,
            ClientCommand::DeleteChat { chat_id } => self.delete_chat(&chat_id).await,
            ClientCommand::RenameChat { chat_id, name } => self.rename_chat(&chat_id, name).await,
            ClientCommand::UpdateChatIcon { chat_id, path } => {
                self.update_chat_icon(&chat_id, &path).await
            }
            ClientCommand::UpdateProfilePhoto { path } => self.update_profile_photo(&path).await,
            ClientCommand::SetDarkMode(dark_mode) => {
                self.set_dark_mode(dark_mode);
                Ok(())
            }
        };

        // Best effort: failures are logged, never retried.
        if let Err(err) = result {
            log::warn!("Failed to {name}: {err}");
        }
    }

    async fn emit(&mut self, event: ClientEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("Failed to notify UI: {err}");
        }
    }

    // ========== Session ==========

    async fn load_preferences(&mut self) {
        let dark_mode = match &self.database {
            Some(database) => database.dark_mode().unwrap_or_else(|err| {
                log::warn!("Failed to read preferences: {err}");
                true
            }),
            None => true,
        };
        self.emit(ClientEvent::PreferencesLoaded { dark_mode }).await;
    }

    fn set_dark_mode(&self, dark_mode: bool) {
        if let Some(database) = &self.database {
            if let Err(err) = database.set_dark_mode(dark_mode) {
                log::warn!("Failed to persist theme: {err}");
            }
        }
    }

    async fn restore_session(&mut self) {
        let stored = match &self.database {
            Some(database) => database.load_session().unwrap_or_else(|err| {
                log::warn!("Failed to read stored session: {err}");
                None
            }),
            None => None,
        };

        let Some(stored) = stored else {
            self.emit(ClientEvent::SignedOut).await;
            return;
        };

        match self.backend.auth.restore(&stored.refresh_token).await {
            Ok(user) => {
                log::info!("Restored session for {}", user.uid);
                self.start_session(user).await;
            }
            Err(err) if err.is_rejection() => {
                log::warn!("Stored session for {} is no longer valid: {err}", stored.uid);
                self.forget_session();
                self.emit(ClientEvent::SignedOut).await;
            }
            Err(err) => {
                // Keep the token; the next launch may reach the backend.
                log::warn!("Could not restore session for {}: {err}", stored.uid);
                self.emit(ClientEvent::SignedOut).await;
            }
        }
    }

    async fn sign_in(&mut self, credentials: Credentials) -> Result<(), BackendError> {
        if let Some(session) = &self.session {
            log::warn!("Already signed in as {}", session.uid);
            return Ok(());
        }

        match self.backend.auth.sign_in(&credentials).await {
            Ok(user) => {
                self.start_session(user).await;
                Ok(())
            }
            Err(err) => {
                self.emit(ClientEvent::SignInFailed(err.to_string())).await;
                Err(err)
            }
        }
    }

    async fn start_session(&mut self, user: AuthUser) {
        let session = Session::from_profile(
            &user.uid,
            user.email.as_deref(),
            user.display_name.as_deref(),
            user.photo_url.as_deref(),
        );
        log::info!("Signed in as {} ({})", session.display_name, session.uid);

        if let (Some(database), Some(refresh_token)) = (&self.database, &user.refresh_token) {
            if let Err(err) = database.save_session(&session.uid, refresh_token) {
                log::warn!("Failed to persist session: {err}");
            }
        }

        let presence_path = format!("online/{}", session.uid);
        self.session = Some(session.clone());
        self.emit(ClientEvent::SignedIn(session)).await;

        if let Err(err) = self.mark_online(&presence_path).await {
            log::warn!("Failed to set presence: {err}");
        }

        self.open_feed(Feed::Chats).await;
        self.open_feed(Feed::Presence).await;

        if let Some(invite_code) = self.pending_invite.take() {
            log::info!("Joining chat from invite link");
            if let Err(err) = self.join_chat(&invite_code).await {
                log::warn!("Failed to join chat from invite: {err}");
            }
        }
    }

    async fn mark_online(&mut self, presence_path: &str) -> Result<(), BackendError> {
        self.backend.store.set(presence_path, Value::Bool(true)).await?;
        self.backend.store.remove_on_disconnect(presence_path).await
    }

    async fn sign_out(&mut self) -> Result<(), BackendError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        // Presence goes first, while the session may still write.
        let presence_path = format!("online/{}", session.uid);
        if let Err(err) = self.backend.store.remove(&presence_path).await {
            log::warn!("Failed to clear presence: {err}");
        }
        if let Err(err) = self.backend.store.cancel_on_disconnect(&presence_path).await {
            log::warn!("Failed to cancel disconnect removal: {err}");
        }
        let revoked = self.backend.auth.sign_out().await;

        self.close_subscriptions();
        self.chats.clear();
        self.active_chat = None;
        self.forget_session();
        log::info!("Signed out {}", session.uid);
        self.emit(ClientEvent::SignedOut).await;

        revoked
    }

    fn forget_session(&self) {
        if let Some(database) = &self.database {
            if let Err(err) = database.clear_session() {
                log::warn!("Failed to clear stored session: {err}");
            }
        }
    }

    fn close_subscriptions(&mut self) {
        self.chat_feed.close();
        self.message_feed.close();
        self.presence_feed.close();
    }

    fn feed_mut(&mut self, feed: Feed) -> &mut LiveFeed {
        match feed {
            Feed::Chats => &mut self.chat_feed,
            Feed::Messages => &mut self.message_feed,
            Feed::Presence => &mut self.presence_feed,
        }
    }

    /// A stream closed under us (server `cancel`, dropped connection).
    fn feed_ended(&mut self, feed: Feed) {
        log::warn!("{feed:?} subscription ended; retrying in {RESUBSCRIBE_DELAY:?}");
        self.feed_mut(feed).schedule_retry();
    }

    /// (Re)open a live query for the current session. A failed attempt is
    /// retried after `RESUBSCRIBE_DELAY`.
    async fn open_feed(&mut self, feed: Feed) {
        if self.session.is_none() {
            self.feed_mut(feed).close();
            return;
        }

        let store = self.backend.store.as_ref();
        match feed {
            Feed::Chats => self.chat_feed.open(store, "chats", Query::all()).await,
            Feed::Presence => self.presence_feed.open(store, "online", Query::all()).await,
            Feed::Messages => match &self.active_chat {
                Some(chat_id) => {
                    self.message_feed
                        .open(store, &format!("messages/{chat_id}"), messages_query())
                        .await
                }
                None => self.message_feed.close(),
            },
        }
    }

    // ========== Snapshots ==========

    async fn apply_chats(&mut self, snapshot: Snapshot) {
        let Some(uid) = self.session.as_ref().map(|session| session.uid.clone()) else {
            return;
        };

        self.chats = snapshot
            .children
            .into_iter()
            .filter_map(|child| match serde_json::from_value::<StoredChat>(child.value) {
                Ok(stored) => Some(Chat::from_stored(child.key, stored)),
                Err(err) => {
                    log::warn!("Skipping malformed chat {}: {err}", child.key);
                    None
                }
            })
            .filter(|chat| chat.is_member(&uid))
            .collect();
        log::debug!("Chat list updated: {} visible", self.chats.len());
        self.emit(ClientEvent::ChatsUpdated(self.chats.clone())).await;

        let active_missing = self
            .active_chat
            .as_ref()
            .is_some_and(|active| !self.chats.iter().any(|chat| &chat.id == active));
        if self.active_chat.is_none() || active_missing {
            let fallback = self.chats.first().map(|chat| chat.id.clone());
            if fallback != self.active_chat {
                self.select_chat(fallback).await;
            }
        }
    }

    async fn apply_messages(&mut self, snapshot: Snapshot) {
        let Some(chat_id) = self.active_chat.clone() else {
            return;
        };

        let mut messages: Vec<ChatMessage> = snapshot
            .children
            .into_iter()
            .filter_map(|child| match serde_json::from_value::<StoredMessage>(child.value) {
                Ok(stored) => Some(ChatMessage::from_stored(child.key, stored)),
                Err(err) => {
                    log::warn!("Skipping malformed message {}: {err}", child.key);
                    None
                }
            })
            .collect();
        messages.sort_by_key(|message| message.timestamp);
        let overflow = messages.len().saturating_sub(MESSAGE_LIMIT);
        messages.drain(..overflow);

        log::debug!("{} messages in {chat_id}", messages.len());
        self.emit(ClientEvent::MessagesUpdated { chat_id, messages })
            .await;
    }

    async fn apply_presence(&mut self, snapshot: Snapshot) {
        self.emit(ClientEvent::OnlineCountChanged(snapshot.len()))
            .await;
    }

    /// Switch the active room. The previous room's subscription is dropped
    /// before the next one opens.
    async fn select_chat(&mut self, chat_id: Option<String>) {
        self.message_feed.close();
        self.active_chat = chat_id.clone();
        self.emit(ClientEvent::ActiveChatChanged(chat_id)).await;
        self.open_feed(Feed::Messages).await;
    }

    // ========== Writes ==========

    async fn create_chat(&mut self, name: String) -> Result<(), BackendError> {
        let Some(session) = &self.session else {
            return Err(BackendError::NotSignedIn);
        };
        if name.trim().is_empty() {
            log::debug!("Ignoring chat with blank name");
            return Ok(());
        }

        let chat = StoredChat {
            name,
            icon: self.default_chat_icon.clone(),
            created_by: session.uid.clone(),
            members: BTreeMap::from([(session.uid.clone(), true)]),
            invite_code: generate_invite_code(),
            last_message: None,
            last_message_time: None,
        };
        let chat_id = self
            .backend
            .store
            .push("chats", serde_json::to_value(&chat)?)
            .await?;

        log::info!("Created chat {chat_id}");
        self.emit(ClientEvent::ChatCreated(chat_id)).await;
        Ok(())
    }

    /// Single read of all chats; every chat with a matching code gains the
    /// current user as member.
    async fn join_chat(&mut self, invite_code: &str) -> Result<(), BackendError> {
        let Some(session) = &self.session else {
            return Err(BackendError::NotSignedIn);
        };
        let invite_code = invite_code.trim();
        if invite_code.is_empty() {
            return Ok(());
        }

        let chats = self.backend.store.get("chats", Query::all()).await?;
        let matching: Vec<String> = chats
            .children
            .iter()
            .filter(|child| child.value.get("inviteCode").and_then(Value::as_str) == Some(invite_code))
            .map(|child| child.key.clone())
            .collect();

        if matching.is_empty() {
            log::info!("No chat matches invite code {invite_code}");
            return Ok(());
        }

        for chat_id in matching {
            let mut members = Map::new();
            members.insert(session.uid.clone(), Value::Bool(true));
            self.backend
                .store
                .update(&format!("chats/{chat_id}/members"), members)
                .await?;
            log::info!("Joined chat {chat_id}");
        }
        Ok(())
    }

    async fn send_message(&mut self, text: String) -> Result<(), BackendError> {
        let Some(session) = &self.session else {
            return Err(BackendError::NotSignedIn);
        };
        let Some(chat_id) = &self.active_chat else {
            log::debug!("No active chat; dropping message");
            return Ok(());
        };
        if text.trim().is_empty() {
            return Ok(());
        }

        let message = json!({
            "text": text,
            "userId": session.uid,
            "userName": session.display_name,
            "userPhoto": session.photo_url,
            "timestamp": ServerValue::Timestamp.to_value(),
            "deleted": false,
        });
        self.backend
            .store
            .push(&format!("messages/{chat_id}"), message)
            .await?;

        let mut preview = Map::new();
        preview.insert("lastMessage".into(), Value::String(text));
        preview.insert("lastMessageTime".into(), ServerValue::Timestamp.to_value());
        self.backend
            .store
            .update(&format!("chats/{chat_id}"), preview)
            .await
    }

    async fn delete_message(&mut self, message_id: &str) -> Result<(), BackendError> {
        let Some(chat_id) = &self.active_chat else {
            return Ok(());
        };

        let mut fields = Map::new();
        fields.insert("deleted".into(), Value::Bool(true));
        self.backend
            .store
            .update(&format!("messages/{chat_id}/{message_id}"), fields)
            .await
    }

    /// The chat if the current user created it. Only creators may rename,
    /// re-icon or delete.
    fn owned_chat(&self, chat_id: &str) -> Option<&Chat> {
        let session = self.session.as_ref()?;
        let chat = self.chats.iter().find(|chat| chat.id == chat_id);
        match chat {
            Some(chat) if chat.is_creator(&session.uid) => Some(chat),
            Some(_) => {
                log::warn!("{} is not the creator of chat {chat_id}", session.uid);
                None
            }
            None => {
                log::warn!("Unknown chat {chat_id}");
                None
            }
        }
    }

    async fn delete_chat(&mut self, chat_id: &str) -> Result<(), BackendError> {
        if self.owned_chat(chat_id).is_none() {
            return Ok(());
        }

        self.backend.store.remove(&format!("chats/{chat_id}")).await?;
        self.backend
            .store
            .remove(&format!("messages/{chat_id}"))
            .await?;
        log::info!("Deleted chat {chat_id}");

        self.chats.retain(|chat| chat.id != chat_id);
        self.emit(ClientEvent::ChatsUpdated(self.chats.clone())).await;
        if self.active_chat.as_deref() == Some(chat_id) {
            let fallback = self.chats.first().map(|chat| chat.id.clone());
            self.select_chat(fallback).await;
        }
        Ok(())
    }

    async fn rename_chat(&mut self, chat_id: &str, name: String) -> Result<(), BackendError> {
        if name.trim().is_empty() || self.owned_chat(chat_id).is_none() {
            return Ok(());
        }

        let mut fields = Map::new();
        fields.insert("name".into(), Value::String(name));
        self.backend
            .store
            .update(&format!("chats/{chat_id}"), fields)
            .await?;
        self.emit(ClientEvent::ChatRenamed(chat_id.to_string()))
            .await;
        Ok(())
    }

    async fn update_chat_icon(&mut self, chat_id: &str, path: &Path) -> Result<(), BackendError> {
        if self.owned_chat(chat_id).is_none() {
            return Ok(());
        }

        let bytes = tokio::fs::read(path).await?;
        let url = self
            .backend
            .storage
            .upload(&format!("chat-icons/{chat_id}"), bytes, content_type_for(path))
            .await?;

        let mut fields = Map::new();
        fields.insert("icon".into(), Value::String(url));
        self.backend
            .store
            .update(&format!("chats/{chat_id}"), fields)
            .await
    }

    async fn update_profile_photo(&mut self, path: &Path) -> Result<(), BackendError> {
        let Some(uid) = self.session.as_ref().map(|session| session.uid.clone()) else {
            return Err(BackendError::NotSignedIn);
        };

        let bytes = tokio::fs::read(path).await?;
        let url = self
            .backend
            .storage
            .upload(&format!("profile-pics/{uid}"), bytes, content_type_for(path))
            .await?;
        self.backend
            .auth
            .update_profile(&ProfileUpdate {
                display_name: None,
                photo_url: Some(url.clone()),
            })
            .await?;

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.photo_url = url;
        let session = session.clone();
        self.emit(ClientEvent::ProfileUpdated(session)).await;
        Ok(())
    }
}

fn messages_query() -> Query {
    Query::ordered_by("timestamp").limit_to_last(MESSAGE_LIMIT)
}
