use super::types::{Chat, ChatMessage, Session};

/// Sự kiện từ tầng client gửi lên UI.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    PreferencesLoaded { dark_mode: bool },
    SignedIn(Session),
    SignInFailed(String),
    SignedOut,
    ProfileUpdated(Session),
    ChatsUpdated(Vec<Chat>),
    ActiveChatChanged(Option<String>),
    /// Full replacement of the active chat's message list.
    MessagesUpdated {
        chat_id: String,
        messages: Vec<ChatMessage>,
    },
    OnlineCountChanged(usize),
    ChatCreated(String),
    ChatRenamed(String),
}
