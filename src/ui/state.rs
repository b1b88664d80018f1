use crate::common::{Chat, ChatMessage, ClientEvent, Session};

/// Dialog đang mở (nếu có).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    CreateOrJoin,
    EditChat { chat_id: String },
    EditProfile,
}

/// Trạng thái cục bộ của UI.
pub struct AppState {
    pub session: Option<Session>,
    /// True until the client reports whether a stored session was restored.
    pub loading: bool,
    pub sign_in_error: Option<String>,
    pub chats: Vec<Chat>,
    pub active_chat: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub online_count: usize,
    pub dark_mode: bool,
    pub dialog: Option<Dialog>,
    pub status: Option<String>,

    pub email_input: String,
    pub password_input: String,
    pub input_text: String,
    pub new_chat_name: String,
    pub invite_input: String,
    pub edit_chat_name: String,
    pub icon_path: String,
    pub photo_path: String,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            session: None,
            loading: true,
            sign_in_error: None,
            chats: Vec::new(),
            active_chat: None,
            messages: Vec::new(),
            online_count: 0,
            dark_mode: true,
            dialog: None,
            status: None,
            email_input: String::new(),
            password_input: String::new(),
            input_text: String::new(),
            new_chat_name: String::new(),
            invite_input: String::new(),
            edit_chat_name: String::new(),
            icon_path: String::new(),
            photo_path: String::new(),
        }
    }

    pub fn apply(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::PreferencesLoaded { dark_mode } => self.dark_mode = dark_mode,
            ClientEvent::SignedIn(session) => {
                self.loading = false;
                self.sign_in_error = None;
                self.password_input.clear();
                self.session = Some(session);
            }
            ClientEvent::SignInFailed(message) => {
                self.loading = false;
                self.sign_in_error = Some(message);
            }
            ClientEvent::SignedOut => self.reset_session(),
            ClientEvent::ProfileUpdated(session) => self.session = Some(session),
            ClientEvent::ChatsUpdated(chats) => self.chats = chats,
            ClientEvent::ActiveChatChanged(chat_id) => {
                if self.active_chat != chat_id {
                    self.messages.clear();
                }
                self.active_chat = chat_id;
            }
            ClientEvent::MessagesUpdated { chat_id, messages } => {
                // Snapshots of a room we already left are stale.
                if self.active_chat.as_deref() == Some(chat_id.as_str()) {
                    self.messages = messages;
                }
            }
            ClientEvent::OnlineCountChanged(count) => self.online_count = count,
            ClientEvent::ChatCreated(_) => {
                self.new_chat_name.clear();
                self.dialog = None;
                self.status = Some("Chat created".to_string());
            }
            ClientEvent::ChatRenamed(_) => {
                self.dialog = None;
                self.status = Some("Chat renamed".to_string());
            }
        }
    }

    fn reset_session(&mut self) {
        self.loading = false;
        self.session = None;
        self.chats.clear();
        self.active_chat = None;
        self.messages.clear();
        self.online_count = 0;
        self.dialog = None;
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        let active = self.active_chat.as_deref()?;
        self.chats.iter().find(|chat| chat.id == active)
    }

    /// Whether the signed-in user created the chat.
    pub fn owns(&self, chat: &Chat) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| chat.is_creator(&session.uid))
    }

    pub fn open_dialog(&mut self, dialog: Dialog) {
        if let Dialog::EditChat { chat_id } = &dialog {
            self.edit_chat_name = self
                .chats
                .iter()
                .find(|chat| &chat.id == chat_id)
                .map(|chat| chat.name.clone())
                .unwrap_or_default();
            self.icon_path.clear();
        }
        self.dialog = Some(dialog);
    }
}
