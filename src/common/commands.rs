use std::path::PathBuf;

/// Thông tin đăng nhập gửi cho auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    EmailPassword { email: String, password: String },
    Anonymous,
}

/// Lệnh UI gửi xuống tầng client.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    SignIn(Credentials),
    SignOut,
    SelectChat(String),
    CreateChat {
        name: String,
    },
    /// Join every chat whose invite code matches.
    JoinChat {
        invite_code: String,
    },
    /// Gửi tin nhắn vào chat đang mở.
    SendMessage {
        text: String,
    },
    DeleteMessage {
        message_id: String,
    },
    DeleteChat {
        chat_id: String,
    },
    RenameChat {
        chat_id: String,
        name: String,
    },
    /// Upload an image file and use it as the chat icon.
    UpdateChatIcon {
        chat_id: String,
        path: PathBuf,
    },
    UpdateProfilePhoto {
        path: PathBuf,
    },
    SetDarkMode(bool),
}

impl ClientCommand {
    /// Short label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::SignIn(_) => "sign in",
            ClientCommand::SignOut => "sign out",
            ClientCommand::SelectChat(_) => "select chat",
            ClientCommand::CreateChat { .. } => "create chat",
            ClientCommand::JoinChat { .. } => "join chat",
            ClientCommand::SendMessage { .. } => "send message",
            ClientCommand::DeleteMessage { .. } => "delete message",
            ClientCommand::DeleteChat { .. } => "delete chat",
            ClientCommand::RenameChat { .. } => "rename chat",
            ClientCommand::UpdateChatIcon { .. } => "update chat icon",
            ClientCommand::UpdateProfilePhoto { .. } => "update profile photo",
            ClientCommand::SetDarkMode(_) => "set dark mode",
        }
    }
}
