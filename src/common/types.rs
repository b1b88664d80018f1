use std::collections::BTreeMap;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

/// Placeholder shown instead of a tombstoned message body.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Người dùng đang đăng nhập, mirror từ auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    pub photo_url: String,
}

impl Session {
    /// Build a session from raw auth fields, filling the gaps the provider
    /// leaves empty.
    pub fn from_profile(
        uid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Self {
        let email = email.unwrap_or_default().to_string();
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                email
                    .split('@')
                    .next()
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "User".to_string());
        let photo_url = photo_url
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_avatar(uid));

        Self {
            uid: uid.to_string(),
            display_name,
            email,
            photo_url,
        }
    }
}

pub fn default_avatar(uid: &str) -> String {
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={uid}")
}

/// Bản ghi chat như lưu trên `chats/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChat {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub members: BTreeMap<String, bool>,
    #[serde(default)]
    pub invite_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<i64>,
}

/// A chat room as the view sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub created_by: String,
    pub members: BTreeMap<String, bool>,
    pub invite_code: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<i64>,
}

impl Chat {
    pub fn from_stored(id: String, stored: StoredChat) -> Self {
        Self {
            id,
            name: stored.name,
            icon: stored.icon,
            created_by: stored.created_by,
            members: stored.members,
            invite_code: stored.invite_code,
            last_message: stored.last_message,
            last_message_time: stored.last_message_time,
        }
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.members.get(uid).copied().unwrap_or(false)
    }

    pub fn is_creator(&self, uid: &str) -> bool {
        self.created_by == uid
    }
}

/// Bản ghi tin nhắn như lưu trên `messages/<chatId>/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_photo: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Present(String),
    Tombstoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub uid: String,
    pub name: String,
    pub photo_url: String,
}

/// Domain model đại diện một tin nhắn chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub body: MessageBody,
    pub author: Author,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn from_stored(id: String, stored: StoredMessage) -> Self {
        // A deleted record never carries its text past this point.
        let body = if stored.deleted {
            MessageBody::Tombstoned
        } else {
            MessageBody::Present(stored.text)
        };

        Self {
            id,
            body,
            author: Author {
                uid: stored.user_id,
                name: stored.user_name,
                photo_url: stored.user_photo,
            },
            timestamp: stored.timestamp,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        matches!(self.body, MessageBody::Tombstoned)
    }

    /// Text to render for this message.
    pub fn display_text(&self) -> &str {
        match &self.body {
            MessageBody::Present(text) => text,
            MessageBody::Tombstoned => DELETED_PLACEHOLDER,
        }
    }
}

/// `HH:MM` for messages from today, `Mon D HH:MM` otherwise.
pub fn format_time<Tz: TimeZone>(timestamp_ms: i64, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if timestamp_ms <= 0 {
        return String::new();
    }
    let Some(time) = now.timezone().timestamp_millis_opt(timestamp_ms).single() else {
        return String::new();
    };

    if time.date_naive() == now.date_naive() {
        time.format("%H:%M").to_string()
    } else {
        time.format("%b %-d %H:%M").to_string()
    }
}

pub fn format_local_time(timestamp_ms: i64) -> String {
    format_time(timestamp_ms, &Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(text: &str, deleted: bool) -> StoredMessage {
        StoredMessage {
            text: text.to_string(),
            user_id: "u1".to_string(),
            user_name: "Ana".to_string(),
            user_photo: String::new(),
            timestamp: 10,
            deleted,
        }
    }

    #[test]
    fn tombstoned_message_never_exposes_body() {
        let message = ChatMessage::from_stored("m1".into(), stored("secret plans", true));
        assert!(message.is_tombstoned());
        assert_eq!(message.display_text(), DELETED_PLACEHOLDER);
        assert_eq!(message.body, MessageBody::Tombstoned);
    }

    #[test]
    fn live_message_shows_its_text() {
        let message = ChatMessage::from_stored("m1".into(), stored("hello", false));
        assert_eq!(message.display_text(), "hello");
    }

    #[test]
    fn session_falls_back_to_email_and_generated_avatar() {
        let session = Session::from_profile("abc", Some("ana@example.com"), None, None);
        assert_eq!(session.display_name, "ana");
        assert_eq!(
            session.photo_url,
            "https://api.dicebear.com/7.x/avataaars/svg?seed=abc"
        );

        let anonymous = Session::from_profile("xyz", None, Some("  "), Some(""));
        assert_eq!(anonymous.display_name, "User");
    }

    #[test]
    fn stored_chat_uses_camel_case_fields() {
        let chat: StoredChat = serde_json::from_value(serde_json::json!({
            "name": "General",
            "createdBy": "u1",
            "members": { "u1": true, "u2": false },
            "inviteCode": "ab12cd34",
            "lastMessageTime": 42
        }))
        .unwrap();

        let chat = Chat::from_stored("c1".into(), chat);
        assert!(chat.is_member("u1"));
        assert!(!chat.is_member("u2"));
        assert!(!chat.is_member("u3"));
        assert!(chat.is_creator("u1"));
        assert_eq!(chat.last_message_time, Some(42));
    }

    #[test]
    fn format_time_depends_on_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 18, 0, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 2, 1, 23, 30, 0).unwrap();

        assert_eq!(format_time(today.timestamp_millis(), &now), "09:07");
        assert_eq!(format_time(earlier.timestamp_millis(), &now), "Feb 1 23:30");
        assert_eq!(format_time(0, &now), "");
    }
}
