pub mod commands;
pub mod events;
pub mod invite;
pub mod types;

pub use commands::{ClientCommand, Credentials};
pub use events::ClientEvent;
pub use types::{Author, Chat, ChatMessage, MessageBody, Session, StoredChat, StoredMessage};
