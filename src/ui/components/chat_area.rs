use eframe::egui;

use crate::common::invite::invite_link;
use crate::common::types::format_local_time;
use crate::common::{ChatMessage, ClientCommand};
use crate::ui::state::{AppState, Dialog};

/// Header of the open chat: name, invite link and creator-only settings.
pub fn render_header(
    ui: &mut egui::Ui,
    state: &mut AppState,
    invite_base_url: &str,
) -> Option<ClientCommand> {
    let mut command = None;
    let Some(chat) = state.active_chat().cloned() else {
        ui.heading("No chat selected");
        return None;
    };
    let owner = state.owns(&chat);

    ui.horizontal(|ui| {
        ui.heading(&chat.name);
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if owner {
                if ui.button("Delete").clicked() {
                    command = Some(ClientCommand::DeleteChat {
                        chat_id: chat.id.clone(),
                    });
                }
                if ui.button("Settings").clicked() {
                    state.open_dialog(Dialog::EditChat {
                        chat_id: chat.id.clone(),
                    });
                }
            }
            if ui.button("Copy invite link").clicked() {
                ui.ctx().copy_text(invite_link(invite_base_url, &chat.invite_code));
                state.status = Some("Invite link copied".to_string());
            }
        });
    });
    command
}

/// Message list. Returns a delete request for one of the user's own messages.
pub fn render_messages(ui: &mut egui::Ui, state: &AppState) -> Option<ClientCommand> {
    let mut command = None;
    let own_uid = state.session.as_ref().map(|session| session.uid.as_str());

    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .max_height(ui.available_height() - 40.0)
        .show(ui, |ui| {
            for message in &state.messages {
                let own = own_uid == Some(message.author.uid.as_str());
                if let Some(delete) = render_message(ui, message, own) {
                    command = Some(delete);
                }
            }
        });
    command
}

fn render_message(ui: &mut egui::Ui, message: &ChatMessage, own: bool) -> Option<ClientCommand> {
    let mut command = None;

    ui.horizontal(|ui| {
        ui.label(egui::RichText::new(&message.author.name).strong());
        ui.label(egui::RichText::new(format_local_time(message.timestamp)).small().weak());
        if own && !message.is_tombstoned() && ui.small_button("🗑").clicked() {
            command = Some(ClientCommand::DeleteMessage {
                message_id: message.id.clone(),
            });
        }
    });

    let text = egui::RichText::new(message.display_text());
    if message.is_tombstoned() {
        ui.label(text.italics().weak());
    } else {
        ui.label(text);
    }
    ui.add_space(6.0);
    command
}
