use std::path::PathBuf;

use eframe::egui;

use crate::common::ClientCommand;
use crate::common::invite::parse_invite;
use crate::ui::state::{AppState, Dialog};

pub fn render(ctx: &egui::Context, state: &mut AppState) -> Option<ClientCommand> {
    let dialog = state.dialog.clone()?;
    let mut open = true;
    let mut command = None;

    let title = match &dialog {
        Dialog::CreateOrJoin => "New chat",
        Dialog::EditChat { .. } => "Chat settings",
        Dialog::EditProfile => "Profile",
    };

    egui::Window::new(title)
        .open(&mut open)
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
        .show(ctx, |ui| {
            command = match &dialog {
                Dialog::CreateOrJoin => create_or_join(ui, state),
                Dialog::EditChat { chat_id } => edit_chat(ui, state, chat_id),
                Dialog::EditProfile => edit_profile(ui, state),
            };
        });

    if !open {
        state.dialog = None;
    }
    command
}

fn create_or_join(ui: &mut egui::Ui, state: &mut AppState) -> Option<ClientCommand> {
    let mut command = None;

    ui.label("Create a new chat");
    ui.horizontal(|ui| {
        ui.add(egui::TextEdit::singleline(&mut state.new_chat_name).hint_text("Chat name"));
        let ready = !state.new_chat_name.trim().is_empty();
        if ui.add_enabled(ready, egui::Button::new("Create")).clicked() {
            command = Some(ClientCommand::CreateChat {
                name: state.new_chat_name.trim().to_string(),
            });
        }
    });

    ui.separator();
    ui.label("Join with an invite code or link");
    ui.horizontal(|ui| {
        ui.add(egui::TextEdit::singleline(&mut state.invite_input).hint_text("Invite code"));
        if ui.button("Join").clicked() {
            match parse_invite(&state.invite_input) {
                Some(invite_code) => {
                    command = Some(ClientCommand::JoinChat { invite_code });
                    state.invite_input.clear();
                    state.dialog = None;
                }
                None => state.status = Some("Not a valid invite".to_string()),
            }
        }
    });
    command
}

fn edit_chat(ui: &mut egui::Ui, state: &mut AppState, chat_id: &str) -> Option<ClientCommand> {
    let mut command = None;

    ui.label("Name");
    ui.horizontal(|ui| {
        ui.text_edit_singleline(&mut state.edit_chat_name);
        let ready = !state.edit_chat_name.trim().is_empty();
        if ui.add_enabled(ready, egui::Button::new("Rename")).clicked() {
            command = Some(ClientCommand::RenameChat {
                chat_id: chat_id.to_string(),
                name: state.edit_chat_name.trim().to_string(),
            });
        }
    });

    ui.separator();
    ui.label("Icon image file");
    ui.horizontal(|ui| {
        ui.add(egui::TextEdit::singleline(&mut state.icon_path).hint_text("/path/to/icon.png"));
        let ready = !state.icon_path.trim().is_empty();
        if ui.add_enabled(ready, egui::Button::new("Upload")).clicked() {
            command = Some(ClientCommand::UpdateChatIcon {
                chat_id: chat_id.to_string(),
                path: PathBuf::from(state.icon_path.trim()),
            });
            state.status = Some("Uploading chat icon...".to_string());
            state.dialog = None;
        }
    });
    command
}

fn edit_profile(ui: &mut egui::Ui, state: &mut AppState) -> Option<ClientCommand> {
    let mut command = None;

    if let Some(session) = &state.session {
        ui.label(egui::RichText::new(&session.display_name).strong());
        ui.hyperlink_to("Current photo", &session.photo_url);
    }
    ui.separator();
    ui.label("New photo file");
    ui.horizontal(|ui| {
        ui.add(egui::TextEdit::singleline(&mut state.photo_path).hint_text("/path/to/photo.jpg"));
        let ready = !state.photo_path.trim().is_empty();
        if ui.add_enabled(ready, egui::Button::new("Upload")).clicked() {
            command = Some(ClientCommand::UpdateProfilePhoto {
                path: PathBuf::from(state.photo_path.trim()),
            });
            state.status = Some("Uploading profile photo...".to_string());
            state.dialog = None;
        }
    });
    command
}
