use crate::common::ClientCommand;
use crate::common::types::format_local_time;
use crate::ui::state::{AppState, Dialog};
use eframe::egui;

const PREVIEW_CHARS: usize = 30;

pub fn render(ui: &mut egui::Ui, state: &mut AppState) -> Option<ClientCommand> {
    let mut command = None;

    ui.horizontal(|ui| {
        ui.heading("Chats");
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if ui.button("+").on_hover_text("Create or join a chat").clicked() {
                state.open_dialog(Dialog::CreateOrJoin);
            }
        });
    });
    ui.separator();

    let footer_height = 90.0;
    egui::ScrollArea::vertical()
        .max_height(ui.available_height() - footer_height)
        .auto_shrink([false, false])
        .show(ui, |ui| {
            if state.chats.is_empty() {
                ui.label(egui::RichText::new("No chats yet").weak());
            }

            for chat in &state.chats {
                let selected = state.active_chat.as_deref() == Some(chat.id.as_str());
                ui.vertical(|ui| {
                    ui.horizontal(|ui| {
                        let title = egui::RichText::new(&chat.name).strong();
                        if ui.selectable_label(selected, title).clicked() && !selected {
                            command = Some(ClientCommand::SelectChat(chat.id.clone()));
                        }
                        if let Some(time) = chat.last_message_time {
                            ui.label(egui::RichText::new(format_local_time(time)).small().weak());
                        }
                    });
                    // Hiển thị preview tin nhắn cuối
                    if let Some(preview) = &chat.last_message {
                        ui.label(egui::RichText::new(truncate(preview)).small().weak());
                    }
                });
                ui.add_space(4.0);
            }
        });

    ui.separator();
    if let Some(footer_command) = render_profile(ui, state) {
        command = Some(footer_command);
    }
    command
}

fn render_profile(ui: &mut egui::Ui, state: &mut AppState) -> Option<ClientCommand> {
    let mut command = None;
    let Some(session) = &state.session else {
        return None;
    };
    let name = session.display_name.clone();
    let email = session.email.clone();

    ui.horizontal(|ui| {
        // Hiển thị trạng thái online với màu xanh
        ui.colored_label(egui::Color32::GREEN, "●");
        ui.label(egui::RichText::new(name).strong());
        ui.label(egui::RichText::new(format!("{} online", state.online_count)).weak());
    });
    if !email.is_empty() {
        ui.label(egui::RichText::new(email).small().weak());
    }

    ui.horizontal(|ui| {
        if ui.button("Profile").clicked() {
            state.photo_path.clear();
            state.open_dialog(Dialog::EditProfile);
        }
        let theme = if state.dark_mode { "☀ Light" } else { "🌙 Dark" };
        if ui.button(theme).clicked() {
            state.dark_mode = !state.dark_mode;
            command = Some(ClientCommand::SetDarkMode(state.dark_mode));
        }
        if ui.button("Sign out").clicked() {
            command = Some(ClientCommand::SignOut);
        }
    });
    command
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut short: String = text.chars().take(PREVIEW_CHARS).collect();
    short.push('…');
    short
}
