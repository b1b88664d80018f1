use eframe::egui;

use crate::common::{ClientCommand, Credentials};
use crate::ui::state::AppState;

pub fn render(ui: &mut egui::Ui, state: &mut AppState) -> Option<ClientCommand> {
    let mut command = None;

    ui.vertical_centered(|ui| {
        ui.add_space(80.0);
        ui.heading("Piper Chat");
        ui.label("Sign in to start chatting");
        ui.add_space(16.0);

        ui.add(egui::TextEdit::singleline(&mut state.email_input).hint_text("Email"));
        let password = ui.add(
            egui::TextEdit::singleline(&mut state.password_input)
                .hint_text("Password")
                .password(true),
        );
        let submitted = password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));

        ui.add_space(8.0);
        if ui.button("Sign in").clicked() || submitted {
            if state.email_input.trim().is_empty() {
                state.sign_in_error = Some("Email is required".to_string());
            } else {
                command = Some(ClientCommand::SignIn(Credentials::EmailPassword {
                    email: state.email_input.trim().to_string(),
                    password: state.password_input.clone(),
                }));
            }
        }
        if ui.button("Continue as guest").clicked() {
            command = Some(ClientCommand::SignIn(Credentials::Anonymous));
        }

        if let Some(error) = &state.sign_in_error {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::RED, error);
        }
    });

    if command.is_some() {
        state.sign_in_error = None;
    }
    command
}

/// Shown until the client reports whether a stored session was restored.
pub fn render_loading(ui: &mut egui::Ui) {
    ui.centered_and_justified(|ui| {
        ui.spinner();
    });
}
