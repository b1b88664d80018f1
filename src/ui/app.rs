use eframe::egui;
use tokio::sync::mpsc;

use crate::common::{ClientCommand, ClientEvent};

use super::components::{chat_area, dialogs, input_bar, sidebar, sign_in};
use super::state::AppState;

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<ClientCommand>,
    event_receiver: mpsc::Receiver<ClientEvent>,
    invite_base_url: String,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        command_sender: mpsc::Sender<ClientCommand>,
        event_receiver: mpsc::Receiver<ClientEvent>,
        invite_base_url: String,
    ) -> Self {
        Self {
            state: AppState::new(),
            command_sender,
            event_receiver,
            invite_base_url,
        }
    }

    fn handle_client_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            if let ClientEvent::SignInFailed(message) = &event {
                log::warn!("Sign-in failed: {message}");
            }
            self.state.apply(event);
        }
    }

    fn send(&mut self, command: Option<ClientCommand>) {
        let Some(command) = command else {
            return;
        };
        if let Err(err) = self.command_sender.try_send(command) {
            log::warn!("Failed to send command to client: {err}");
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_client_events();

        ctx.set_visuals(if self.state.dark_mode {
            egui::Visuals::dark()
        } else {
            egui::Visuals::light()
        });

        if self.state.loading {
            egui::CentralPanel::default().show(ctx, sign_in::render_loading);
            ctx.request_repaint();
            return;
        }

        if self.state.session.is_none() {
            let command = egui::CentralPanel::default()
                .show(ctx, |ui| sign_in::render(ui, &mut self.state))
                .inner;
            self.send(command);
            ctx.request_repaint();
            return;
        }

        let command = egui::SidePanel::left("chat_sidebar")
            .default_width(240.0)
            .show(ctx, |ui| sidebar::render(ui, &mut self.state))
            .inner;
        self.send(command);

        if let Some(status) = self.state.status.clone() {
            egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new(status).weak());
                    if ui.small_button("✕").clicked() {
                        self.state.status = None;
                    }
                });
            });
        }

        let invite_base_url = self.invite_base_url.clone();
        let commands = egui::CentralPanel::default()
            .show(ctx, |ui| {
                let header = chat_area::render_header(ui, &mut self.state, &invite_base_url);
                ui.separator();
                let delete = chat_area::render_messages(ui, &self.state);

                ui.separator();
                let text = if self.state.active_chat.is_some() {
                    input_bar::render(ui, &mut self.state.input_text)
                } else {
                    None
                };
                [header, delete, text.map(|text| ClientCommand::SendMessage { text })]
            })
            .inner;
        for command in commands {
            self.send(command);
        }

        let command = dialogs::render(ctx, &mut self.state);
        self.send(command);

        ctx.request_repaint();
    }
}
