mod common;
mod config;
mod network;
mod storage;
mod ui;

use std::path::Path;

use clap::Parser;
use dotenvy::dotenv;
use network::memory::InMemoryBackend;
use network::{Backend, ChatClient};
use storage::ClientDatabase;
use tokio::sync::mpsc;
use ui::ChatApp;

use crate::common::invite::parse_invite;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "piper_chat",
    version,
    about = "Realtime group chat client"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Invite link or bare invite code to join after sign-in
    #[arg(long, value_name = "LINK")]
    invite: Option<String>,
    /// Use the in-process backend instead of Firebase
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<(), eframe::Error> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config).with_env_overrides(|name| std::env::var(name).ok());

    let pending_invite = cli.invite.as_deref().and_then(|input| {
        let code = parse_invite(input);
        if code.is_none() {
            log::warn!("Ignoring malformed invite `{input}`");
        }
        code
    });

    let backend = select_backend(&app_config, cli.offline);
    let database = open_database(&app_config);

    // 1. Tạo các kênh giao tiếp (Channels)
    // UI -> Client
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Client -> UI
    let (event_tx, event_rx) = mpsc::channel(100);

    // 2. Khởi chạy client (Chạy ngầm)
    let client = ChatClient::new(
        event_tx,
        cmd_rx,
        backend,
        database,
        app_config.default_chat_icon.clone(),
        pending_invite,
    );
    let client_task = tokio::spawn(client.run());

    // 3. Khởi chạy UI (Chạy trên Main Thread)
    let options = eframe::NativeOptions::default();
    let mut event_rx = Some(event_rx);
    let invite_base_url = app_config.invite_base_url.clone();

    let result = eframe::run_native(
        "Piper Chat",
        options,
        Box::new(move |cc| {
            let event_receiver = event_rx
                .take()
                .expect("ChatApp should only be initialized once");

            Ok(Box::new(ChatApp::new(
                cc,
                cmd_tx.clone(),
                event_receiver,
                invite_base_url.clone(),
            )))
        }),
    );

    // The UI owned the last command sender; the client now goes offline.
    if let Err(err) = client_task.await {
        log::error!("Chat client terminated: {err}");
    }
    result
}

fn select_backend(app_config: &AppConfig, offline: bool) -> Backend {
    if offline {
        log::info!("Running against the in-process backend");
        return Backend::in_memory(InMemoryBackend::new());
    }

    match app_config.usable_firebase() {
        Some(firebase) => {
            log::info!("Connecting to Firebase at {}", firebase.database_url);
            Backend::firebase(firebase.clone())
        }
        None => {
            log::warn!("No Firebase project configured; falling back to the in-process backend");
            Backend::in_memory(InMemoryBackend::new())
        }
    }
}

/// Local database for the persisted session and preferences. Runs without
/// one if it cannot be opened.
fn open_database(app_config: &AppConfig) -> Option<ClientDatabase> {
    if let Err(err) = storage::ensure_data_dir(Path::new(&app_config.data_dir)) {
        log::warn!("Failed to create data dir {}: {err}", app_config.data_dir);
        return None;
    }

    let path = app_config.database_path();
    match ClientDatabase::with_path(&path) {
        Ok(database) => Some(database),
        Err(err) => {
            log::warn!("Failed to open {}: {err}", path.display());
            None
        }
    }
}
