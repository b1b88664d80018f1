use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_CHAT_ICON: &str = "https://m.media-amazon.com/images/I/61hOOfrFlBL._UY1000_.jpg";
const DEFAULT_INVITE_BASE_URL: &str = "https://chatflow-a8757.web.app";
const DEFAULT_DATA_DIR: &str = "data";

/// Firebase project coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub database_url: String,
    pub storage_bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub firebase: Option<FirebaseConfig>,
    #[serde(default = "default_chat_icon")]
    pub default_chat_icon: String,
    #[serde(default = "default_invite_base_url")]
    pub invite_base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_chat_icon() -> String {
    DEFAULT_CHAT_ICON.to_string()
}

fn default_invite_base_url() -> String {
    DEFAULT_INVITE_BASE_URL.to_string()
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            firebase: None,
            default_chat_icon: default_chat_icon(),
            invite_base_url: default_invite_base_url(),
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("client.db")
    }

    /// Apply `FIREBASE_*` / `PIPER_DATA_DIR` overrides.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FIREBASE_API_KEY");
        let database_url = lookup("FIREBASE_DATABASE_URL");
        let storage_bucket = lookup("FIREBASE_STORAGE_BUCKET");

        if api_key.is_some() || database_url.is_some() || storage_bucket.is_some() {
            let mut firebase = self.firebase.take().unwrap_or(FirebaseConfig {
                api_key: String::new(),
                database_url: String::new(),
                storage_bucket: String::new(),
            });
            if let Some(api_key) = api_key {
                firebase.api_key = api_key;
            }
            if let Some(database_url) = database_url {
                firebase.database_url = database_url;
            }
            if let Some(storage_bucket) = storage_bucket {
                firebase.storage_bucket = storage_bucket;
            }
            self.firebase = Some(firebase);
        }

        if let Some(data_dir) = lookup("PIPER_DATA_DIR") {
            self.data_dir = data_dir;
        }
        self
    }

    /// Firebase settings, if complete enough to talk to a project.
    pub fn usable_firebase(&self) -> Option<&FirebaseConfig> {
        self.firebase
            .as_ref()
            .filter(|firebase| !firebase.api_key.is_empty() && !firebase.database_url.is_empty())
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_gets_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{ "data_dir": "/tmp/piper" }"#).unwrap();
        assert_eq!(config.data_dir, "/tmp/piper");
        assert_eq!(config.default_chat_icon, DEFAULT_CHAT_ICON);
        assert_eq!(config.firebase, None);
        assert_eq!(config.database_path(), Path::new("/tmp/piper").join("client.db"));
    }

    #[test]
    fn env_overrides_fill_in_firebase() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FIREBASE_API_KEY", "k"),
            ("FIREBASE_DATABASE_URL", "https://demo.firebaseio.com"),
        ]);
        let config = AppConfig::default()
            .with_env_overrides(|name| env.get(name).map(|value| value.to_string()));

        let firebase = config.usable_firebase().unwrap();
        assert_eq!(firebase.api_key, "k");
        assert_eq!(firebase.storage_bucket, "");
    }

    #[test]
    fn incomplete_firebase_is_not_usable() {
        let config = AppConfig {
            firebase: Some(FirebaseConfig {
                api_key: String::new(),
                database_url: "https://demo.firebaseio.com".into(),
                storage_bucket: String::new(),
            }),
            ..AppConfig::default()
        };
        assert!(config.usable_firebase().is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        assert_eq!(load_config("does/not/exist.json"), AppConfig::default());
    }
}
