//! Process-local backend. Backs `--offline` mode and the client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::common::Credentials;

use super::store::{
    AuthProvider, AuthUser, BackendError, ObjectStorage, ProfileUpdate, Query, RealtimeStore,
    Snapshot, Subscription, join_path, query_children, resolve_server_values, value_at, write_at,
};

const REFRESH_PREFIX: &str = "memory-refresh:";

#[derive(Default)]
struct MemoryAccounts {
    users: HashMap<String, AuthUser>,
    current: Option<String>,
}

/// Store, auth and object storage sharing one in-process state. Clones
/// share the same state.
#[derive(Clone)]
pub struct InMemoryBackend {
    tree: Arc<watch::Sender<Value>>,
    disconnect_paths: Arc<Mutex<Vec<String>>>,
    accounts: Arc<Mutex<MemoryAccounts>>,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (tree, _) = watch::channel(Value::Null);
        Self {
            tree: Arc::new(tree),
            disconnect_paths: Arc::new(Mutex::new(Vec::new())),
            accounts: Arc::new(Mutex::new(MemoryAccounts::default())),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current value stored at `path`.
    pub fn value(&self, path: &str) -> Value {
        let tree = self.tree.borrow();
        value_at(&tree, path).cloned().unwrap_or(Value::Null)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn account(&self, uid: &str) -> Option<AuthUser> {
        lock(&self.accounts).users.get(uid).cloned()
    }

    fn write(&self, path: &str, mut value: Value) {
        resolve_server_values(&mut value, Utc::now().timestamp_millis());
        self.tree.send_modify(|tree| write_at(tree, path, value));
    }

    fn remember(&self, user: AuthUser) -> AuthUser {
        let mut accounts = lock(&self.accounts);
        let user = accounts.users.entry(user.uid.clone()).or_insert(user).clone();
        accounts.current = Some(user.uid.clone());
        user
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RealtimeStore for InMemoryBackend {
    async fn subscribe(&self, path: &str, query: Query) -> Result<Subscription, BackendError> {
        let mut tree = self.tree.subscribe();
        let path = path.to_string();
        let (sender, receiver) = mpsc::channel(16);

        let feeder = tokio::spawn(async move {
            let mut last: Option<Snapshot> = None;
            loop {
                let snapshot = {
                    let root = tree.borrow_and_update();
                    query_children(value_at(&root, &path), &query)
                };
                if last.as_ref() != Some(&snapshot) {
                    if sender.send(snapshot.clone()).await.is_err() {
                        break;
                    }
                    last = Some(snapshot);
                }
                if tree.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(receiver, feeder))
    }

    async fn get(&self, path: &str, query: Query) -> Result<Snapshot, BackendError> {
        let root = self.tree.borrow();
        Ok(query_children(value_at(&root, path), &query))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), BackendError> {
        self.write(path, value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), BackendError> {
        let now = Utc::now().timestamp_millis();
        self.tree.send_modify(|tree| {
            for (key, mut value) in fields {
                resolve_server_values(&mut value, now);
                write_at(tree, &join_path(path, &key), value);
            }
        });
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, BackendError> {
        let key = Uuid::now_v7().simple().to_string();
        self.write(&join_path(path, &key), value);
        Ok(key)
    }

    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        self.write(path, Value::Null);
        Ok(())
    }

    async fn remove_on_disconnect(&self, path: &str) -> Result<(), BackendError> {
        let mut paths = lock(&self.disconnect_paths);
        if !paths.iter().any(|registered| registered == path) {
            paths.push(path.to_string());
        }
        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &str) -> Result<(), BackendError> {
        lock(&self.disconnect_paths).retain(|registered| registered != path);
        Ok(())
    }

    async fn go_offline(&self) {
        let paths = std::mem::take(&mut *lock(&self.disconnect_paths));
        for path in paths {
            log::debug!("Disconnect removal of {path}");
            self.write(&path, Value::Null);
        }
    }
}

#[async_trait]
impl AuthProvider for InMemoryBackend {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthUser, BackendError> {
        let user = match credentials {
            Credentials::EmailPassword { email, .. } => {
                let email = email.trim().to_ascii_lowercase();
                if email.is_empty() {
                    return Err(BackendError::Status {
                        status: 400,
                        message: "INVALID_EMAIL".to_string(),
                    });
                }
                let uid = Uuid::new_v5(&Uuid::NAMESPACE_OID, email.as_bytes())
                    .simple()
                    .to_string();
                AuthUser {
                    refresh_token: Some(format!("{REFRESH_PREFIX}{uid}")),
                    uid,
                    email: Some(email),
                    display_name: None,
                    photo_url: None,
                }
            }
            Credentials::Anonymous => {
                let uid = Uuid::new_v4().simple().to_string();
                AuthUser {
                    refresh_token: Some(format!("{REFRESH_PREFIX}{uid}")),
                    uid,
                    ..AuthUser::default()
                }
            }
        };

        Ok(self.remember(user))
    }

    async fn restore(&self, refresh_token: &str) -> Result<AuthUser, BackendError> {
        let uid = refresh_token
            .strip_prefix(REFRESH_PREFIX)
            .ok_or(BackendError::NotSignedIn)?;
        let mut accounts = lock(&self.accounts);
        let user = accounts
            .users
            .get(uid)
            .cloned()
            .ok_or(BackendError::NotSignedIn)?;
        accounts.current = Some(user.uid.clone());
        Ok(user)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), BackendError> {
        let mut accounts = lock(&self.accounts);
        let uid = accounts.current.clone().ok_or(BackendError::NotSignedIn)?;
        let user = accounts
            .users
            .get_mut(&uid)
            .ok_or(BackendError::NotSignedIn)?;
        if let Some(name) = &update.display_name {
            user.display_name = Some(name.clone());
        }
        if let Some(url) = &update.photo_url {
            user.photo_url = Some(url.clone());
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        lock(&self.accounts).current = None;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for InMemoryBackend {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, BackendError> {
        lock(&self.objects).insert(key.to_string(), bytes);
        Ok(format!("memory://{key}?v={}", Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::store::ServerValue;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn subscription_sees_initial_and_later_values() {
        let backend = InMemoryBackend::new();
        backend.set("online/u1", json!(true)).await.unwrap();

        let mut sub = backend.subscribe("online", Query::all()).await.unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.len(), 1);

        backend.set("online/u2", json!(true)).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn push_keys_sort_in_insertion_order() {
        let backend = InMemoryBackend::new();
        let first = backend.push("messages/c1", json!({ "text": "a" })).await.unwrap();
        let second = backend.push("messages/c1", json!({ "text": "b" })).await.unwrap();
        assert!(first < second);

        let snapshot = backend.get("messages/c1", Query::all()).await.unwrap();
        let keys: Vec<_> = snapshot.children.iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, [first, second]);
    }

    #[tokio::test]
    async fn go_offline_fires_disconnect_removals_once() {
        let backend = InMemoryBackend::new();
        backend.set("online/u1", json!(true)).await.unwrap();
        backend.remove_on_disconnect("online/u1").await.unwrap();

        backend.go_offline().await;
        assert_eq!(backend.value("online/u1"), Value::Null);

        backend.set("online/u1", json!(true)).await.unwrap();
        backend.go_offline().await;
        assert_eq!(backend.value("online/u1"), json!(true));
    }

    #[tokio::test]
    async fn cancelled_disconnect_removal_does_not_fire() {
        let backend = InMemoryBackend::new();
        backend.set("online/u1", json!(true)).await.unwrap();
        backend.remove_on_disconnect("online/u1").await.unwrap();
        backend.remove_on_disconnect("online/u1").await.unwrap();
        backend.cancel_on_disconnect("online/u1").await.unwrap();

        backend.go_offline().await;
        assert_eq!(backend.value("online/u1"), json!(true));
    }

    #[tokio::test]
    async fn email_sign_in_is_stable_and_restorable() {
        let backend = InMemoryBackend::new();
        let credentials = Credentials::EmailPassword {
            email: "Ana@Example.com".into(),
            password: "pw".into(),
        };
        let first = backend.sign_in(&credentials).await.unwrap();
        let again = backend.sign_in(&credentials).await.unwrap();
        assert_eq!(first.uid, again.uid);

        backend.sign_out().await.unwrap();
        let restored = backend
            .restore(first.refresh_token.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(restored.uid, first.uid);
        assert!(backend.restore("bogus").await.is_err());
    }

    #[tokio::test]
    async fn update_writes_nested_paths_with_server_time() {
        let backend = InMemoryBackend::new();
        let mut fields = Map::new();
        fields.insert("members/u2".into(), json!(true));
        fields.insert("lastMessageTime".into(), ServerValue::Timestamp.to_value());
        backend.update("chats/c1", fields).await.unwrap();

        assert_eq!(backend.value("chats/c1/members/u2"), json!(true));
        assert!(backend.value("chats/c1/lastMessageTime").as_i64().unwrap() > 0);
    }
}
