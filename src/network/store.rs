//! Ports for the hosted backend: the realtime JSON store, the auth
//! provider and object storage, plus the tree helpers both adapters share.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::Credentials;

/// Errors raised by backend adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// The backend refused the credentials, as opposed to being unreachable.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BackendError::NotSignedIn | BackendError::Status { status: 400 | 401 | 403, .. }
        )
    }
}

/// Range query applied to the children of a location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub order_by_child: Option<String>,
    pub limit_to_last: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ordered_by(child: &str) -> Self {
        Self {
            order_by_child: Some(child.to_string()),
            limit_to_last: None,
        }
    }

    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildSnapshot {
    pub key: String,
    pub value: Value,
}

/// Children of a location, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub children: Vec<ChildSnapshot>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// A live query. Dropping it stops the task that feeds it.
pub struct Subscription {
    receiver: mpsc::Receiver<Snapshot>,
    feeder: JoinHandle<()>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Snapshot>, feeder: JoinHandle<()>) -> Self {
        Self { receiver, feeder }
    }

    /// Next snapshot, or `None` once the feeder has stopped.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}

/// Server-resolved value placeholders.
pub enum ServerValue {
    Timestamp,
}

impl ServerValue {
    pub fn to_value(&self) -> Value {
        match self {
            ServerValue::Timestamp => serde_json::json!({ ".sv": "timestamp" }),
        }
    }
}

/// Hierarchical JSON store with live queries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Open a live query. The first snapshot is delivered immediately.
    async fn subscribe(&self, path: &str, query: Query) -> Result<Subscription, BackendError>;

    /// Single read of a location.
    async fn get(&self, path: &str, query: Query) -> Result<Snapshot, BackendError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), BackendError>;

    /// Multi-field update. Keys may be nested paths relative to `path`.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), BackendError>;

    /// Append under a fresh time-ordered key and return that key.
    async fn push(&self, path: &str, value: Value) -> Result<String, BackendError>;

    async fn remove(&self, path: &str) -> Result<(), BackendError>;

    /// Remove `path` when this client disconnects.
    async fn remove_on_disconnect(&self, path: &str) -> Result<(), BackendError>;

    /// Drop a registration made with `remove_on_disconnect`.
    async fn cancel_on_disconnect(&self, path: &str) -> Result<(), BackendError>;

    /// Drop the connection, firing registered disconnect removals.
    async fn go_offline(&self);
}

/// Fields the auth provider knows about a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthUser, BackendError>;

    /// Resume a persisted sign-in.
    async fn restore(&self, refresh_token: &str) -> Result<AuthUser, BackendError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `bytes` under `key` and return a download URL.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;
}

pub fn content_type_for(path: &std::path::Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

pub fn join_path(base: &str, child: &str) -> String {
    let mut segments = path_segments(base);
    segments.extend(path_segments(child));
    segments.join("/")
}

pub fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path_segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.get(segment))
}

/// Write `value` at `path`, creating parents. A `null` value deletes the
/// location and prunes parents left empty.
pub fn write_at(root: &mut Value, path: &str, value: Value) {
    let segments = path_segments(path);
    write_segments(root, &segments, value);
}

fn write_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Some(map) = node.as_object_mut() {
            if rest.is_empty() {
                map.remove(*first);
            } else if let Some(child) = map.get_mut(*first) {
                write_segments(child, rest, value);
                if is_empty_node(child) {
                    map.remove(*first);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Some(map) = node.as_object_mut() {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        write_segments(child, rest, value);
    }
}

fn is_empty_node(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Replace `{".sv": "timestamp"}` placeholders with `now_ms`.
pub fn resolve_server_values(value: &mut Value, now_ms: i64) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp") {
                *value = Value::from(now_ms);
                return;
            }
            for child in map.values_mut() {
                resolve_server_values(child, now_ms);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_server_values(item, now_ms);
            }
        }
        _ => {}
    }
}

/// Children of `node` after applying `query`.
pub fn query_children(node: Option<&Value>, query: &Query) -> Snapshot {
    let mut children: Vec<ChildSnapshot> = match node {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| ChildSnapshot {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
        _ => Vec::new(),
    };

    // Keys are already sorted; ordering by a child keeps that as tie-break.
    if let Some(child) = &query.order_by_child {
        children.sort_by(|left, right| {
            compare_child(left.value.get(child), right.value.get(child))
        });
    }

    if let Some(limit) = query.limit_to_last {
        let skip = children.len().saturating_sub(limit);
        children.drain(..skip);
    }

    Snapshot { children }
}

fn compare_child(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(false)) => 1,
            Some(Value::Bool(true)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_refusals_count_as_rejections() {
        assert!(BackendError::NotSignedIn.is_rejection());
        assert!(
            BackendError::Status {
                status: 400,
                message: "INVALID_REFRESH_TOKEN".into(),
            }
            .is_rejection()
        );
        assert!(
            !BackendError::Status {
                status: 503,
                message: "unavailable".into(),
            }
            .is_rejection()
        );
        assert!(!BackendError::Unavailable("network down".into()).is_rejection());
    }

    #[test]
    fn write_creates_parents_and_null_prunes_them() {
        let mut root = Value::Null;
        write_at(&mut root, "chats/c1/members/u1", json!(true));
        assert_eq!(root, json!({ "chats": { "c1": { "members": { "u1": true } } } }));

        write_at(&mut root, "/chats/c1/members/u1/", Value::Null);
        assert_eq!(root, json!({}));
    }

    #[test]
    fn write_at_root_replaces_everything() {
        let mut root = json!({ "a": 1 });
        write_at(&mut root, "", json!({ "b": 2 }));
        assert_eq!(value_at(&root, "b"), Some(&json!(2)));
        assert_eq!(value_at(&root, "a"), None);
    }

    #[test]
    fn resolves_nested_timestamp_placeholders() {
        let mut value = json!({
            "text": "hi",
            "timestamp": ServerValue::Timestamp.to_value(),
            "nested": { "at": { ".sv": "timestamp" } }
        });
        resolve_server_values(&mut value, 1234);
        assert_eq!(value["timestamp"], json!(1234));
        assert_eq!(value["nested"]["at"], json!(1234));
    }

    #[test]
    fn ordered_query_keeps_last_entries() {
        let node = json!({
            "a": { "timestamp": 30 },
            "b": { "timestamp": 10 },
            "c": { "timestamp": 20 },
            "d": { "timestamp": 40 }
        });
        let snapshot = query_children(Some(&node), &Query::ordered_by("timestamp").limit_to_last(3));
        let keys: Vec<_> = snapshot.children.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, ["c", "a", "d"]);
    }

    #[test]
    fn missing_location_yields_empty_snapshot() {
        assert!(query_children(None, &Query::all()).is_empty());
        assert!(query_children(Some(&json!(true)), &Query::all()).is_empty());
    }

    #[test]
    fn content_type_follows_extension() {
        use std::path::Path;
        assert_eq!(content_type_for(Path::new("me.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("icon.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }
}
