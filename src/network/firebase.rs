//! Firebase over its public REST surface: Realtime Database (with
//! `text/event-stream` live queries), Identity Toolkit auth and Storage.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::common::Credentials;
use crate::config::FirebaseConfig;

use super::sse::SseParser;
use super::store::{
    AuthProvider, AuthUser, BackendError, ObjectStorage, ProfileUpdate, Query, RealtimeStore,
    Snapshot, Subscription, join_path, path_segments, query_children, write_at,
};

const IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
const STORAGE_URL: &str = "https://firebasestorage.googleapis.com/v0/b";
/// Refresh this long before the ID token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct IdToken {
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    name: String,
    download_tokens: Option<String>,
}

/// `put`/`patch` payload of a database event stream.
#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Text(String),
    Object { message: String },
}

/// One Firebase project. Auth, database and storage share the signed-in
/// user's token.
#[derive(Clone)]
pub struct FirebaseBackend {
    http: Client,
    config: FirebaseConfig,
    token: Arc<Mutex<Option<IdToken>>>,
    disconnect_paths: Arc<Mutex<Vec<String>>>,
}

impl FirebaseBackend {
    pub fn new(config: FirebaseConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            token: Arc::new(Mutex::new(None)),
            disconnect_paths: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn database_url(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.config.database_url.trim_end_matches('/'),
            path_segments(path).join("/")
        )
    }

    fn identity_url(&self, method: &str) -> String {
        format!("{IDENTITY_URL}/accounts:{method}?key={}", self.config.api_key)
    }

    fn store_token(&self, id_token: String, refresh_token: String, expires_in: &str) {
        let seconds = expires_in.parse::<i64>().unwrap_or(3600);
        *lock(&self.token) = Some(IdToken {
            id_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(seconds),
        });
    }

    /// Current ID token, refreshed first when close to expiry.
    async fn id_token(&self) -> Result<Option<String>, BackendError> {
        let current = lock(&self.token).clone();
        let Some(token) = current else {
            return Ok(None);
        };
        if token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > Utc::now() {
            return Ok(Some(token.id_token));
        }

        log::debug!("ID token expired; refreshing");
        self.refresh(&token.refresh_token).await?;
        Ok(lock(&self.token).as_ref().map(|token| token.id_token.clone()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(), BackendError> {
        let response = self
            .http
            .post(format!("{SECURE_TOKEN_URL}?key={}", self.config.api_key))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        let refreshed: RefreshResponse = read_json(response).await?;
        self.store_token(
            refreshed.id_token,
            refreshed.refresh_token,
            &refreshed.expires_in,
        );
        Ok(())
    }

    async fn lookup(&self) -> Result<AuthUser, BackendError> {
        let id_token = self.id_token().await?.ok_or(BackendError::NotSignedIn)?;
        let response = self
            .http
            .post(self.identity_url("lookup"))
            .json(&json!({ "idToken": id_token }))
            .send()
            .await?;
        let lookup: LookupResponse = read_json(response).await?;
        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or(BackendError::NotSignedIn)?;

        Ok(AuthUser {
            uid: user.local_id,
            email: user.email,
            display_name: user.display_name,
            photo_url: user.photo_url,
            refresh_token: lock(&self.token)
                .as_ref()
                .map(|token| token.refresh_token.clone()),
        })
    }

    /// Database request with the auth parameter and query applied.
    async fn database_request(
        &self,
        request: RequestBuilder,
        query: &Query,
    ) -> Result<RequestBuilder, BackendError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(token) = self.id_token().await? {
            params.push(("auth", token));
        }
        if let Some(child) = &query.order_by_child {
            params.push(("orderBy", format!("\"{child}\"")));
        }
        if let Some(limit) = query.limit_to_last {
            params.push(("limitToLast", limit.to_string()));
        }
        Ok(request.query(&params))
    }

    async fn send_write(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let request = self.database_request(request, &Query::all()).await?;
        check_status(request.send().await?).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(ErrorEnvelope {
            error: ErrorDetail::Text(message) | ErrorDetail::Object { message },
        }) => message,
        Err(_) => body,
    };
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Apply one stream event to the locally cached tree.
fn apply_stream_event(cache: &mut Value, event: &str, payload: StreamPayload) {
    match event {
        "put" => write_at(cache, &payload.path, payload.data),
        "patch" => {
            if let Value::Object(fields) = payload.data {
                for (key, value) in fields {
                    write_at(cache, &join_path(&payload.path, &key), value);
                }
            }
        }
        _ => {}
    }
}

#[async_trait]
impl RealtimeStore for FirebaseBackend {
    async fn subscribe(&self, path: &str, query: Query) -> Result<Subscription, BackendError> {
        let request = self
            .http
            .get(self.database_url(path))
            .header(ACCEPT, "text/event-stream");
        let request = self.database_request(request, &query).await?;
        let response = check_status(request.send().await?).await?;

        let mut stream = Box::pin(response.bytes_stream());
        let (sender, receiver) = mpsc::channel(16);
        let location = path.to_string();

        let feeder = tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut cache = Value::Null;
            let mut last: Option<Snapshot> = None;

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        log::warn!("Event stream for {location} failed: {err}");
                        return;
                    }
                };

                for event in parser.feed(&chunk) {
                    match event.event.as_str() {
                        "put" | "patch" => {
                            match serde_json::from_str::<StreamPayload>(&event.data) {
                                Ok(payload) => apply_stream_event(&mut cache, &event.event, payload),
                                Err(err) => {
                                    log::warn!("Bad {} payload on {location}: {err}", event.event);
                                    continue;
                                }
                            }
                        }
                        "keep-alive" => continue,
                        "cancel" | "auth_revoked" => {
                            log::warn!("Event stream for {location} closed by server: {}", event.event);
                            return;
                        }
                        other => {
                            log::debug!("Ignoring `{other}` event on {location}");
                            continue;
                        }
                    }

                    let snapshot = query_children(Some(&cache), &query);
                    if last.as_ref() != Some(&snapshot) {
                        if sender.send(snapshot.clone()).await.is_err() {
                            return;
                        }
                        last = Some(snapshot);
                    }
                }
            }
            log::info!("Event stream for {location} ended");
        });

        Ok(Subscription::new(receiver, feeder))
    }

    async fn get(&self, path: &str, query: Query) -> Result<Snapshot, BackendError> {
        let request = self.http.get(self.database_url(path));
        let request = self.database_request(request, &query).await?;
        let value: Value = read_json(request.send().await?).await?;
        Ok(query_children(Some(&value), &query))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), BackendError> {
        self.send_write(self.http.put(self.database_url(path)).json(&value))
            .await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), BackendError> {
        self.send_write(self.http.patch(self.database_url(path)).json(&fields))
            .await?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, BackendError> {
        let response = self
            .send_write(self.http.post(self.database_url(path)).json(&value))
            .await?;
        let pushed: PushResponse = read_json(response).await?;
        Ok(pushed.name)
    }

    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        self.send_write(self.http.delete(self.database_url(path)))
            .await?;
        Ok(())
    }

    async fn remove_on_disconnect(&self, path: &str) -> Result<(), BackendError> {
        // REST has no server-side disconnect hook; run it when going offline.
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
            if let Err(err) = self.remove(&path).await {
                log::warn!("Failed to clear {path} on disconnect: {err}");
            }
        }
    }
}

#[async_trait]
impl AuthProvider for FirebaseBackend {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthUser, BackendError> {
        let request = match credentials {
            Credentials::EmailPassword { email, password } => self
                .http
                .post(self.identity_url("signInWithPassword"))
                .json(&json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                })),
            Credentials::Anonymous => self
                .http
                .post(self.identity_url("signUp"))
                .json(&json!({ "returnSecureToken": true })),
        };

        let signed_in: SignInResponse = read_json(request.send().await?).await?;
        self.store_token(
            signed_in.id_token,
            signed_in.refresh_token,
            &signed_in.expires_in,
        );
        self.lookup().await
    }

    async fn restore(&self, refresh_token: &str) -> Result<AuthUser, BackendError> {
        self.refresh(refresh_token).await?;
        self.lookup().await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), BackendError> {
        let id_token = self.id_token().await?.ok_or(BackendError::NotSignedIn)?;
        let mut body = Map::new();
        body.insert("idToken".into(), Value::from(id_token));
        body.insert("returnSecureToken".into(), Value::from(false));
        if let Some(name) = &update.display_name {
            body.insert("displayName".into(), Value::from(name.clone()));
        }
        if let Some(url) = &update.photo_url {
            body.insert("photoUrl".into(), Value::from(url.clone()));
        }

        let response = self
            .http
            .post(self.identity_url("update"))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        lock(&self.token).take();
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for FirebaseBackend {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let id_token = self.id_token().await?.ok_or(BackendError::NotSignedIn)?;
        let bucket = &self.config.storage_bucket;

        let response = self
            .http
            .post(format!("{STORAGE_URL}/{bucket}/o"))
            .query(&[("name", key)])
            .header(AUTHORIZATION, format!("Firebase {id_token}"))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = read_json(response).await?;

        download_url(bucket, &uploaded.name, uploaded.download_tokens.as_deref())
    }
}

/// Public download URL for an uploaded object.
fn download_url(bucket: &str, name: &str, token: Option<&str>) -> Result<String, BackendError> {
    let mut url = Url::parse(&format!("{STORAGE_URL}/{bucket}/o/"))
        .map_err(|err| BackendError::Unavailable(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| BackendError::Unavailable(format!("bad storage bucket {bucket}")))?
        .pop_if_empty()
        .push(name);

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("alt", "media");
        // Objects uploaded without a token are only readable under the rules.
        if let Some(token) = token.and_then(|tokens| tokens.split(',').next()) {
            params.append_pair("token", token);
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> FirebaseBackend {
        FirebaseBackend::new(FirebaseConfig {
            api_key: "key".into(),
            database_url: "https://demo-default-rtdb.firebaseio.com/".into(),
            storage_bucket: "demo.appspot.com".into(),
        })
    }

    #[test]
    fn database_urls_are_normalised() {
        let backend = backend();
        assert_eq!(
            backend.database_url("/messages/c1/"),
            "https://demo-default-rtdb.firebaseio.com/messages/c1.json"
        );
        assert_eq!(
            backend.database_url(""),
            "https://demo-default-rtdb.firebaseio.com/.json"
        );
    }

    #[test]
    fn download_url_encodes_object_name() {
        let url = download_url("demo.appspot.com", "chat-icons/c1", Some("tok1,tok2")).unwrap();
        assert_eq!(
            url,
            "https://firebasestorage.googleapis.com/v0/b/demo.appspot.com/o/chat-icons%2Fc1?alt=media&token=tok1"
        );
    }

    #[test]
    fn stream_events_update_cached_tree() {
        let mut cache = Value::Null;
        apply_stream_event(
            &mut cache,
            "put",
            StreamPayload {
                path: "/".into(),
                data: json!({ "m1": { "text": "hi", "timestamp": 1 } }),
            },
        );
        apply_stream_event(
            &mut cache,
            "patch",
            StreamPayload {
                path: "/m1".into(),
                data: json!({ "deleted": true }),
            },
        );
        apply_stream_event(
            &mut cache,
            "put",
            StreamPayload {
                path: "/m2".into(),
                data: json!({ "text": "yo", "timestamp": 2 }),
            },
        );

        assert_eq!(cache["m1"]["deleted"], json!(true));
        assert_eq!(cache["m1"]["text"], json!("hi"));
        assert_eq!(query_children(Some(&cache), &Query::all()).len(), 2);

        apply_stream_event(
            &mut cache,
            "put",
            StreamPayload {
                path: "/m2".into(),
                data: Value::Null,
            },
        );
        assert_eq!(query_children(Some(&cache), &Query::all()).len(), 1);
    }

    #[tokio::test]
    async fn signed_out_backend_has_no_token() {
        let backend = backend();
        assert_eq!(backend.id_token().await.unwrap(), None);
    }
}
