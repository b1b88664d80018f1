/// Persisted sign-in, used to resume the session on the next launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub uid: String,
    pub refresh_token: String,
    pub updated_at: i64,
}
