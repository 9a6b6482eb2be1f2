use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::models::{Priority, Student, StoredSession, UserProfile};
use crate::error::Error;

fn default_priority() -> Priority {
    Priority::Medium
}

/// A message as the remote endpoints (and the demo provider) report it.
/// Local-only fields (`read_time`, `came_time`, `sent_status`) never travel
/// over the wire; `read` is the server's own view of the read state and
/// doubles as the acknowledgement signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    pub sent_time: String,
    #[serde(default)]
    pub read: bool,
}

/// Tokens + identity as returned by `POST /login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginPayload {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    pub user: UserProfile,
}

/// Rotated pair as returned by `POST /refresh-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPairPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Read-side port the sync coordinator fetches through. Implemented by the
/// real API client and by the demo provider; the implementation is picked
/// once when the session is created, never re-checked per call.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list_students(&self, access_token: &str) -> Result<Vec<Student>, Error>;

    async fn list_messages(
        &self,
        access_token: &str,
        student_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, Error>;

    /// Deliver a read receipt. Best-effort: the caller re-sends undelivered
    /// receipts ahead of the next sync.
    async fn mark_read(
        &self,
        access_token: &str,
        student_id: i64,
        message_id: i64,
    ) -> Result<(), Error>;
}

/// Auth endpoints. Only the session manager talks to these.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(
        &self,
        identifier: &str,
        secret: &str,
        push_token: Option<&str>,
    ) -> Result<LoginPayload, Error>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPairPayload, Error>;

    async fn revoke(&self, refresh_token: &str) -> Result<(), Error>;

    async fn register_device_token(&self, access_token: &str, token: &str) -> Result<(), Error>;
}

/// Single-slot persistent session storage (OS keyring in production).
pub trait CredentialSlot: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>, Error>;
    fn store(&self, session: &StoredSession) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}
