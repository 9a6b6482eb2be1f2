use serde::{Deserialize, Serialize};

/// A student linked to the signed-in guardian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub student_number: String,
    pub given_name: String,
    pub family_name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    /// Server-reported unread total. The sync layer subtracts locally-read
    /// messages the server has not acknowledged yet before display.
    pub unread_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Unknown values degrade to Medium rather than failing the row.
    pub fn parse(s: &str) -> Priority {
        match s {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// A school message as cached on-device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub student_id: i64,
    pub student_number: String,
    pub title: String,
    pub content: String,
    pub priority: Priority,
    pub group_name: Option<String>,
    pub images: Vec<String>,
    /// Server send time (UTC).
    pub sent_time: String,
    /// Opened locally or reported read by the server.
    pub read_status: bool,
    /// When the local read event happened, if any.
    pub read_time: Option<String>,
    /// Whether the server has acknowledged the read event.
    pub sent_status: bool,
    /// When this row first landed in the local store. NULL on rows that
    /// predate arrival tracking; those sort first.
    pub came_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guardian,
    Demo,
}

/// Minimal identity cached for the signed-in user (single slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub role: Role,
    pub school_name: String,
}

/// Everything persisted in the credential slot. One active session per
/// device; a new sign-in overwrites the previous record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch millis.
    pub expires_at: i64,
    pub user: UserProfile,
}

impl StoredSession {
    pub fn is_demo(&self) -> bool {
        self.user.role == Role::Demo
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }
}
