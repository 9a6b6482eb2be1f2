//! Stub ports shared by the session and sync tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::models::{Role, Student, StoredSession, UserProfile};
use crate::error::Error;
use crate::source::{
    AuthTransport, CredentialSlot, LoginPayload, MessagePayload, RemoteSource, TokenPairPayload,
};

pub fn guardian_profile() -> UserProfile {
    UserProfile {
        given_name: "Aiko".into(),
        family_name: "Tanaka".into(),
        email: "parent@example.com".into(),
        role: Role::Guardian,
        school_name: "North Elementary".into(),
    }
}

pub fn student(id: i64, unread: u32) -> Student {
    Student {
        id,
        student_number: format!("S-{id}"),
        given_name: "Mina".into(),
        family_name: "Okada".into(),
        phone_number: None,
        email: None,
        unread_count: unread,
    }
}

pub fn payload(id: i64, sent_time: &str, read: bool) -> MessagePayload {
    MessagePayload {
        id,
        title: format!("notice {id}"),
        content: "please check".into(),
        priority: crate::core::models::Priority::Medium,
        group_name: None,
        images: None,
        sent_time: sent_time.into(),
        read,
    }
}

/// In-memory CredentialSlot so tests never touch the OS keyring.
pub struct MemorySlot(Mutex<Option<StoredSession>>);

impl MemorySlot {
    pub fn new() -> Self {
        MemorySlot(Mutex::new(None))
    }

    pub fn snapshot(&self) -> Option<StoredSession> {
        self.0.lock().expect("slot poisoned").clone()
    }
}

impl CredentialSlot for MemorySlot {
    fn load(&self) -> Result<Option<StoredSession>, Error> {
        Ok(self.snapshot())
    }

    fn store(&self, session: &StoredSession) -> Result<(), Error> {
        *self.0.lock().expect("slot poisoned") = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.0.lock().expect("slot poisoned") = None;
        Ok(())
    }
}

/// Scripted outcome for a stubbed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Succeed,
    Deny401,
    Deny403,
    Offline,
}

impl Behavior {
    fn gate(self) -> Result<(), Error> {
        match self {
            Behavior::Succeed => Ok(()),
            Behavior::Deny401 => Err(Error::Unauthorized),
            Behavior::Deny403 => Err(Error::Forbidden),
            Behavior::Offline => Err(Error::Network("stub offline".into())),
        }
    }
}

/// AuthTransport stub with per-endpoint call counters.
#[derive(Default)]
pub struct StubAuth {
    pub login_behavior: Behavior,
    pub refresh_behavior: Behavior,
    pub refresh_delay_ms: u64,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub device_calls: AtomicUsize,
}

#[async_trait]
impl AuthTransport for StubAuth {
    async fn login(
        &self,
        _identifier: &str,
        _secret: &str,
        _push_token: Option<&str>,
    ) -> Result<LoginPayload, Error> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_behavior.gate()?;
        Ok(LoginPayload {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            expires_in: 3600,
            user: guardian_profile(),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPairPayload, Error> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.refresh_delay_ms)).await;
        }
        self.refresh_behavior.gate()?;
        Ok(TokenPairPayload {
            access_token: format!("access-r{n}"),
            refresh_token: format!("refresh-r{n}"),
            expires_in: 3600,
        })
    }

    async fn revoke(&self, _refresh_token: &str) -> Result<(), Error> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register_device_token(&self, _access_token: &str, _token: &str) -> Result<(), Error> {
        self.device_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// RemoteSource stub backed by mutable in-memory data, counting every
/// network-shaped call so offline tests can assert zero traffic.
pub struct FakeSource {
    pub students: Mutex<Vec<Student>>,
    pub messages: Mutex<HashMap<i64, Vec<MessagePayload>>>,
    pub behavior: Mutex<Behavior>,
    pub calls: AtomicUsize,
    pub receipts: Mutex<Vec<(i64, i64)>>,
    /// When false the stub accepts receipts but keeps reporting the message
    /// unread, like a server that has not processed the event yet.
    pub ack_reads: AtomicBool,
}

impl Default for FakeSource {
    fn default() -> Self {
        FakeSource {
            students: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            behavior: Mutex::new(Behavior::Succeed),
            calls: AtomicUsize::new(0),
            receipts: Mutex::new(Vec::new()),
            ack_reads: AtomicBool::new(true),
        }
    }
}

impl FakeSource {
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().expect("stub poisoned") = behavior;
    }

    pub fn set_messages(&self, student_id: i64, messages: Vec<MessagePayload>) {
        self.messages
            .lock()
            .expect("stub poisoned")
            .insert(student_id, messages);
    }

    fn gate(&self) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.lock().expect("stub poisoned").gate()
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn list_students(&self, _access_token: &str) -> Result<Vec<Student>, Error> {
        self.gate()?;
        Ok(self.students.lock().expect("stub poisoned").clone())
    }

    async fn list_messages(
        &self,
        _access_token: &str,
        student_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, Error> {
        self.gate()?;
        let map = self.messages.lock().expect("stub poisoned");
        let all = map.get(&student_id).cloned().unwrap_or_default();
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn mark_read(
        &self,
        _access_token: &str,
        student_id: i64,
        message_id: i64,
    ) -> Result<(), Error> {
        self.gate()?;
        self.receipts
            .lock()
            .expect("stub poisoned")
            .push((student_id, message_id));
        if self.ack_reads.load(Ordering::SeqCst) {
            if let Some(list) = self
                .messages
                .lock()
                .expect("stub poisoned")
                .get_mut(&student_id)
            {
                for m in list.iter_mut().filter(|m| m.id == message_id) {
                    m.read = true;
                }
            }
        }
        Ok(())
    }
}
