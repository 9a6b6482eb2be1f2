use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::core::models::{Role, StoredSession, UserProfile};
use crate::core::store::StoreHandle;
use crate::error::Error;
use crate::source::{AuthTransport, CredentialSlot};

/// Credentials that route all data access through the demo provider.
pub const DEMO_IDENTIFIER: &str = "demo@homeroom.app";

const DEMO_SESSION_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SigningIn,
    SignedIn,
    /// Login was answered with the temporary-password response; no session
    /// is issued until the password is replaced.
    PasswordChangeRequired,
}

/// Outcome of a sign-in attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignIn {
    SignedIn,
    PasswordChangeRequired,
}

/// Owns the credential lifecycle. The only component allowed to mint,
/// refresh, or destroy tokens; everything downstream observes the state
/// watch channel instead of registering callbacks.
pub struct SessionManager {
    auth: Arc<dyn AuthTransport>,
    slot: Arc<dyn CredentialSlot>,
    store: StoreHandle,
    current: RwLock<Option<StoredSession>>,
    refresh_gate: Mutex<()>,
    state: watch::Sender<SessionState>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SessionManager {
    /// Restores any persisted session from the credential slot (warm start).
    pub fn new(
        auth: Arc<dyn AuthTransport>,
        slot: Arc<dyn CredentialSlot>,
        store: StoreHandle,
    ) -> Self {
        let restored = match slot.load() {
            Ok(session) => session,
            Err(e) => {
                log::warn!("could not restore persisted session: {e}");
                None
            }
        };
        let initial = if restored.is_some() {
            SessionState::SignedIn
        } else {
            SessionState::SignedOut
        };
        let (state, _rx) = watch::channel(initial);

        SessionManager {
            auth,
            slot,
            store,
            current: RwLock::new(restored),
            refresh_gate: Mutex::new(()),
            state,
        }
    }

    pub async fn sign_in(
        &self,
        identifier: &str,
        secret: &str,
        push_token: Option<&str>,
    ) -> Result<SignIn, Error> {
        self.state.send_replace(SessionState::SigningIn);

        if identifier == DEMO_IDENTIFIER {
            log::info!("demo credentials recognized, minting local session");
            self.install(Self::demo_session()).await;
            return Ok(SignIn::SignedIn);
        }

        match self.auth.login(identifier, secret, push_token).await {
            Ok(payload) => {
                let session = StoredSession {
                    access_token: payload.access_token,
                    refresh_token: payload.refresh_token,
                    expires_at: now_millis() + payload.expires_in * 1000,
                    user: payload.user,
                };
                self.install(session).await;
                Ok(SignIn::SignedIn)
            }
            Err(Error::Forbidden) => {
                self.state.send_replace(SessionState::PasswordChangeRequired);
                Ok(SignIn::PasswordChangeRequired)
            }
            Err(Error::Unauthorized) => {
                self.state.send_replace(SessionState::SignedOut);
                Err(Error::InvalidCredentials)
            }
            Err(e) => {
                self.state.send_replace(SessionState::SignedOut);
                Err(e)
            }
        }
    }

    async fn install(&self, session: StoredSession) {
        if let Err(e) = self.slot.store(&session) {
            log::error!("session not persisted, will not survive restart: {e}");
        }
        if let Err(e) = self.store.save_user(session.user.clone()).await {
            log::error!("user row not cached: {e}");
        }
        *self.current.write().await = Some(session);
        self.state.send_replace(SessionState::SignedIn);
    }

    fn demo_session() -> StoredSession {
        StoredSession {
            access_token: format!("demo-access-{}", Uuid::new_v4()),
            refresh_token: format!("demo-refresh-{}", Uuid::new_v4()),
            expires_at: now_millis() + DEMO_SESSION_DAYS * 24 * 60 * 60 * 1000,
            user: UserProfile {
                given_name: "Demo".into(),
                family_name: "Guardian".into(),
                email: DEMO_IDENTIFIER.into(),
                role: Role::Demo,
                school_name: "Homeroom Academy".into(),
            },
        }
    }

    pub async fn access_token(&self) -> Result<String, Error> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(Error::SignedOut)
    }

    pub async fn is_signed_in(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn is_demo(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.is_demo())
            .unwrap_or(false)
    }

    pub async fn is_expired(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.is_expired_at(now_millis()))
            .unwrap_or(true)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The session-invalidated signal: sync and UI both watch this.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Exchange the refresh token for a new pair. Only one exchange is ever
    /// in flight: a caller that waited on the gate and finds the token
    /// already rotated returns without issuing a second request.
    pub async fn refresh(&self) -> Result<(), Error> {
        let seen = self.access_token().await?;
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = {
            let current = self.current.read().await;
            let session = current.as_ref().ok_or(Error::SignedOut)?;
            // Demo tokens are minted locally and must never reach the real
            // auth endpoint.
            if session.is_demo() {
                return Ok(());
            }
            if session.access_token != seen {
                return Ok(());
            }
            session.refresh_token.clone()
        };

        match self.auth.refresh(&refresh_token).await {
            Ok(pair) => {
                let mut current = self.current.write().await;
                if let Some(session) = current.as_mut() {
                    session.access_token = pair.access_token;
                    session.refresh_token = pair.refresh_token;
                    session.expires_at = now_millis() + pair.expires_in * 1000;
                    if let Err(e) = self.slot.store(session) {
                        log::error!("rotated session not persisted: {e}");
                    }
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("token refresh failed, signing out: {e}");
                self.force_sign_out().await;
                Err(e)
            }
        }
    }

    /// Drop the session after an unrecoverable auth failure. Messages and
    /// the user row are cleared; student rows survive for instant
    /// re-display on the next login.
    pub async fn force_sign_out(&self) {
        *self.current.write().await = None;
        if let Err(e) = self.store.clear_messages().await {
            log::error!("message wipe failed: {e}");
        }
        if let Err(e) = self.store.clear_user().await {
            log::error!("user wipe failed: {e}");
        }
        if let Err(e) = self.slot.clear() {
            log::error!("credential slot not cleared: {e}");
        }
        self.state.send_replace(SessionState::SignedOut);
    }

    /// Explicit user-initiated logout: best-effort server-side revocation,
    /// then a full local wipe including student rows.
    pub async fn sign_out(&self) {
        let session = self.current.write().await.take();
        if let Some(session) = session {
            if !session.is_demo() {
                if let Err(e) = self.auth.revoke(&session.refresh_token).await {
                    log::warn!("token revoke failed (ignored): {e}");
                }
            }
        }
        if let Err(e) = self.store.clear_messages().await {
            log::error!("message wipe failed: {e}");
        }
        if let Err(e) = self.store.clear_user().await {
            log::error!("user wipe failed: {e}");
        }
        if let Err(e) = self.store.clear_students().await {
            log::error!("student wipe failed: {e}");
        }
        if let Err(e) = self.slot.clear() {
            log::error!("credential slot not cleared: {e}");
        }
        self.state.send_replace(SessionState::SignedOut);
    }

    /// Run an authenticated operation under the recovery contract: a 401
    /// triggers exactly one refresh and one retry; a 401 after a successful
    /// refresh is a hard failure, and a 403 is never retried — both force
    /// sign-out.
    pub async fn with_auth_retry<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(Error::Unauthorized) => {
                self.refresh().await?;
                match op().await {
                    Err(Error::Unauthorized) => {
                        log::error!("still unauthorized after refresh, signing out");
                        self.force_sign_out().await;
                        Err(Error::Unauthorized)
                    }
                    result => result,
                }
            }
            Err(Error::Forbidden) => {
                log::error!("forbidden response, signing out");
                self.force_sign_out().await;
                Err(Error::Forbidden)
            }
            Err(e) => Err(e),
        }
    }

    /// Propagate a (possibly rotated) push token to the server. Called on
    /// every platform token rotation, not just at login.
    pub async fn register_push_token(&self, token: &str) -> Result<(), Error> {
        if self.is_demo().await {
            return Ok(());
        }
        let this = self;
        self.with_auth_retry(move || async move {
            let access = this.access_token().await?;
            this.auth.register_device_token(&access, token).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testutil::{payload, student, Behavior, MemorySlot, StubAuth};

    fn manager(auth: Arc<StubAuth>, store: StoreHandle) -> SessionManager {
        SessionManager::new(auth, Arc::new(MemorySlot::new()), store)
    }

    async fn seeded_store() -> StoreHandle {
        let store = StoreHandle::open_in_memory().unwrap();
        store.upsert_students(vec![student(1, 2)]).await.unwrap();
        store
            .upsert_messages(vec![payload(10, "2026-04-01T09:00:00Z", false)], "S-1".into(), 1)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn sign_in_stores_session_and_user_row() {
        let auth = Arc::new(StubAuth::default());
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth.clone(), store.clone());

        let outcome = manager.sign_in("parent@example.com", "pw", None).await.unwrap();
        assert_eq!(outcome, SignIn::SignedIn);
        assert_eq!(manager.state(), SessionState::SignedIn);
        assert!(!manager.is_expired().await);
        assert!(store.load_user().await.unwrap().is_some());
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn demo_credentials_mint_a_local_session() {
        let auth = Arc::new(StubAuth::default());
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth.clone(), store);

        manager.sign_in(DEMO_IDENTIFIER, "anything", None).await.unwrap();
        assert!(manager.is_demo().await);
        assert_eq!(auth.login_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn temporary_password_response_is_a_distinct_state() {
        let auth = Arc::new(StubAuth {
            login_behavior: Behavior::Deny403,
            ..StubAuth::default()
        });
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth, store);

        let outcome = manager.sign_in("parent@example.com", "temp", None).await.unwrap();
        assert_eq!(outcome, SignIn::PasswordChangeRequired);
        assert_eq!(manager.state(), SessionState::PasswordChangeRequired);
        assert!(!manager.is_signed_in().await);
    }

    #[tokio::test]
    async fn bad_credentials_stay_signed_out() {
        let auth = Arc::new(StubAuth {
            login_behavior: Behavior::Deny401,
            ..StubAuth::default()
        });
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth, store);

        let err = manager.sign_in("parent@example.com", "wrong", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
        assert_eq!(manager.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn concurrent_refreshes_issue_one_request() {
        let auth = Arc::new(StubAuth {
            refresh_delay_ms: 30,
            ..StubAuth::default()
        });
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = Arc::new(manager(auth.clone(), store));
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        let a = Arc::clone(&manager);
        let b = Arc::clone(&manager);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.refresh().await }),
            tokio::spawn(async move { b.refresh().await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        // Both callers observe the same rotated pair.
        assert!(manager.access_token().await.unwrap().starts_with("access-r"));
    }

    #[tokio::test]
    async fn refresh_failure_clears_messages_keeps_students() {
        let auth = Arc::new(StubAuth {
            refresh_behavior: Behavior::Deny401,
            ..StubAuth::default()
        });
        let store = seeded_store().await;
        let manager = manager(auth, store.clone());
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        assert!(manager.refresh().await.is_err());
        assert_eq!(manager.state(), SessionState::SignedOut);
        assert!(store.load_messages(1, 10, 0).await.unwrap().is_empty());
        assert!(store.load_user().await.unwrap().is_none());
        assert_eq!(store.load_students().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_triggers_one_refresh_and_one_retry() {
        let auth = Arc::new(StubAuth::default());
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth.clone(), store);
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let attempts = &attempts;
        let result = manager
            .with_auth_retry(move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Unauthorized)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_unauthorized_after_refresh_signs_out() {
        let auth = Arc::new(StubAuth::default());
        let store = seeded_store().await;
        let manager = manager(auth.clone(), store.clone());
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        let result: Result<(), Error> = manager
            .with_auth_retry(|| async { Err(Error::Unauthorized) })
            .await;

        assert!(matches!(result, Err(Error::Unauthorized)));
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SessionState::SignedOut);
        assert_eq!(store.load_students().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forbidden_is_never_retried() {
        let auth = Arc::new(StubAuth::default());
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth.clone(), store);
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let attempts = &attempts;
        let result: Result<(), Error> = manager
            .with_auth_retry(move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Forbidden)
            })
            .await;

        assert!(matches!(result, Err(Error::Forbidden)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn explicit_sign_out_revokes_and_clears_students() {
        let auth = Arc::new(StubAuth::default());
        let store = seeded_store().await;
        let manager = manager(auth.clone(), store.clone());
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        manager.sign_out().await;
        assert_eq!(auth.revoke_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SessionState::SignedOut);
        assert!(store.load_students().await.unwrap().is_empty());
        assert!(store.load_messages(1, 10, 0).await.unwrap().is_empty());
        assert!(store.load_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn warm_start_restores_persisted_session() {
        let auth = Arc::new(StubAuth::default());
        let slot = Arc::new(MemorySlot::new());
        let store = StoreHandle::open_in_memory().unwrap();

        {
            let manager =
                SessionManager::new(auth.clone(), slot.clone(), store.clone());
            manager.sign_in("parent@example.com", "pw", None).await.unwrap();
        }

        let manager = SessionManager::new(auth, slot, store);
        assert_eq!(manager.state(), SessionState::SignedIn);
        assert!(manager.access_token().await.is_ok());
    }

    #[tokio::test]
    async fn push_token_rotation_registers_with_bearer_auth() {
        let auth = Arc::new(StubAuth::default());
        let store = StoreHandle::open_in_memory().unwrap();
        let manager = manager(auth.clone(), store);
        manager.sign_in("parent@example.com", "pw", None).await.unwrap();

        manager.register_push_token("fcm-rotated-1").await.unwrap();
        assert_eq!(auth.device_calls.load(Ordering::SeqCst), 1);
    }
}
