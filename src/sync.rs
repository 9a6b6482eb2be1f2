use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::models::{Message, Student};
use crate::core::store::StoreHandle;
use crate::error::Error;
use crate::network::NetworkMonitor;
use crate::session::SessionManager;
use crate::source::{MessagePayload, RemoteSource};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// The fetch → merge → reconcile loop for students and messages.
///
/// Results always come back out of the local store after the merge, never
/// straight from the remote payload — the store is the single source of
/// truth and the read-back is what applies the regression-safe merge and
/// the unread invariant. Per-entity gates serialize syncs of the same type
/// so a concurrent caller sees a fully merged result, never a
/// half-applied one.
pub struct SyncCoordinator {
    store: StoreHandle,
    session: Arc<SessionManager>,
    network: NetworkMonitor,
    source: Arc<dyn RemoteSource>,
    students_gate: Mutex<()>,
    messages_gate: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        store: StoreHandle,
        session: Arc<SessionManager>,
        network: NetworkMonitor,
        source: Arc<dyn RemoteSource>,
    ) -> Self {
        SyncCoordinator {
            store,
            session,
            network,
            source,
            students_gate: Mutex::new(()),
            messages_gate: Mutex::new(()),
        }
    }

    /// Current students for the signed-in guardian.
    pub async fn students(&self) -> Result<Vec<Student>, Error> {
        let _gate = self.students_gate.lock().await;

        if self.session.is_demo().await {
            let token = self.session.access_token().await?;
            match self.source.list_students(&token).await {
                Ok(list) => self.merge_students(list).await,
                Err(e) => log::warn!("demo student fetch failed: {e}"),
            }
            return self.read_students().await;
        }

        if !self.session.is_signed_in().await {
            return Err(Error::SignedOut);
        }

        if self.network.is_reachable() {
            let session = self.session.as_ref();
            let source = self.source.as_ref();
            let fetched = session
                .with_auth_retry(move || async move {
                    let token = session.access_token().await?;
                    source.list_students(&token).await
                })
                .await;
            match fetched {
                Ok(list) => self.merge_students(list).await,
                Err(e @ (Error::Unauthorized | Error::Forbidden | Error::SignedOut)) => {
                    return Err(e)
                }
                Err(e) => log::warn!("student sync failed, serving cache: {e}"),
            }
        }

        self.read_students().await
    }

    /// One page of messages for a student, newest first.
    pub async fn messages(
        &self,
        student_id: i64,
        student_number: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, Error> {
        let _gate = self.messages_gate.lock().await;

        if self.session.is_demo().await {
            let token = self.session.access_token().await?;
            self.push_pending_reads(student_id, &token).await;
            match self
                .source
                .list_messages(&token, student_id, offset, limit)
                .await
            {
                Ok(page) => self.merge_messages(page, student_number, student_id).await,
                Err(e) => log::warn!("demo message fetch failed: {e}"),
            }
            return Ok(self.store.load_messages(student_id, limit, offset).await?);
        }

        if !self.session.is_signed_in().await {
            return Err(Error::SignedOut);
        }

        if self.network.is_reachable() {
            if let Ok(token) = self.session.access_token().await {
                self.push_pending_reads(student_id, &token).await;
            }

            let session = self.session.as_ref();
            let source = self.source.as_ref();
            let fetched = session
                .with_auth_retry(move || async move {
                    let token = session.access_token().await?;
                    source
                        .list_messages(&token, student_id, offset, limit)
                        .await
                })
                .await;
            match fetched {
                Ok(page) => self.merge_messages(page, student_number, student_id).await,
                Err(e @ (Error::Unauthorized | Error::Forbidden | Error::SignedOut)) => {
                    return Err(e)
                }
                Err(e) => log::warn!("message sync failed, serving cache: {e}"),
            }
        }

        Ok(self.store.load_messages(student_id, limit, offset).await?)
    }

    /// Record a message-open. Local state is the source of truth and is
    /// written first; the receipt to the server is best-effort and
    /// `sent_status` only flips once a later fetch shows the server
    /// reporting the message read.
    pub async fn mark_read(&self, student_id: i64, message_id: i64) -> Result<(), Error> {
        self.store.mark_message_read(message_id).await?;

        if self.session.is_demo().await || self.network.is_reachable() {
            if let Ok(token) = self.session.access_token().await {
                if let Err(e) = self.source.mark_read(&token, student_id, message_id).await {
                    log::warn!("read receipt for message {message_id} not delivered: {e}");
                }
            }
        }
        Ok(())
    }

    /// User-triggered wipe-and-repopulate. Rows the server stopped
    /// reporting are never deleted on ordinary syncs; this is the only
    /// path that removes them.
    pub async fn clear_and_refetch(&self) -> Result<Vec<Student>, Error> {
        {
            let _messages = self.messages_gate.lock().await;
            self.store.clear_messages().await?;
        }
        {
            let _students = self.students_gate.lock().await;
            self.store.clear_students().await?;
        }
        self.students().await
    }

    async fn merge_students(&self, students: Vec<Student>) {
        if let Err(e) = self.store.upsert_students(students).await {
            log::error!("student cache write failed: {e}");
        }
    }

    async fn merge_messages(
        &self,
        page: Vec<MessagePayload>,
        student_number: &str,
        student_id: i64,
    ) {
        if let Err(e) = self
            .store
            .upsert_messages(page, student_number.to_string(), student_id)
            .await
        {
            log::error!("message cache write failed: {e}");
        }
    }

    /// Read-back path: always serve from the store, with the unread
    /// invariant applied — the server total minus reads the server has not
    /// acknowledged yet, floored at zero.
    async fn read_students(&self) -> Result<Vec<Student>, Error> {
        let mut students = self.store.load_students().await?;
        for s in &mut students {
            let pending = self.store.count_locally_read_unsent(s.id).await?;
            s.unread_count = s.unread_count.saturating_sub(pending);
        }
        Ok(students)
    }

    /// Re-send receipts for locally-read rows the server has not
    /// acknowledged, so a receipt lost to a crash or an offline stretch is
    /// eventually delivered. Best-effort; a failure leaves `sent_status`
    /// at 0 and the receipt is retried on the next sync.
    async fn push_pending_reads(&self, student_id: i64, access_token: &str) {
        let ids = match self.store.unsent_read_ids(student_id).await {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("pending receipt lookup failed: {e}");
                return;
            }
        };
        for id in ids {
            if let Err(e) = self.source.mark_read(access_token, student_id, id).await {
                log::warn!("read receipt for message {id} not delivered: {e}");
                break;
            }
        }
    }
}
