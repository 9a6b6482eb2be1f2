use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use crate::core::migrations;
use crate::core::models::{Message, Priority, Role, Student, UserProfile};
use crate::error::{Error, StoreError};
use crate::source::MessagePayload;

// ---------------------------------------------------------------------------
// Commands sent from async world → background thread
// ---------------------------------------------------------------------------

enum StoreCmd {
    UpsertStudents {
        students: Vec<Student>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    UpsertMessages {
        messages: Vec<MessagePayload>,
        student_number: String,
        student_id: i64,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    LoadStudents {
        reply: oneshot::Sender<Result<Vec<Student>, StoreError>>,
    },
    LoadMessages {
        student_id: i64,
        limit: u32,
        offset: u32,
        reply: oneshot::Sender<Result<Vec<Message>, StoreError>>,
    },
    CountUnsentRead {
        student_id: i64,
        reply: oneshot::Sender<Result<u32, StoreError>>,
    },
    UnsentReadIds {
        student_id: i64,
        reply: oneshot::Sender<Result<Vec<i64>, StoreError>>,
    },
    MarkRead {
        message_id: i64,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    SaveUser {
        user: UserProfile,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    LoadUser {
        reply: oneshot::Sender<Result<Option<UserProfile>, StoreError>>,
    },
    ClearUser {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    ClearMessages {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    ClearStudents {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

// ---------------------------------------------------------------------------
// StoreHandle — Clone + Send + Sync async facade
// ---------------------------------------------------------------------------

/// Handle to the on-device store. All reads and writes funnel through one
/// background thread, which is what serializes writes and keeps the
/// regression-safe merge rule enforceable — no other component touches the
/// tables directly.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCmd>,
}

impl StoreHandle {
    /// Open (or create) the store at the platform data dir and spawn the
    /// background thread. Migrations run here, synchronously, before any
    /// other component can touch the store; a migration failure aborts the
    /// open.
    pub fn open() -> Result<Self, Error> {
        let dir = Self::resolve_path();
        Self::open_at(&dir.join("cache.db"))
    }

    pub fn open_at(db_file: &Path) -> Result<Self, Error> {
        if let Some(parent) = db_file.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }
        let conn = Connection::open(db_file).map_err(StoreError::Sqlite)?;
        Self::start(conn)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        Self::start(conn)
    }

    fn start(conn: Connection) -> Result<Self, Error> {
        migrations::run(&conn)?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("homeroom-store".into())
            .spawn(move || Self::run_loop(conn, rx))
            .map_err(StoreError::Io)?;

        Ok(StoreHandle { tx })
    }

    fn resolve_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("homeroom")
    }

    // -- async methods -------------------------------------------------------

    pub async fn upsert_students(&self, students: Vec<Student>) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::UpsertStudents { students, reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn upsert_messages(
        &self,
        messages: Vec<MessagePayload>,
        student_number: String,
        student_id: i64,
    ) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::UpsertMessages {
                messages,
                student_number,
                student_id,
                reply,
            })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn load_students(&self) -> Result<Vec<Student>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::LoadStudents { reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn load_messages(
        &self,
        student_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::LoadMessages {
                student_id,
                limit,
                offset,
                reply,
            })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    /// Count of messages read locally but not yet acknowledged by the
    /// server (`read_status = 1 AND sent_status = 0`).
    pub async fn count_locally_read_unsent(&self, student_id: i64) -> Result<u32, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::CountUnsentRead { student_id, reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn unsent_read_ids(&self, student_id: i64) -> Result<Vec<i64>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::UnsentReadIds { student_id, reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn mark_message_read(&self, message_id: i64) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::MarkRead { message_id, reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn save_user(&self, user: UserProfile) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::SaveUser { user, reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn load_user(&self) -> Result<Option<UserProfile>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::LoadUser { reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn clear_user(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::ClearUser { reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn clear_messages(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::ClearMessages { reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn clear_students(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCmd::ClearStudents { reply })
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    // -- background thread ---------------------------------------------------

    fn run_loop(conn: Connection, mut rx: mpsc::UnboundedReceiver<StoreCmd>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                StoreCmd::UpsertStudents { students, reply } => {
                    let _ = reply.send(Self::do_upsert_students(&conn, &students));
                }
                StoreCmd::UpsertMessages {
                    messages,
                    student_number,
                    student_id,
                    reply,
                } => {
                    let _ = reply.send(Self::do_upsert_messages(
                        &conn,
                        &messages,
                        &student_number,
                        student_id,
                    ));
                }
                StoreCmd::LoadStudents { reply } => {
                    let _ = reply.send(Self::do_load_students(&conn));
                }
                StoreCmd::LoadMessages {
                    student_id,
                    limit,
                    offset,
                    reply,
                } => {
                    let _ = reply.send(Self::do_load_messages(&conn, student_id, limit, offset));
                }
                StoreCmd::CountUnsentRead { student_id, reply } => {
                    let _ = reply.send(Self::do_count_unsent_read(&conn, student_id));
                }
                StoreCmd::UnsentReadIds { student_id, reply } => {
                    let _ = reply.send(Self::do_unsent_read_ids(&conn, student_id));
                }
                StoreCmd::MarkRead { message_id, reply } => {
                    let _ = reply.send(Self::do_mark_read(&conn, message_id));
                }
                StoreCmd::SaveUser { user, reply } => {
                    let _ = reply.send(Self::do_save_user(&conn, &user));
                }
                StoreCmd::LoadUser { reply } => {
                    let _ = reply.send(Self::do_load_user(&conn));
                }
                StoreCmd::ClearUser { reply } => {
                    let _ = reply.send(Self::do_clear(&conn, "user"));
                }
                StoreCmd::ClearMessages { reply } => {
                    let _ = reply.send(Self::do_clear(&conn, "message"));
                }
                StoreCmd::ClearStudents { reply } => {
                    let _ = reply.send(Self::do_clear(&conn, "student"));
                }
            }
        }
        log::debug!("store thread exiting");
    }

    // -- synchronous DB operations -------------------------------------------

    fn do_upsert_students(conn: &Connection, students: &[Student]) -> Result<(), StoreError> {
        let tx = conn.unchecked_transaction()?;

        let mut stmt = tx.prepare(
            "INSERT INTO student (id, student_number, given_name, family_name, phone_number, email, unread_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 student_number = excluded.student_number,
                 given_name = excluded.given_name,
                 family_name = excluded.family_name,
                 phone_number = excluded.phone_number,
                 email = excluded.email,
                 unread_count = excluded.unread_count",
        )?;

        for s in students {
            stmt.execute(rusqlite::params![
                s.id,
                s.student_number,
                s.given_name,
                s.family_name,
                s.phone_number,
                s.email,
                s.unread_count,
            ])?;
        }
        drop(stmt);

        tx.commit()?;
        Ok(())
    }

    fn do_upsert_messages(
        conn: &Connection,
        messages: &[MessagePayload],
        student_number: &str,
        student_id: i64,
    ) -> Result<(), StoreError> {
        let tx = conn.unchecked_transaction()?;
        let came_time = Utc::now().to_rfc3339();

        // The merge rule: a stale server response must not revert a local
        // read the server has not acknowledged yet. `sent_status` tracks
        // the server-side acknowledgement and comes straight from the
        // incoming row; `read_time` and `came_time` are local facts and
        // never regress once set.
        let mut stmt = tx.prepare(
            "INSERT INTO message (id, student_id, student_number, title, content, priority,
                                  group_name, images, sent_time, read_status, read_time,
                                  sent_status, came_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                 student_id = excluded.student_id,
                 student_number = excluded.student_number,
                 title = excluded.title,
                 content = excluded.content,
                 priority = excluded.priority,
                 group_name = excluded.group_name,
                 images = excluded.images,
                 sent_time = excluded.sent_time,
                 read_status = CASE
                     WHEN excluded.read_status = 0
                          AND message.read_status = 1
                          AND message.sent_status = 0
                         THEN 1
                     ELSE excluded.read_status
                 END,
                 read_time = COALESCE(message.read_time, excluded.read_time),
                 sent_status = excluded.sent_status,
                 came_time = COALESCE(message.came_time, excluded.came_time)",
        )?;

        for m in messages {
            let images = m
                .images
                .as_ref()
                .map(|list| serde_json::to_string(list).unwrap_or_else(|_| "[]".into()));
            stmt.execute(rusqlite::params![
                m.id,
                student_id,
                student_number,
                m.title,
                m.content,
                m.priority.as_str(),
                m.group_name,
                images,
                m.sent_time,
                m.read as i32,
                m.read as i32,
                came_time,
            ])?;
        }
        drop(stmt);

        tx.commit()?;
        Ok(())
    }

    fn do_load_students(conn: &Connection) -> Result<Vec<Student>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, student_number, given_name, family_name, phone_number, email, unread_count
             FROM student
             ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Student {
                id: row.get(0)?,
                student_number: row.get(1)?,
                given_name: row.get(2)?,
                family_name: row.get(3)?,
                phone_number: row.get(4)?,
                email: row.get(5)?,
                unread_count: row.get(6)?,
            })
        })?;

        let mut students = Vec::new();
        for row in rows {
            students.push(row?);
        }
        Ok(students)
    }

    fn do_load_messages(
        conn: &Connection,
        student_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError> {
        // Not-yet-tracked arrivals first, then newest arrival, then newest
        // send time.
        let mut stmt = conn.prepare(
            "SELECT id, student_id, student_number, title, content, priority, group_name,
                    images, sent_time, read_status, read_time, sent_status, came_time
             FROM message
             WHERE student_id = ?1
             ORDER BY (came_time IS NULL) DESC, came_time DESC, sent_time DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(rusqlite::params![student_id, limit, offset], |row| {
            let priority: String = row.get(5)?;
            let images: Option<String> = row.get(7)?;
            Ok(Message {
                id: row.get(0)?,
                student_id: row.get(1)?,
                student_number: row.get(2)?,
                title: row.get(3)?,
                content: row.get(4)?,
                priority: Priority::parse(&priority),
                group_name: row.get(6)?,
                images: images
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default(),
                sent_time: row.get(8)?,
                read_status: row.get::<_, i32>(9)? != 0,
                read_time: row.get(10)?,
                sent_status: row.get::<_, i32>(11)? != 0,
                came_time: row.get(12)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn do_count_unsent_read(conn: &Connection, student_id: i64) -> Result<u32, StoreError> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM message
             WHERE student_id = ?1 AND read_status = 1 AND sent_status = 0",
            [student_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn do_unsent_read_ids(conn: &Connection, student_id: i64) -> Result<Vec<i64>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id FROM message
             WHERE student_id = ?1 AND read_status = 1 AND sent_status = 0
             ORDER BY id",
        )?;
        let rows = stmt.query_map([student_id], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn do_mark_read(conn: &Connection, message_id: i64) -> Result<(), StoreError> {
        // Idempotent: an already-read row keeps its original read_time.
        conn.execute(
            "UPDATE message SET read_status = 1, read_time = ?2
             WHERE id = ?1 AND read_status = 0",
            rusqlite::params![message_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn do_save_user(conn: &Connection, user: &UserProfile) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO user (id, given_name, family_name, email, role, school_name)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 given_name = excluded.given_name,
                 family_name = excluded.family_name,
                 email = excluded.email,
                 role = excluded.role,
                 school_name = excluded.school_name",
            rusqlite::params![
                user.given_name,
                user.family_name,
                user.email,
                match user.role {
                    Role::Guardian => "guardian",
                    Role::Demo => "demo",
                },
                user.school_name,
            ],
        )?;
        Ok(())
    }

    fn do_load_user(conn: &Connection) -> Result<Option<UserProfile>, StoreError> {
        let result = conn.query_row(
            "SELECT given_name, family_name, email, role, school_name FROM user WHERE id = 1",
            [],
            |row| {
                let role: String = row.get(3)?;
                Ok(UserProfile {
                    given_name: row.get(0)?,
                    family_name: row.get(1)?,
                    email: row.get(2)?,
                    role: if role == "demo" { Role::Demo } else { Role::Guardian },
                    school_name: row.get(4)?,
                })
            },
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    fn do_clear(conn: &Connection, table: &str) -> Result<(), StoreError> {
        conn.execute_batch(&format!("DELETE FROM {table};"))?;
        Ok(())
    }
}
