use rusqlite::Connection;

use crate::error::MigrationError;

/// Schema version this build targets.
pub const TARGET_VERSION: i64 = 3;

const V1_BASE: &str = "
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    given_name TEXT NOT NULL,
    family_name TEXT NOT NULL,
    email TEXT NOT NULL,
    role TEXT NOT NULL,
    school_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS student (
    id INTEGER PRIMARY KEY,
    student_number TEXT NOT NULL,
    given_name TEXT NOT NULL,
    family_name TEXT NOT NULL,
    phone_number TEXT,
    email TEXT,
    unread_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS message (
    id INTEGER PRIMARY KEY,
    student_id INTEGER NOT NULL,
    student_number TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    priority TEXT NOT NULL DEFAULT 'medium',
    sent_time TEXT NOT NULL,
    read_status INTEGER NOT NULL DEFAULT 0,
    read_time TEXT,
    sent_status INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_message_student
    ON message(student_id, sent_time DESC);
";

/// Bring the schema from whatever `PRAGMA user_version` says up to
/// [`TARGET_VERSION`]. Runs before the store thread spawns; each step is
/// applied at most once, and a crash between a DDL change and its version
/// bump is safe to retry.
pub fn run(conn: &Connection) -> Result<i64, MigrationError> {
    let mut version = user_version(conn).map_err(|e| MigrationError {
        version: 0,
        source: e,
    })?;

    if version < 1 {
        batch(conn, 1, V1_BASE)?;
        set_version(conn, 1)?;
        version = 1;
    }

    if version < 2 {
        add_column(conn, 2, "message", "group_name TEXT")?;
        add_column(conn, 2, "message", "images TEXT")?;
        set_version(conn, 2)?;
        version = 2;
    }

    if version < 3 {
        add_column(conn, 3, "message", "came_time TEXT")?;
        batch(
            conn,
            3,
            "CREATE INDEX IF NOT EXISTS idx_message_arrival
                 ON message(student_id, came_time DESC);",
        )?;
        set_version(conn, 3)?;
        version = 3;
    }

    log::debug!("local schema at v{version}");
    Ok(version)
}

fn user_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn set_version(conn: &Connection, version: i64) -> Result<(), MigrationError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| MigrationError { version, source: e })
}

fn batch(conn: &Connection, version: i64, sql: &str) -> Result<(), MigrationError> {
    conn.execute_batch(sql)
        .map_err(|e| MigrationError { version, source: e })
}

/// ALTER TABLE has no IF NOT EXISTS; a retried step that already added the
/// column reports "duplicate column name" and counts as applied.
fn add_column(
    conn: &Connection,
    version: i64,
    table: &str,
    decl: &str,
) -> Result<(), MigrationError> {
    match conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {decl};")) {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => {
            log::warn!("column {table}.{decl} already present, treating migration step as applied");
            Ok(())
        }
        Err(e) => Err(MigrationError { version, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_columns(conn: &Connection) -> Vec<String> {
        let mut stmt = conn.prepare("PRAGMA table_info(message)").unwrap();
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        cols
    }

    #[test]
    fn fresh_store_reaches_target_version() {
        let conn = Connection::open_in_memory().unwrap();
        let version = run(&conn).unwrap();
        assert_eq!(version, TARGET_VERSION);
        assert_eq!(user_version(&conn).unwrap(), TARGET_VERSION);

        let cols = message_columns(&conn);
        assert!(cols.contains(&"group_name".to_string()));
        assert!(cols.contains(&"images".to_string()));
        assert!(cols.contains(&"came_time".to_string()));
    }

    #[test]
    fn rerun_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        let cols_first = message_columns(&conn);

        let version = run(&conn).unwrap();
        assert_eq!(version, TARGET_VERSION);
        assert_eq!(message_columns(&conn), cols_first);
    }

    #[test]
    fn crash_between_ddl_and_version_bump_is_retryable() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        // Simulate a crash mid-v2: columns exist but the counter still says 1.
        conn.execute_batch("PRAGMA user_version = 1;").unwrap();

        let version = run(&conn).unwrap();
        assert_eq!(version, TARGET_VERSION);

        let cols = message_columns(&conn);
        assert_eq!(
            cols.iter().filter(|c| c.as_str() == "group_name").count(),
            1
        );
    }

    #[test]
    fn version_counter_never_decreases() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), TARGET_VERSION);
    }
}
