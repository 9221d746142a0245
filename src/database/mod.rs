//! Database root.
//!
//! Owns the prepared-statement cache and the typed operations over the
//! primary, housing, banishment and info tables. All access runs on the
//! event-loop thread against one embedded SQLite connection opened in
//! single-threaded mode; multi-threading would have to move the database
//! behind a request queue, not add locks here.

pub mod account_db;
pub mod banish_db;
pub mod cache;
pub mod character_db;
pub mod house_db;
pub mod info_db;
pub mod world_db;

use crate::core::Clock;
use anyhow::{Context, Result};
use self::cache::StmtCache;
use rusqlite::{Connection, OpenFlags, Statement};
use std::path::Path;
use thiserror::Error;

/// SQLite application id stamped into every database file we create:
/// ASCII "TiDB".
pub const APPLICATION_ID: i32 = 0x54694442;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("database has unknown application id {found:08X} (expected 54694442)")]
    ApplicationIdMismatch { found: i32 },
    #[error("database has no application id but non-zero user version {0}")]
    VersionWithoutApplicationId(i32),
}

/// Typed access to the persistent store. Borrows the connection so the
/// statement cache can hold prepared handles for the server's lifetime.
pub struct Db<'conn> {
    conn: &'conn Connection,
    cache: StmtCache<'conn>,
}

impl<'conn> Db<'conn> {
    pub fn new(conn: &'conn Connection, max_cached_statements: usize, clock: Clock) -> Self {
        tracing::info!("Max cached statements: {}", max_cached_statements);
        Self {
            conn,
            cache: StmtCache::new(conn, max_cached_statements, clock),
        }
    }

    pub(crate) fn prepare(&mut self, sql: &str) -> Result<&mut Statement<'conn>> {
        self.cache.prepare(sql)
    }

    /// Opens a transaction scope. The caller must `begin` it explicitly;
    /// dropping a running scope rolls back.
    pub fn transaction(&self, context: &'static str) -> TransactionScope<'conn> {
        TransactionScope {
            conn: self.conn,
            context,
            running: false,
        }
    }
}

/// Explicit BEGIN/COMMIT guard. Every fallible handler path constructs the
/// scope before any early return so that dropping it without a commit
/// issues ROLLBACK.
pub struct TransactionScope<'conn> {
    conn: &'conn Connection,
    context: &'static str,
    running: bool,
}

impl TransactionScope<'_> {
    pub fn begin(&mut self) -> Result<()> {
        anyhow::ensure!(!self.running, "transaction ({}) already running", self.context);
        self.conn
            .execute_batch("BEGIN")
            .with_context(|| format!("failed to begin transaction ({})", self.context))?;
        self.running = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        anyhow::ensure!(self.running, "transaction ({}) not running", self.context);
        self.conn
            .execute_batch("COMMIT")
            .with_context(|| format!("failed to commit transaction ({})", self.context))?;
        self.running = false;
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.running {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("failed to rollback transaction ({}): {}", self.context, err);
            }
        }
    }
}

/// Opens the database file (created if absent) in single-threaded mode and
/// validates or initializes its schema from `sql_dir`.
pub fn open_database(file: &str, sql_dir: &Path) -> Result<Connection> {
    tracing::info!("Database file: \"{}\"", file);

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(file, flags)
        .with_context(|| format!("failed to open database at \"{}\"", file))?;

    check_schema(&conn, sql_dir)?;
    Ok(conn)
}

fn pragma_int(conn: &Connection, name: &str) -> Result<i32> {
    conn.pragma_query_value(None, name, |row| row.get(0))
        .with_context(|| format!("failed to retrieve pragma {}", name))
}

fn exec_file(conn: &Connection, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read \"{}\"", path.display()))?;
    conn.execute_batch(&text)
        .with_context(|| format!("failed to execute \"{}\"", path.display()))
}

fn init_schema(conn: &Connection, sql_dir: &Path) -> Result<()> {
    conn.execute_batch("BEGIN")?;
    let result = (|| -> Result<()> {
        exec_file(conn, &sql_dir.join("schema.sql"))?;
        conn.pragma_update(None, "application_id", APPLICATION_ID)?;
        conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT").map_err(Into::into),
        Err(err) => {
            if let Err(rb) = conn.execute_batch("ROLLBACK") {
                tracing::error!("failed to rollback schema init: {}", rb);
            }
            Err(err)
        }
    }
}

fn upgrade_schema(conn: &Connection, sql_dir: &Path, user_version: i32) -> Result<i32> {
    let mut new_version = user_version;
    while sql_dir.join(format!("upgrade-{}.sql", new_version)).exists() {
        new_version += 1;
    }

    if new_version != user_version {
        tracing::info!("Upgrading database schema to version {}", new_version);
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<()> {
            for version in user_version..new_version {
                exec_file(conn, &sql_dir.join(format!("upgrade-{}.sql", version)))?;
            }
            conn.pragma_update(None, "user_version", new_version)?;
            Ok(())
        })();

        match result {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(err) => {
                if let Err(rb) = conn.execute_batch("ROLLBACK") {
                    tracing::error!("failed to rollback schema upgrade: {}", rb);
                }
                return Err(err);
            }
        }
    }

    Ok(new_version)
}

/// Validates the application id and user version, initializing a fresh
/// database and applying any pending `upgrade-N.sql` files.
pub fn check_schema(conn: &Connection, sql_dir: &Path) -> Result<()> {
    let application_id = pragma_int(conn, "application_id")?;
    let mut user_version = pragma_int(conn, "user_version")?;

    if application_id != APPLICATION_ID {
        if application_id != 0 {
            return Err(SchemaError::ApplicationIdMismatch {
                found: application_id,
            }
            .into());
        }
        if user_version != 0 {
            return Err(SchemaError::VersionWithoutApplicationId(user_version).into());
        }

        init_schema(conn, sql_dir).context("failed to initialize database schema")?;
        user_version = 1;
    }

    let user_version =
        upgrade_schema(conn, sql_dir, user_version).context("failed to upgrade database schema")?;
    tracing::info!("Database version: {}", user_version);
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory database with the full schema applied. The connection must
    /// outlive the `Db` built over it, so it is returned to the caller.
    pub fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../../sql/schema.sql"))
            .unwrap();
        conn
    }

    pub fn db(conn: &Connection) -> Db<'_> {
        Db::new(conn, 32, Clock::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("querymanager_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_fresh_database_is_initialized() {
        let dir = scratch_dir("schema_fresh");
        std::fs::write(dir.join("schema.sql"), "CREATE TABLE Worlds (WorldID INTEGER);").unwrap();

        let conn = Connection::open_in_memory().unwrap();
        check_schema(&conn, &dir).unwrap();

        assert_eq!(pragma_int(&conn, "application_id").unwrap(), APPLICATION_ID);
        assert_eq!(pragma_int(&conn, "user_version").unwrap(), 1);
        conn.execute_batch("SELECT * FROM Worlds").unwrap();

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_foreign_application_id_is_rejected() {
        let dir = scratch_dir("schema_foreign");
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "application_id", 0x12345678).unwrap();

        let err = check_schema(&conn, &dir).unwrap_err();
        assert!(err.to_string().contains("unknown application id"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_version_without_application_id_is_rejected() {
        let dir = scratch_dir("schema_badversion");
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 3).unwrap();

        assert!(check_schema(&conn, &dir).is_err());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_upgrades_apply_in_sequence() {
        let dir = scratch_dir("schema_upgrade");
        std::fs::write(dir.join("schema.sql"), "CREATE TABLE A (X INTEGER);").unwrap();
        std::fs::write(dir.join("upgrade-1.sql"), "CREATE TABLE B (Y INTEGER);").unwrap();
        std::fs::write(dir.join("upgrade-2.sql"), "CREATE TABLE C (Z INTEGER);").unwrap();

        let conn = Connection::open_in_memory().unwrap();
        check_schema(&conn, &dir).unwrap();

        assert_eq!(pragma_int(&conn, "user_version").unwrap(), 3);
        conn.execute_batch("SELECT * FROM A; SELECT * FROM B; SELECT * FROM C").unwrap();

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_transaction_scope_commits() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE T (A INTEGER)").unwrap();
        let db = Db::new(&conn, 4, Clock::new());

        let mut tx = db.transaction("Commit");
        tx.begin().unwrap();
        conn.execute_batch("INSERT INTO T (A) VALUES (1)").unwrap();
        tx.commit().unwrap();

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM T", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_dropped_scope_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE T (A INTEGER)").unwrap();
        let db = Db::new(&conn, 4, Clock::new());

        {
            let mut tx = db.transaction("Abandon");
            tx.begin().unwrap();
            conn.execute_batch("INSERT INTO T (A) VALUES (1)").unwrap();
            // no commit
        }

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM T", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_double_begin_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let db = Db::new(&conn, 4, Clock::new());

        let mut tx = db.transaction("Double");
        tx.begin().unwrap();
        assert!(tx.begin().is_err());
        tx.commit().unwrap();
    }

    #[test]
    fn test_commit_without_begin_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let db = Db::new(&conn, 4, Clock::new());

        let mut tx = db.transaction("Stray");
        assert!(tx.commit().is_err());
    }
}
