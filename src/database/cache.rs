//! Prepared-statement cache.
//!
//! Fixed-capacity LRU over persistent prepared statements, keyed by an
//! FNV1a-32 fingerprint of the SQL text. The fingerprint only narrows the
//! scan; the full text comparison is the authority, so a hash collision
//! degrades to a miss instead of executing the wrong statement. The victim
//! on insert is the entry with the minimum last-used timestamp.
//!
//! A statement that is not reset after use keeps an implicit read
//! transaction open and pins an old view of the database, hiding changes
//! made by other processes. Callers drain or drop their row cursors before
//! returning, which resets the statement; bindings are cleared here on
//! every cache hit.

use crate::core::Clock;
use anyhow::Result;
use rusqlite::{Connection, Statement};

/// FNV1a 32-bit fingerprint of the statement text.
pub fn hash_text(text: &str) -> u32 {
    let mut hash: u32 = 0x811C9DC5;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

struct CachedStatement<'conn> {
    stmt: Statement<'conn>,
    sql: String,
    hash: u32,
    last_used: i64,
}

pub struct StmtCache<'conn> {
    conn: &'conn Connection,
    entries: Vec<Option<CachedStatement<'conn>>>,
    clock: Clock,
}

impl<'conn> StmtCache<'conn> {
    pub fn new(conn: &'conn Connection, capacity: usize, clock: Clock) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            conn,
            entries,
            clock,
        }
    }

    /// Returns the cached statement for `sql`, preparing and inserting it
    /// on a miss. Hits refresh the last-used timestamp and clear previous
    /// bindings.
    pub fn prepare(&mut self, sql: &str) -> Result<&mut Statement<'conn>> {
        let now = self.clock.monotonic_ms();
        let hash = hash_text(sql);

        let mut hit: Option<usize> = None;
        let mut lru_index = 0;
        let mut lru_time = i64::MAX;
        for (i, slot) in self.entries.iter().enumerate() {
            match slot {
                Some(entry) => {
                    if entry.last_used < lru_time {
                        lru_index = i;
                        lru_time = entry.last_used;
                    }
                    if entry.hash == hash && entry.sql == sql {
                        hit = Some(i);
                        break;
                    }
                }
                None => {
                    if lru_time > 0 {
                        lru_index = i;
                        lru_time = 0;
                    }
                }
            }
        }

        let index = match hit {
            Some(i) => {
                let entry = self.entries[i].as_mut().unwrap();
                entry.last_used = now;
                entry.stmt.clear_bindings();
                i
            }
            None => {
                let stmt = self.conn.prepare(sql)?;
                // Dropping the previous occupant finalizes its handle.
                self.entries[lru_index] = Some(CachedStatement {
                    stmt,
                    sql: sql.to_string(),
                    hash,
                    last_used: now,
                });
                lru_index
            }
        };

        Ok(&mut self.entries[index].as_mut().unwrap().stmt)
    }

    #[cfg(test)]
    fn contains(&self, sql: &str) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|entry| entry.sql == sql)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE T (A INTEGER, B TEXT)")
            .unwrap();
        conn
    }

    #[test]
    fn test_fnv1a_reference_values() {
        // Reference values for the 32-bit FNV1a parameters.
        assert_eq!(hash_text(""), 0x811C9DC5);
        assert_eq!(hash_text("a"), 0xE40C292C);
        assert_eq!(hash_text("foobar"), 0xBF9CF968);
    }

    #[test]
    fn test_statements_execute_through_cache() {
        let conn = test_conn();
        let mut cache = StmtCache::new(&conn, 4, Clock::new());

        let stmt = cache.prepare("INSERT INTO T (A, B) VALUES (?1, ?2)").unwrap();
        stmt.execute(rusqlite::params![7, "seven"]).unwrap();

        let stmt = cache.prepare("SELECT B FROM T WHERE A = ?1").unwrap();
        let b: String = stmt
            .query_row(rusqlite::params![7], |row| row.get(0))
            .unwrap();
        assert_eq!(b, "seven");
    }

    #[test]
    fn test_hit_reuses_entry() {
        let conn = test_conn();
        let mut cache = StmtCache::new(&conn, 4, Clock::new());

        cache.prepare("SELECT A FROM T").unwrap();
        cache.prepare("SELECT A FROM T").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_full_cache_evicts_least_recently_used() {
        let conn = test_conn();
        let mut cache = StmtCache::new(&conn, 2, Clock::new());

        cache.prepare("SELECT 1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.prepare("SELECT 2").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        // Touch "SELECT 1" so "SELECT 2" becomes the LRU victim.
        cache.prepare("SELECT 1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.prepare("SELECT 3").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("SELECT 1"));
        assert!(!cache.contains("SELECT 2"));
        assert!(cache.contains("SELECT 3"));
    }

    #[test]
    fn test_hit_clears_stale_bindings() {
        let conn = test_conn();
        conn.execute_batch(
            "INSERT INTO T (A, B) VALUES (1, 'one');
             INSERT INTO T (A, B) VALUES (2, 'two')",
        )
        .unwrap();
        let mut cache = StmtCache::new(&conn, 4, Clock::new());

        let sql = "SELECT COUNT(*) FROM T WHERE A = COALESCE(?1, A)";
        let stmt = cache.prepare(sql).unwrap();
        let n: i64 = stmt
            .query_row(rusqlite::params![1], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);

        // With the binding cleared, ?1 is NULL again and every row matches.
        // raw_query skips the parameter-count check that query_row does.
        let stmt = cache.prepare(sql).unwrap();
        let mut rows = stmt.raw_query();
        let n: i64 = rows.next().unwrap().unwrap().get(0).unwrap();
        assert_eq!(n, 2);
    }
}
