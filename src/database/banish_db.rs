//! Disciplinary records: banishments, namelocks, notations, IP bans and
//! reported statements. `Until = Issued` encodes permanence throughout.

use super::Db;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, Copy, Default)]
pub struct NamelockStatus {
    pub namelocked: bool,
    pub approved: bool,
}

/// Aggregate of an account's banishment history, keyed through one of its
/// characters. Feeds the compound-banishment escalation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BanishmentStatus {
    pub times_banished: i32,
    pub final_warning: bool,
    pub banished: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub statement_id: i32,
    pub timestamp: i32,
    pub character_id: i32,
    pub channel: String,
    pub text: String,
}

impl Db<'_> {
    pub fn namelock_status(&mut self, character_id: i32) -> Result<NamelockStatus> {
        let stmt = self.prepare("SELECT Approved FROM Namelocks WHERE CharacterID = ?1")?;
        let approved: Option<i32> = stmt
            .query_row(params![character_id], |row| row.get(0))
            .optional()?;

        Ok(NamelockStatus {
            namelocked: approved.is_some(),
            approved: approved.unwrap_or(0) != 0,
        })
    }

    pub fn insert_namelock(
        &mut self,
        character_id: i32,
        ip_address: u32,
        gamemaster_id: i32,
        reason: &str,
        comment: &str,
    ) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO Namelocks (CharacterID, IPAddress, GamemasterID, Reason, Comment)\
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![character_id, ip_address, gamemaster_id, reason, comment])?;
        Ok(())
    }

    pub fn is_account_banished(&mut self, account_id: i32) -> Result<bool> {
        let stmt = self.prepare(
            "SELECT 1 FROM Banishments \
             WHERE AccountID = ?1 AND (Until = Issued OR Until > UNIXEPOCH())",
        )?;
        let row: Option<i32> = stmt
            .query_row(params![account_id], |row| row.get(0))
            .optional()?;
        Ok(row.is_some())
    }

    pub fn banishment_status(&mut self, character_id: i32) -> Result<BanishmentStatus> {
        let stmt = self.prepare(
            "SELECT B.FinalWarning, (B.Until = B.Issued OR B.Until > UNIXEPOCH())\
             FROM Banishments AS B \
             LEFT JOIN Characters AS C ON C.AccountID = B.AccountID \
             WHERE C.CharacterID = ?1",
        )?;
        let rows = stmt.query_map(params![character_id], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i32>(1)?))
        })?;

        let mut status = BanishmentStatus::default();
        for row in rows {
            let (final_warning, active) = row?;
            status.times_banished += 1;
            if final_warning != 0 {
                status.final_warning = true;
            }
            if active != 0 {
                status.banished = true;
            }
        }
        Ok(status)
    }

    /// Inserts a banishment for the character's account, returning the new
    /// banishment id, or `None` when the character does not exist. A zero
    /// duration makes the ban permanent.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_banishment(
        &mut self,
        character_id: i32,
        ip_address: u32,
        gamemaster_id: i32,
        reason: &str,
        comment: &str,
        final_warning: bool,
        duration: i64,
    ) -> Result<Option<i32>> {
        let stmt = self.prepare(
            "INSERT INTO Banishments (AccountID, IPAddress, GamemasterID,\
                 Reason, Comment, FinalWarning, Issued, Until)\
             SELECT AccountID, ?2, ?3, ?4, ?5, ?6, UNIXEPOCH(), UNIXEPOCH() + ?7 \
                 FROM Characters WHERE CharacterID = ?1 \
             RETURNING BanishmentID",
        )?;
        let banishment_id = stmt
            .query_row(
                params![
                    character_id,
                    ip_address,
                    gamemaster_id,
                    reason,
                    comment,
                    final_warning as i32,
                    duration
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(banishment_id)
    }

    pub fn insert_notation(
        &mut self,
        character_id: i32,
        ip_address: u32,
        gamemaster_id: i32,
        reason: &str,
        comment: &str,
    ) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO Notations (CharacterID, IPAddress, GamemasterID, Reason, Comment)\
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![character_id, ip_address, gamemaster_id, reason, comment])?;
        Ok(())
    }

    pub fn is_ip_banished(&mut self, ip_address: u32) -> Result<bool> {
        let stmt = self.prepare(
            "SELECT 1 FROM IPBanishments \
             WHERE IPAddress = ?1 AND (Until = Issued OR Until > UNIXEPOCH())",
        )?;
        let row: Option<i32> = stmt
            .query_row(params![ip_address], |row| row.get(0))
            .optional()?;
        Ok(row.is_some())
    }

    pub fn insert_ip_banishment(
        &mut self,
        character_id: i32,
        ip_address: u32,
        gamemaster_id: i32,
        reason: &str,
        comment: &str,
        duration: i64,
    ) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO IPBanishments (CharacterID, IPAddress,\
                 GamemasterID, Reason, Comment, Issued, Until)\
             VALUES (?1, ?2, ?3, ?4, ?5, UNIXEPOCH(), UNIXEPOCH() + ?6)",
        )?;
        stmt.execute(params![
            character_id,
            ip_address,
            gamemaster_id,
            reason,
            comment,
            duration
        ])?;
        Ok(())
    }

    pub fn is_statement_reported(&mut self, world_id: i32, statement: &Statement) -> Result<bool> {
        let stmt = self.prepare(
            "SELECT 1 FROM ReportedStatements \
             WHERE WorldID = ?1 AND Timestamp = ?2 AND StatementID = ?3",
        )?;
        let row: Option<i32> = stmt
            .query_row(
                params![world_id, statement.timestamp, statement.statement_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Different reports may carry the same statements for context, so
    /// duplicates are resolved with IGNORE. Statements without an id are
    /// skipped with a warning.
    pub fn insert_statements(&mut self, world_id: i32, statements: &[Statement]) -> Result<()> {
        let stmt = self.prepare(
            "INSERT OR IGNORE INTO Statements (WorldID, Timestamp,\
                 StatementID, CharacterID, Channel, Text)\
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for statement in statements {
            if statement.statement_id == 0 {
                tracing::warn!("skipping statement without id");
                continue;
            }
            stmt.execute(params![
                world_id,
                statement.timestamp,
                statement.statement_id,
                statement.character_id,
                statement.channel,
                statement.text
            ])?;
        }
        Ok(())
    }

    pub fn insert_reported_statement(
        &mut self,
        world_id: i32,
        statement: &Statement,
        banishment_id: i32,
        reporter_id: i32,
        reason: &str,
        comment: &str,
    ) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO ReportedStatements (WorldID, Timestamp,\
                 StatementID, CharacterID, BanishmentID, ReporterID, Reason, Comment)\
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            world_id,
            statement.timestamp,
            statement.statement_id,
            statement.character_id,
            banishment_id,
            reporter_id,
            reason,
            comment
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{db, memory_db};

    fn seed(conn: &rusqlite::Connection) {
        conn.execute_batch(
            "INSERT INTO Worlds (WorldID, Name) VALUES (1, 'Alpha');\
             INSERT INTO Accounts (AccountID, Email) VALUES (10, 'a@b.c');\
             INSERT INTO Characters (CharacterID, WorldID, AccountID, Name) VALUES (100, 1, 10, 'Hero')",
        )
        .unwrap();
    }

    #[test]
    fn test_namelock_status_states() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        let status = db.namelock_status(100).unwrap();
        assert!(!status.namelocked);

        db.insert_namelock(100, 0x7F000001, 5, "bad name", "").unwrap();
        let status = db.namelock_status(100).unwrap();
        assert!(status.namelocked);
        assert!(!status.approved);

        conn.execute_batch("UPDATE Namelocks SET Approved = 1").unwrap();
        let status = db.namelock_status(100).unwrap();
        assert!(status.namelocked);
        assert!(status.approved);
    }

    #[test]
    fn test_expired_banishment_is_not_active() {
        let conn = memory_db();
        seed(&conn);
        conn.execute_batch(
            "INSERT INTO Banishments (AccountID, Issued, Until)\
             VALUES (10, UNIXEPOCH() - 100, UNIXEPOCH() - 10)",
        )
        .unwrap();
        let mut db = db(&conn);

        assert!(!db.is_account_banished(10).unwrap());
        let status = db.banishment_status(100).unwrap();
        assert_eq!(status.times_banished, 1);
        assert!(!status.banished);
    }

    #[test]
    fn test_until_equals_issued_is_permanent() {
        let conn = memory_db();
        seed(&conn);
        conn.execute_batch(
            "INSERT INTO Banishments (AccountID, Issued, Until)\
             VALUES (10, UNIXEPOCH() - 100000, UNIXEPOCH() - 100000)",
        )
        .unwrap();
        let mut db = db(&conn);

        assert!(db.is_account_banished(10).unwrap());
    }

    #[test]
    fn test_insert_banishment_returns_id() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        let id = db
            .insert_banishment(100, 0x7F000001, 5, "macro", "", true, 30 * 86400)
            .unwrap();
        assert!(id.is_some());

        let status = db.banishment_status(100).unwrap();
        assert_eq!(status.times_banished, 1);
        assert!(status.final_warning);
        assert!(status.banished);

        // No such character: no row, no id.
        let id = db
            .insert_banishment(999, 0, 0, "", "", false, 0)
            .unwrap();
        assert!(id.is_none());
    }

    #[test]
    fn test_ip_banishment_round_trip() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        assert!(!db.is_ip_banished(0x0A000001).unwrap());
        db.insert_ip_banishment(100, 0x0A000001, 5, "proxy", "", 3600)
            .unwrap();
        assert!(db.is_ip_banished(0x0A000001).unwrap());
        assert!(!db.is_ip_banished(0x0A000002).unwrap());
    }

    #[test]
    fn test_statement_insertion_skips_zero_ids_and_duplicates() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        let statements = vec![
            Statement {
                statement_id: 1,
                timestamp: 1000,
                character_id: 100,
                channel: "Game-Chat".into(),
                text: "hello".into(),
            },
            Statement {
                statement_id: 0,
                timestamp: 1000,
                character_id: 100,
                ..Default::default()
            },
        ];
        db.insert_statements(1, &statements).unwrap();
        db.insert_statements(1, &statements).unwrap();

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM Statements", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_reported_statement_round_trip() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        let statement = Statement {
            statement_id: 7,
            timestamp: 1000,
            character_id: 100,
            channel: "Game-Chat".into(),
            text: "spam".into(),
        };
        assert!(!db.is_statement_reported(1, &statement).unwrap());
        db.insert_reported_statement(1, &statement, 0, 5, "spamming", "")
            .unwrap();
        assert!(db.is_statement_reported(1, &statement).unwrap());
    }
}
