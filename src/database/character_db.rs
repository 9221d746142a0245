//! Character table operations: identity, rights, buddies, online counters.
//!
//! A character is uniquely identified by its id; the world id carried on
//! every write only prevents a world from mutating a character that lives
//! on another world.

use super::Db;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, Default)]
pub struct CharacterLoginData {
    pub world_id: i32,
    pub character_id: i32,
    pub account_id: i32,
    pub name: String,
    pub sex: i32,
    pub guild: String,
    pub rank: String,
    pub title: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Buddy {
    pub character_id: i32,
    pub name: String,
}

impl Db<'_> {
    pub fn character_id(&mut self, world_id: i32, character_name: &str) -> Result<Option<i32>> {
        let stmt = self.prepare(
            "SELECT CharacterID FROM Characters WHERE WorldID = ?1 AND Name = ?2",
        )?;
        let id = stmt
            .query_row(params![world_id, character_name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// Character names are unique across the fleet, so game logins look the
    /// character up by name alone and check the world afterwards.
    pub fn character_login_data(
        &mut self,
        character_name: &str,
    ) -> Result<Option<CharacterLoginData>> {
        let stmt = self.prepare(
            "SELECT WorldID, CharacterID, AccountID, Name, Sex, Guild, Rank, Title, Deleted \
             FROM Characters WHERE Name = ?1",
        )?;
        let character = stmt
            .query_row(params![character_name], |row| {
                Ok(CharacterLoginData {
                    world_id: row.get(0)?,
                    character_id: row.get(1)?,
                    account_id: row.get(2)?,
                    name: row.get(3)?,
                    sex: row.get(4)?,
                    guild: row.get(5)?,
                    rank: row.get(6)?,
                    title: row.get(7)?,
                    deleted: row.get::<_, i32>(8)? != 0,
                })
            })
            .optional()?;
        Ok(character)
    }

    pub fn character_right(&mut self, character_id: i32, right: &str) -> Result<bool> {
        let stmt = self.prepare(
            "SELECT 1 FROM CharacterRights WHERE CharacterID = ?1 AND \"Right\" = ?2",
        )?;
        let row: Option<i32> = stmt
            .query_row(params![character_id, right], |row| row.get(0))
            .optional()?;
        Ok(row.is_some())
    }

    pub fn character_rights(&mut self, character_id: i32) -> Result<Vec<String>> {
        let stmt =
            self.prepare("SELECT \"Right\" FROM CharacterRights WHERE CharacterID = ?1")?;
        let rows = stmt.query_map(params![character_id], |row| row.get(0))?;

        let mut rights = Vec::new();
        for row in rows {
            rights.push(row?);
        }
        Ok(rights)
    }

    pub fn guild_leader_status(&mut self, world_id: i32, character_id: i32) -> Result<bool> {
        let stmt = self.prepare(
            "SELECT Guild, Rank FROM Characters WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        let row: Option<(String, String)> = stmt
            .query_row(params![world_id, character_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        Ok(match row {
            Some((guild, rank)) => !guild.is_empty() && rank.eq_ignore_ascii_case("Leader"),
            None => false,
        })
    }

    pub fn world_invitation(&mut self, world_id: i32, character_id: i32) -> Result<bool> {
        let stmt = self.prepare(
            "SELECT 1 FROM WorldInvitations WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        let row: Option<i32> = stmt
            .query_row(params![world_id, character_id], |row| row.get(0))
            .optional()?;
        Ok(row.is_some())
    }

    pub fn increment_is_online(&mut self, world_id: i32, character_id: i32) -> Result<bool> {
        let stmt = self.prepare(
            "UPDATE Characters SET IsOnline = IsOnline + 1 \
             WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        Ok(stmt.execute(params![world_id, character_id])? > 0)
    }

    pub fn decrement_is_online(&mut self, world_id: i32, character_id: i32) -> Result<bool> {
        let stmt = self.prepare(
            "UPDATE Characters SET IsOnline = IsOnline - 1 \
             WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        Ok(stmt.execute(params![world_id, character_id])? > 0)
    }

    /// Current value of the online reference counter. Correctly paired
    /// logins and logouts keep it non-negative; callers log when it dips.
    pub fn is_online_count(&mut self, character_id: i32) -> Result<i32> {
        let stmt = self.prepare("SELECT IsOnline FROM Characters WHERE CharacterID = ?1")?;
        let count = stmt
            .query_row(params![character_id], |row| row.get(0))
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Zeroes every online counter of a world, returning how many
    /// characters were affected.
    pub fn clear_is_online(&mut self, world_id: i32) -> Result<usize> {
        let stmt = self.prepare(
            "UPDATE Characters SET IsOnline = 0 WHERE WorldID = ?1 AND IsOnline != 0",
        )?;
        Ok(stmt.execute(params![world_id])?)
    }

    /// Writes everything a logout persists in one UPDATE, including the
    /// online counter decrement.
    #[allow(clippy::too_many_arguments)]
    pub fn logout_character(
        &mut self,
        world_id: i32,
        character_id: i32,
        level: i32,
        profession: &str,
        residence: &str,
        last_login_time: i32,
        tutor_activities: i32,
    ) -> Result<bool> {
        let stmt = self.prepare(
            "UPDATE Characters \
             SET Level = ?3, Profession = ?4, Residence = ?5,\
                 LastLoginTime = ?6, TutorActivities = ?7, IsOnline = IsOnline - 1 \
             WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        let changed = stmt.execute(params![
            world_id,
            character_id,
            level,
            profession,
            residence,
            last_login_time,
            tutor_activities
        ])?;
        Ok(changed > 0)
    }

    /// Ascending id/name index slice used to seed game-server name caches.
    pub fn character_index_entries(
        &mut self,
        world_id: i32,
        minimum_character_id: i32,
        max_entries: usize,
    ) -> Result<Vec<(i32, String)>> {
        let stmt = self.prepare(
            "SELECT CharacterID, Name FROM Characters \
             WHERE WorldID = ?1 AND CharacterID >= ?2 \
             ORDER BY CharacterID ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![world_id, minimum_character_id, max_entries as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_character_death(
        &mut self,
        world_id: i32,
        character_id: i32,
        level: i32,
        offender_id: i32,
        remark: &str,
        unjustified: bool,
        timestamp: i32,
    ) -> Result<bool> {
        // Insert-select keeps the world guard in the statement itself.
        let stmt = self.prepare(
            "INSERT INTO CharacterDeaths (CharacterID, Level, OffenderID,\
                 Remark, Unjustified, Timestamp)\
             SELECT ?2, ?3, ?4, ?5, ?6, ?7 FROM Characters \
                 WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        let changed = stmt.execute(params![
            world_id,
            character_id,
            level,
            offender_id,
            remark,
            unjustified as i32,
            timestamp
        ])?;
        Ok(changed > 0)
    }

    /// Duplicate buddies and buddy ids from other worlds degrade to no-ops
    /// that still read as successful insertions.
    pub fn insert_buddy(&mut self, world_id: i32, account_id: i32, buddy_id: i32) -> Result<()> {
        let stmt = self.prepare(
            "INSERT OR IGNORE INTO Buddies (WorldID, AccountID, BuddyID)\
             SELECT ?1, ?2, ?3 FROM Characters \
                 WHERE WorldID = ?1 AND CharacterID = ?3",
        )?;
        stmt.execute(params![world_id, account_id, buddy_id])?;
        Ok(())
    }

    pub fn delete_buddy(&mut self, world_id: i32, account_id: i32, buddy_id: i32) -> Result<()> {
        let stmt = self.prepare(
            "DELETE FROM Buddies WHERE WorldID = ?1 AND AccountID = ?2 AND BuddyID = ?3",
        )?;
        stmt.execute(params![world_id, account_id, buddy_id])?;
        Ok(())
    }

    pub fn buddies(&mut self, world_id: i32, account_id: i32) -> Result<Vec<Buddy>> {
        let stmt = self.prepare(
            "SELECT B.BuddyID, C.Name \
             FROM Buddies AS B \
             INNER JOIN Characters AS C \
                 ON C.WorldID = B.WorldID AND C.CharacterID = B.BuddyID \
             WHERE B.WorldID = ?1 AND B.AccountID = ?2",
        )?;
        let rows = stmt.query_map(params![world_id, account_id], |row| {
            Ok(Buddy {
                character_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        let mut buddies = Vec::new();
        for row in rows {
            buddies.push(row?);
        }
        Ok(buddies)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::test_support::{db, memory_db};

    fn seed(conn: &rusqlite::Connection) {
        conn.execute_batch(
            "INSERT INTO Worlds (WorldID, Name) VALUES (1, 'Alpha');\
             INSERT INTO Worlds (WorldID, Name) VALUES (2, 'Beta');\
             INSERT INTO Accounts (AccountID, Email) VALUES (10, 'a@b.c');\
             INSERT INTO Characters (CharacterID, WorldID, AccountID, Name, Guild, Rank)\
                 VALUES (100, 1, 10, 'Hero', 'Watch', 'Leader');\
             INSERT INTO Characters (CharacterID, WorldID, AccountID, Name)\
                 VALUES (200, 2, 10, 'Drifter')",
        )
        .unwrap();
    }

    #[test]
    fn test_character_id_is_world_scoped() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        assert_eq!(db.character_id(1, "Hero").unwrap(), Some(100));
        assert_eq!(db.character_id(2, "Hero").unwrap(), None);
    }

    #[test]
    fn test_online_counter_is_world_guarded() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        assert!(db.increment_is_online(1, 100).unwrap());
        assert!(db.increment_is_online(1, 100).unwrap());
        assert_eq!(db.is_online_count(100).unwrap(), 2);

        // Wrong world must not touch the counter.
        assert!(!db.decrement_is_online(2, 100).unwrap());
        assert_eq!(db.is_online_count(100).unwrap(), 2);

        assert!(db.decrement_is_online(1, 100).unwrap());
        assert_eq!(db.is_online_count(100).unwrap(), 1);
    }

    #[test]
    fn test_clear_is_online_counts_affected() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        db.increment_is_online(1, 100).unwrap();
        db.increment_is_online(2, 200).unwrap();

        assert_eq!(db.clear_is_online(1).unwrap(), 1);
        assert_eq!(db.is_online_count(100).unwrap(), 0);
        // Other worlds untouched.
        assert_eq!(db.is_online_count(200).unwrap(), 1);
    }

    #[test]
    fn test_logout_writes_everything_at_once() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);
        db.increment_is_online(1, 100).unwrap();

        assert!(db
            .logout_character(1, 100, 52, "Knight", "Carlin", 1234, 7)
            .unwrap());

        let (level, profession, residence, last_login, tutor, online): (i32, String, String, i32, i32, i32) = conn
            .query_row(
                "SELECT Level, Profession, Residence, LastLoginTime, TutorActivities, IsOnline \
                 FROM Characters WHERE CharacterID = 100",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .unwrap();
        assert_eq!(level, 52);
        assert_eq!(profession, "Knight");
        assert_eq!(residence, "Carlin");
        assert_eq!(last_login, 1234);
        assert_eq!(tutor, 7);
        assert_eq!(online, 0);
    }

    #[test]
    fn test_rights_membership() {
        let conn = memory_db();
        seed(&conn);
        conn.execute_batch(
            "INSERT INTO CharacterRights (CharacterID, \"Right\") VALUES (100, 'ALLOW_MULTICLIENT')",
        )
        .unwrap();
        let mut db = db(&conn);

        assert!(db.character_right(100, "ALLOW_MULTICLIENT").unwrap());
        assert!(!db.character_right(100, "NO_BANISHMENT").unwrap());
        assert_eq!(db.character_rights(100).unwrap(), vec!["ALLOW_MULTICLIENT"]);
        assert!(db.character_rights(200).unwrap().is_empty());
    }

    #[test]
    fn test_guild_leader_status_is_case_insensitive() {
        let conn = memory_db();
        seed(&conn);
        conn.execute_batch("UPDATE Characters SET Rank = 'LEADER' WHERE CharacterID = 100")
            .unwrap();
        let mut db = db(&conn);

        assert!(db.guild_leader_status(1, 100).unwrap());
        // No guild means no leadership regardless of rank.
        assert!(!db.guild_leader_status(2, 200).unwrap());
    }

    #[test]
    fn test_buddy_round_trip() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        db.insert_buddy(1, 10, 100).unwrap();
        db.insert_buddy(1, 10, 100).unwrap(); // duplicate ignored
        db.insert_buddy(1, 10, 200).unwrap(); // wrong world, filtered by the insert-select

        let buddies = db.buddies(1, 10).unwrap();
        assert_eq!(buddies.len(), 1);
        assert_eq!(buddies[0].character_id, 100);
        assert_eq!(buddies[0].name, "Hero");

        db.delete_buddy(1, 10, 100).unwrap();
        assert!(db.buddies(1, 10).unwrap().is_empty());
    }

    #[test]
    fn test_character_index_entries_sorted_and_bounded() {
        let conn = memory_db();
        seed(&conn);
        conn.execute_batch(
            "INSERT INTO Characters (CharacterID, WorldID, AccountID, Name) VALUES (101, 1, 10, 'Second');\
             INSERT INTO Characters (CharacterID, WorldID, AccountID, Name) VALUES (102, 1, 10, 'Third')",
        )
        .unwrap();
        let mut db = db(&conn);

        let entries = db.character_index_entries(1, 101, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (101, "Second".to_string()));
        assert_eq!(entries[1], (102, "Third".to_string()));

        let entries = db.character_index_entries(1, 0, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 100);
    }

    #[test]
    fn test_character_death_requires_matching_world() {
        let conn = memory_db();
        seed(&conn);
        let mut db = db(&conn);

        assert!(db
            .insert_character_death(1, 100, 50, 200, "slain", true, 1000)
            .unwrap());
        assert!(!db
            .insert_character_death(2, 100, 50, 200, "slain", true, 1000)
            .unwrap());

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM CharacterDeaths", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }
}
