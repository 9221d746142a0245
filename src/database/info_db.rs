//! Info tables: kill statistics and the published online character list.

use super::Db;
use anyhow::Result;
use rusqlite::params;

#[derive(Debug, Clone, Default)]
pub struct KillStatistics {
    pub race_name: String,
    pub times_killed: i32,
    pub players_killed: i32,
}

#[derive(Debug, Clone, Default)]
pub struct OnlineCharacter {
    pub name: String,
    pub level: i32,
    pub profession: String,
}

impl Db<'_> {
    /// Upsert aggregation: existing counters grow by the submitted deltas.
    pub fn merge_kill_statistics(&mut self, world_id: i32, stats: &[KillStatistics]) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO KillStatistics (WorldID, RaceName, TimesKilled, PlayersKilled)\
             VALUES (?1, ?2, ?3, ?4)\
             ON CONFLICT DO UPDATE SET TimesKilled = TimesKilled + Excluded.TimesKilled,\
                 PlayersKilled = PlayersKilled + Excluded.PlayersKilled",
        )?;
        for entry in stats {
            stmt.execute(params![
                world_id,
                entry.race_name,
                entry.times_killed,
                entry.players_killed
            ])?;
        }
        Ok(())
    }

    pub fn delete_online_characters(&mut self, world_id: i32) -> Result<()> {
        let stmt = self.prepare("DELETE FROM OnlineCharacters WHERE WorldID = ?1")?;
        stmt.execute(params![world_id])?;
        Ok(())
    }

    pub fn insert_online_characters(
        &mut self,
        world_id: i32,
        characters: &[OnlineCharacter],
    ) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO OnlineCharacters (WorldID, Name, Level, Profession)\
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for character in characters {
            stmt.execute(params![
                world_id,
                character.name,
                character.level,
                character.profession
            ])?;
        }
        Ok(())
    }

    /// Bumps the world's online record when `num_characters` exceeds it.
    /// Returns whether a new record was set.
    pub fn check_online_record(&mut self, world_id: i32, num_characters: i32) -> Result<bool> {
        let stmt = self.prepare(
            "UPDATE Worlds SET OnlineRecord = ?2, OnlineRecordTimestamp = UNIXEPOCH()\
             WHERE WorldID = ?1 AND OnlineRecord < ?2",
        )?;
        Ok(stmt.execute(params![world_id, num_characters])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{db, memory_db};

    #[test]
    fn test_kill_statistics_accumulate() {
        let conn = memory_db();
        conn.execute_batch("INSERT INTO Worlds (WorldID, Name) VALUES (1, 'Alpha')")
            .unwrap();
        let mut db = db(&conn);

        db.merge_kill_statistics(
            1,
            &[KillStatistics {
                race_name: "dragon".into(),
                times_killed: 3,
                players_killed: 1,
            }],
        )
        .unwrap();
        db.merge_kill_statistics(
            1,
            &[
                KillStatistics {
                    race_name: "dragon".into(),
                    times_killed: 2,
                    players_killed: 4,
                },
                KillStatistics {
                    race_name: "troll".into(),
                    times_killed: 50,
                    players_killed: 0,
                },
            ],
        )
        .unwrap();

        let (times, players): (i32, i32) = conn
            .query_row(
                "SELECT TimesKilled, PlayersKilled FROM KillStatistics \
                 WHERE WorldID = 1 AND RaceName = 'dragon'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(times, 5);
        assert_eq!(players, 5);
    }

    #[test]
    fn test_online_list_replacement() {
        let conn = memory_db();
        conn.execute_batch("INSERT INTO Worlds (WorldID, Name) VALUES (1, 'Alpha')")
            .unwrap();
        let mut db = db(&conn);

        db.insert_online_characters(
            1,
            &[OnlineCharacter {
                name: "Old".into(),
                level: 10,
                profession: "None".into(),
            }],
        )
        .unwrap();
        db.delete_online_characters(1).unwrap();
        db.insert_online_characters(
            1,
            &[
                OnlineCharacter {
                    name: "Hero".into(),
                    level: 52,
                    profession: "Knight".into(),
                },
                OnlineCharacter {
                    name: "Mage".into(),
                    level: 40,
                    profession: "Sorcerer".into(),
                },
            ],
        )
        .unwrap();

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM OnlineCharacters WHERE WorldID = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(n, 2);
        let gone: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM OnlineCharacters WHERE Name = 'Old'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(gone, 0);
    }

    #[test]
    fn test_online_record_only_moves_up() {
        let conn = memory_db();
        conn.execute_batch("INSERT INTO Worlds (WorldID, Name, OnlineRecord) VALUES (1, 'Alpha', 100)")
            .unwrap();
        let mut db = db(&conn);

        assert!(!db.check_online_record(1, 80).unwrap());
        assert!(!db.check_online_record(1, 100).unwrap());
        assert!(db.check_online_record(1, 137).unwrap());

        let record: i32 = conn
            .query_row("SELECT OnlineRecord FROM Worlds WHERE WorldID = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(record, 137);
    }
}
