//! World table operations.

use super::Db;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};

/// Connection parameters a game server needs to come up. The host name is
/// returned unresolved; the caller runs it through the host cache.
#[derive(Debug, Clone, Default)]
pub struct WorldConfig {
    pub world_type: i32,
    pub reboot_time: i32,
    pub host: String,
    pub port: i32,
    pub max_players: i32,
    pub premium_player_buffer: i32,
    pub max_newbies: i32,
    pub premium_newbie_buffer: i32,
}

impl Db<'_> {
    /// Looks up a world by display name. World names are unique.
    pub fn world_id(&mut self, world_name: &str) -> Result<Option<i32>> {
        let stmt = self.prepare("SELECT WorldID FROM Worlds WHERE Name = ?1")?;
        let id = stmt
            .query_row(params![world_name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    pub fn world_config(&mut self, world_id: i32) -> Result<Option<WorldConfig>> {
        let stmt = self.prepare(
            "SELECT Type, RebootTime, Host, Port, MaxPlayers,\
                 PremiumPlayerBuffer, MaxNewbies, PremiumNewbieBuffer \
             FROM Worlds WHERE WorldID = ?1",
        )?;
        let config = stmt
            .query_row(params![world_id], |row| {
                Ok(WorldConfig {
                    world_type: row.get(0)?,
                    reboot_time: row.get(1)?,
                    host: row.get(2)?,
                    port: row.get(3)?,
                    max_players: row.get(4)?,
                    premium_player_buffer: row.get(5)?,
                    max_newbies: row.get(6)?,
                    premium_newbie_buffer: row.get(7)?,
                })
            })
            .optional()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::test_support::{db, memory_db};

    #[test]
    fn test_world_id_lookup() {
        let conn = memory_db();
        conn.execute_batch(
            "INSERT INTO Worlds (WorldID, Name, Host, Port) VALUES (7, 'Alpha', 'alpha.local', 7172)",
        )
        .unwrap();
        let mut db = db(&conn);

        assert_eq!(db.world_id("Alpha").unwrap(), Some(7));
        assert_eq!(db.world_id("Beta").unwrap(), None);
    }

    #[test]
    fn test_world_config_round_trip() {
        let conn = memory_db();
        conn.execute_batch(
            "INSERT INTO Worlds (WorldID, Name, Type, RebootTime, Host, Port,\
                 MaxPlayers, PremiumPlayerBuffer, MaxNewbies, PremiumNewbieBuffer)\
             VALUES (1, 'Alpha', 2, 5, 'alpha.local', 7172, 900, 100, 300, 50)",
        )
        .unwrap();
        let mut db = db(&conn);

        let config = db.world_config(1).unwrap().unwrap();
        assert_eq!(config.world_type, 2);
        assert_eq!(config.reboot_time, 5);
        assert_eq!(config.host, "alpha.local");
        assert_eq!(config.port, 7172);
        assert_eq!(config.max_players, 900);
        assert_eq!(config.premium_player_buffer, 100);
        assert_eq!(config.max_newbies, 300);
        assert_eq!(config.premium_newbie_buffer, 50);

        assert!(db.world_config(9).unwrap().is_none());
    }
}
