//! House lifecycle: houses, owners, auctions, transfers, evictions.

use super::Db;
use anyhow::Result;
use rusqlite::params;

#[derive(Debug, Clone, Default)]
pub struct HouseAuction {
    pub house_id: i32,
    pub bidder_id: i32,
    pub bidder_name: String,
    pub bid_amount: i32,
    pub finish_time: i32,
}

#[derive(Debug, Clone, Default)]
pub struct HouseTransfer {
    pub house_id: i32,
    pub new_owner_id: i32,
    pub new_owner_name: String,
    pub price: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HouseEviction {
    pub house_id: i32,
    pub owner_id: i32,
}

#[derive(Debug, Clone, Default)]
pub struct HouseOwner {
    pub house_id: i32,
    pub owner_id: i32,
    pub owner_name: String,
    pub paid_until: i32,
}

#[derive(Debug, Clone, Default)]
pub struct House {
    pub house_id: i32,
    pub name: String,
    pub rent: i32,
    pub description: String,
    pub size: i32,
    pub position_x: i32,
    pub position_y: i32,
    pub position_z: i32,
    pub town: String,
    pub guild_house: bool,
}

impl Db<'_> {
    /// Drains matured auctions. The rows are gone once this returns; a
    /// crash before the caller acts on them loses that batch with no other
    /// side effects, which is the accepted tradeoff.
    pub fn finish_house_auctions(&mut self, world_id: i32) -> Result<Vec<HouseAuction>> {
        let stmt = self.prepare(
            "DELETE FROM HouseAuctions \
             WHERE WorldID = ?1 AND FinishTime IS NOT NULL AND FinishTime <= UNIXEPOCH()\
             RETURNING HouseID, BidderID, BidAmount, FinishTime,\
                 (SELECT Name FROM Characters WHERE CharacterID = BidderID)",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(HouseAuction {
                house_id: row.get(0)?,
                bidder_id: row.get(1)?,
                bid_amount: row.get(2)?,
                finish_time: row.get(3)?,
                bidder_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?;

        let mut auctions = Vec::new();
        for row in rows {
            auctions.push(row?);
        }
        Ok(auctions)
    }

    /// Same drain discipline as `finish_house_auctions`, for transfers.
    pub fn finish_house_transfers(&mut self, world_id: i32) -> Result<Vec<HouseTransfer>> {
        let stmt = self.prepare(
            "DELETE FROM HouseTransfers \
             WHERE WorldID = ?1 AND FinishTime <= UNIXEPOCH()\
             RETURNING HouseID, NewOwnerID, Price,\
                 (SELECT Name FROM Characters WHERE CharacterID = NewOwnerID)",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(HouseTransfer {
                house_id: row.get(0)?,
                new_owner_id: row.get(1)?,
                price: row.get(2)?,
                new_owner_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;

        let mut transfers = Vec::new();
        for row in rows {
            transfers.push(row?);
        }
        Ok(transfers)
    }

    /// Owners whose account has no premium time left.
    pub fn free_account_evictions(&mut self, world_id: i32) -> Result<Vec<HouseEviction>> {
        let stmt = self.prepare(
            "SELECT O.HouseID, O.OwnerID \
             FROM HouseOwners AS O \
             LEFT JOIN Characters AS C ON C.CharacterID = O.OwnerID \
             LEFT JOIN Accounts AS A ON A.AccountID = C.AccountID \
             WHERE O.WorldID = ?1 \
                 AND (A.PremiumEnd IS NULL OR A.PremiumEnd < UNIXEPOCH())",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(HouseEviction {
                house_id: row.get(0)?,
                owner_id: row.get(1)?,
            })
        })?;

        let mut evictions = Vec::new();
        for row in rows {
            evictions.push(row?);
        }
        Ok(evictions)
    }

    /// Owners whose character no longer exists or is soft-deleted.
    pub fn deleted_character_evictions(&mut self, world_id: i32) -> Result<Vec<HouseEviction>> {
        let stmt = self.prepare(
            "SELECT O.HouseID, O.OwnerID \
             FROM HouseOwners AS O \
             LEFT JOIN Characters AS C ON C.CharacterID = O.OwnerID \
             WHERE O.WorldID = ?1 \
                 AND (C.CharacterID IS NULL OR C.Deleted != 0)",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(HouseEviction {
                house_id: row.get(0)?,
                owner_id: row.get(1)?,
            })
        })?;

        let mut evictions = Vec::new();
        for row in rows {
            evictions.push(row?);
        }
        Ok(evictions)
    }

    pub fn insert_house_owner(
        &mut self,
        world_id: i32,
        house_id: i32,
        owner_id: i32,
        paid_until: i32,
    ) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO HouseOwners (WorldID, HouseID, OwnerID, PaidUntil)\
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![world_id, house_id, owner_id, paid_until])?;
        Ok(())
    }

    pub fn update_house_owner(
        &mut self,
        world_id: i32,
        house_id: i32,
        owner_id: i32,
        paid_until: i32,
    ) -> Result<bool> {
        let stmt = self.prepare(
            "UPDATE HouseOwners SET OwnerID = ?3, PaidUntil = ?4 \
             WHERE WorldID = ?1 AND HouseID = ?2",
        )?;
        Ok(stmt.execute(params![world_id, house_id, owner_id, paid_until])? > 0)
    }

    pub fn delete_house_owner(&mut self, world_id: i32, house_id: i32) -> Result<bool> {
        let stmt = self.prepare("DELETE FROM HouseOwners WHERE WorldID = ?1 AND HouseID = ?2")?;
        Ok(stmt.execute(params![world_id, house_id])? > 0)
    }

    pub fn house_owners(&mut self, world_id: i32) -> Result<Vec<HouseOwner>> {
        let stmt = self.prepare(
            "SELECT O.HouseID, O.OwnerID, C.Name, O.PaidUntil \
             FROM HouseOwners AS O \
             LEFT JOIN Characters AS C ON C.CharacterID = O.OwnerID \
             WHERE O.WorldID = ?1",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(HouseOwner {
                house_id: row.get(0)?,
                owner_id: row.get(1)?,
                owner_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                paid_until: row.get(3)?,
            })
        })?;

        let mut owners = Vec::new();
        for row in rows {
            owners.push(row?);
        }
        Ok(owners)
    }

    pub fn house_auctions(&mut self, world_id: i32) -> Result<Vec<i32>> {
        let stmt = self.prepare("SELECT HouseID FROM HouseAuctions WHERE WorldID = ?1")?;
        let rows = stmt.query_map(params![world_id], |row| row.get(0))?;

        let mut auctions = Vec::new();
        for row in rows {
            auctions.push(row?);
        }
        Ok(auctions)
    }

    pub fn start_house_auction(&mut self, world_id: i32, house_id: i32) -> Result<()> {
        let stmt = self.prepare("INSERT INTO HouseAuctions (WorldID, HouseID) VALUES (?1, ?2)")?;
        stmt.execute(params![world_id, house_id])?;
        Ok(())
    }

    pub fn delete_houses(&mut self, world_id: i32) -> Result<()> {
        let stmt = self.prepare("DELETE FROM Houses WHERE WorldID = ?1")?;
        stmt.execute(params![world_id])?;
        Ok(())
    }

    pub fn insert_houses(&mut self, world_id: i32, houses: &[House]) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO Houses (WorldID, HouseID, Name, Rent, Description,\
                 Size, PositionX, PositionY, PositionZ, Town, GuildHouse)\
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for house in houses {
            stmt.execute(params![
                world_id,
                house.house_id,
                house.name,
                house.rent,
                house.description,
                house.size,
                house.position_x,
                house.position_y,
                house.position_z,
                house.town,
                house.guild_house as i32
            ])?;
        }
        Ok(())
    }

    pub fn exclude_from_auctions(
        &mut self,
        world_id: i32,
        character_id: i32,
        duration: i32,
        banishment_id: i32,
    ) -> Result<bool> {
        let stmt = self.prepare(
            "INSERT INTO HouseAuctionExclusions (CharacterID, Issued, Until, BanishmentID)\
             SELECT ?2, UNIXEPOCH(), (UNIXEPOCH() + ?3), ?4 FROM Characters \
                 WHERE WorldID = ?1 AND CharacterID = ?2",
        )?;
        Ok(stmt.execute(params![world_id, character_id, duration, banishment_id])? > 0)
    }
}
