//! Account table operations: account data, premium days, login attempts.

use super::Db;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};

/// Premium time is stored as an end timestamp; partial days left count as a
/// full day.
pub fn round_seconds_to_days(seconds: i64) -> i32 {
    ((seconds + 86399) / 86400) as i32
}

#[derive(Debug, Clone, Default)]
pub struct Account {
    pub account_id: i32,
    pub email: String,
    /// 64-byte auth blob; empty or wrong-sized blobs never verify.
    pub auth: Vec<u8>,
    pub premium_days: i32,
    pub pending_premium_days: i32,
    pub deleted: bool,
}

/// One row of the character list sent back on an account login. The host
/// name still needs resolving.
#[derive(Debug, Clone, Default)]
pub struct CharacterEndpoint {
    pub name: String,
    pub world_name: String,
    pub world_host: String,
    pub world_port: i32,
}

impl Db<'_> {
    pub fn account(&mut self, account_id: i32) -> Result<Option<Account>> {
        let stmt = self.prepare(
            "SELECT AccountID, Email, Auth,\
                 MAX(PremiumEnd - UNIXEPOCH(), 0), PendingPremiumDays, Deleted \
             FROM Accounts WHERE AccountID = ?1",
        )?;
        let account = stmt
            .query_row(params![account_id], |row| {
                Ok(Account {
                    account_id: row.get(0)?,
                    email: row.get(1)?,
                    auth: row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
                    premium_days: round_seconds_to_days(row.get(3)?),
                    pending_premium_days: row.get(4)?,
                    deleted: row.get::<_, i32>(5)? != 0,
                })
            })
            .optional()?;
        Ok(account)
    }

    /// Folds pending premium days into the premium end timestamp. A no-op
    /// when there is nothing pending.
    pub fn activate_pending_premium_days(&mut self, account_id: i32) -> Result<()> {
        let stmt = self.prepare(
            "UPDATE Accounts \
             SET PremiumEnd = MAX(PremiumEnd, UNIXEPOCH()) + PendingPremiumDays * 86400,\
                 PendingPremiumDays = 0 \
             WHERE AccountID = ?1 AND PendingPremiumDays > 0",
        )?;
        stmt.execute(params![account_id])?;
        Ok(())
    }

    /// Number of the account's characters currently flagged online, across
    /// all worlds. Drives the multi-client check.
    pub fn account_online_characters(&mut self, account_id: i32) -> Result<i32> {
        let stmt = self.prepare(
            "SELECT COUNT(*) FROM Characters WHERE AccountID = ?1 AND IsOnline != 0",
        )?;
        let count = stmt.query_row(params![account_id], |row| row.get(0))?;
        Ok(count)
    }

    pub fn character_endpoints(&mut self, account_id: i32) -> Result<Vec<CharacterEndpoint>> {
        let stmt = self.prepare(
            "SELECT C.Name, W.Name, W.Host, W.Port \
             FROM Characters AS C \
             INNER JOIN Worlds AS W ON W.WorldID = C.WorldID \
             WHERE C.AccountID = ?1",
        )?;
        let rows = stmt.query_map(params![account_id], |row| {
            Ok(CharacterEndpoint {
                name: row.get(0)?,
                world_name: row.get(1)?,
                world_host: row.get(2)?,
                world_port: row.get(3)?,
            })
        })?;

        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(row?);
        }
        Ok(endpoints)
    }

    /// Login attempts are the audit trail behind the rate limits. They are
    /// inserted outside any handler transaction so a rolled-back login
    /// still leaves its attempt row behind.
    pub fn insert_login_attempt(&mut self, account_id: i32, ip_address: u32, failed: bool) -> Result<()> {
        let stmt = self.prepare(
            "INSERT INTO LoginAttempts (AccountID, IPAddress, Timestamp, Failed)\
             VALUES (?1, ?2, UNIXEPOCH(), ?3)",
        )?;
        stmt.execute(params![account_id, ip_address, failed as i32])?;
        Ok(())
    }

    pub fn failed_account_attempts(&mut self, account_id: i32, window_seconds: i64) -> Result<i32> {
        let stmt = self.prepare(
            "SELECT COUNT(*) FROM LoginAttempts \
             WHERE AccountID = ?1 AND Timestamp >= (UNIXEPOCH() - ?2) AND Failed != 0",
        )?;
        let count = stmt.query_row(params![account_id, window_seconds], |row| row.get(0))?;
        Ok(count)
    }

    pub fn failed_address_attempts(&mut self, ip_address: u32, window_seconds: i64) -> Result<i32> {
        let stmt = self.prepare(
            "SELECT COUNT(*) FROM LoginAttempts \
             WHERE IPAddress = ?1 AND Timestamp >= (UNIXEPOCH() - ?2) AND Failed != 0",
        )?;
        let count = stmt.query_row(params![ip_address, window_seconds], |row| row.get(0))?;
        Ok(count)
    }
}
