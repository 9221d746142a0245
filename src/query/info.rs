//! Per-world info handlers: online bookkeeping, player lists, statistics,
//! buddies, deaths, and the world configuration a game server boots from.

use super::{game_world, HandlerResult, QueryContext};
use crate::codec::ReadBuffer;
use crate::database::info_db::{KillStatistics, OnlineCharacter};
use crate::network::{Connection, STATUS_OK};

/// Hard cap on a LOAD_PLAYERS reply.
const MAX_CHARACTER_INDEX_ENTRIES: usize = 10_000;

/// Player-count sentinel on CREATE_PLAYERLIST meaning no entries follow.
const PLAYERLIST_OFFLINE_SENTINEL: u16 = 0xFFFF;

/// LOG_CHARACTER_DEATH (29). Arguments: character id, level, offender id,
/// remark, unjustified flag, timestamp.
pub(super) fn process_log_character_death(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let character_id = reader.read_u32() as i32;
    let level = reader.read_u16() as i32;
    let offender_id = reader.read_u32() as i32;
    let remark = reader.read_string();
    let unjustified = reader.read_flag();
    let timestamp = reader.read_u32() as i32;

    if ctx.db.insert_character_death(
        world_id,
        character_id,
        level,
        offender_id,
        &remark,
        unjustified,
        timestamp,
    )? {
        conn.send_ok();
    } else {
        conn.send_failed();
    }
    Ok(())
}

/// ADD_BUDDY (30). Arguments: account id, buddy character id.
pub(super) fn process_add_buddy(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let account_id = reader.read_u32() as i32;
    let buddy_id = reader.read_u32() as i32;
    ctx.db.insert_buddy(world_id, account_id, buddy_id)?;
    conn.send_ok();
    Ok(())
}

/// REMOVE_BUDDY (31). Arguments: account id, buddy character id.
pub(super) fn process_remove_buddy(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let account_id = reader.read_u32() as i32;
    let buddy_id = reader.read_u32() as i32;
    ctx.db.delete_buddy(world_id, account_id, buddy_id)?;
    conn.send_ok();
    Ok(())
}

/// DECREMENT_IS_ONLINE (32). Argument: character id. A counter that dips
/// below zero is tolerated but logged.
pub(super) fn process_decrement_is_online(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let character_id = reader.read_u32() as i32;
    if !ctx.db.decrement_is_online(world_id, character_id)? {
        conn.send_failed();
        return Ok(());
    }

    let is_online = ctx.db.is_online_count(character_id)?;
    if is_online < 0 {
        tracing::warn!(
            "Character {} has negative online counter {}",
            character_id,
            is_online
        );
    }

    conn.send_ok();
    Ok(())
}

/// CLEAR_IS_ONLINE (46). Resets every online counter of the bound world
/// and reports how many characters were affected.
pub(super) fn process_clear_is_online(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let affected = ctx.db.clear_is_online(world_id)?;
    conn.respond_with(STATUS_OK, |writer| {
        writer.write_u32(affected.min(u32::MAX as usize) as u32);
    });
    Ok(())
}

/// CREATE_PLAYERLIST (47). Atomically replaces the world's published
/// online list and bumps the online record when exceeded; the reply flag
/// says whether a new record was set. A count of 0xFFFF carries no entries
/// and only clears the list.
pub(super) fn process_create_playerlist(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let num_characters = reader.read_u16();
    let mut characters = Vec::new();
    if num_characters != PLAYERLIST_OFFLINE_SENTINEL {
        characters.reserve(num_characters as usize);
        for _ in 0..num_characters {
            characters.push(OnlineCharacter {
                name: reader.read_string(),
                level: reader.read_u16() as i32,
                profession: reader.read_string(),
            });
        }
    }

    let mut tx = ctx.db.transaction("CreatePlayerlist");
    tx.begin()?;
    ctx.db.delete_online_characters(world_id)?;
    ctx.db.insert_online_characters(world_id, &characters)?;
    let new_record = if num_characters != PLAYERLIST_OFFLINE_SENTINEL {
        ctx.db.check_online_record(world_id, characters.len() as i32)?
    } else {
        false
    };
    tx.commit()?;

    conn.respond_with(STATUS_OK, |writer| writer.write_flag(new_record));
    Ok(())
}

/// LOG_KILLED_CREATURES (48). Merges per-race kill counters into the
/// world's statistics.
pub(super) fn process_log_killed_creatures(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let num_stats = reader.read_u16() as usize;
    let mut stats = Vec::with_capacity(num_stats);
    for _ in 0..num_stats {
        stats.push(KillStatistics {
            race_name: reader.read_string(),
            times_killed: reader.read_u32() as i32,
            players_killed: reader.read_u32() as i32,
        });
    }

    let mut tx = ctx.db.transaction("LogKilledCreatures");
    tx.begin()?;
    ctx.db.merge_kill_statistics(world_id, &stats)?;
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

/// LOAD_PLAYERS (50). Argument: minimum character id. Returns up to 10 000
/// (id, name) entries in ascending id order.
pub(super) fn process_load_players(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let minimum_character_id = reader.read_u32() as i32;
    let entries = ctx.db.character_index_entries(
        world_id,
        minimum_character_id,
        MAX_CHARACTER_INDEX_ENTRIES,
    )?;

    conn.respond_with(STATUS_OK, |writer| {
        writer.write_u16(entries.len() as u16);
        for (character_id, name) in &entries {
            writer.write_u32(*character_id as u32);
            writer.write_string(name);
        }
    });
    Ok(())
}

/// LOAD_WORLD_CONFIG (53). Returns the bound world's parameters; the host
/// name is resolved through the host cache and sent big-endian.
pub(super) fn process_load_world_config(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let Some(config) = ctx.db.world_config(world_id)? else {
        tracing::error!("No world config for world {}", world_id);
        conn.send_failed();
        return Ok(());
    };
    let Some(address) = ctx.hosts.resolve(&config.host) else {
        tracing::error!(
            "Failed to resolve world {} host name \"{}\"",
            world_id,
            config.host
        );
        conn.send_failed();
        return Ok(());
    };

    conn.respond_with(STATUS_OK, |writer| {
        writer.write_u8(config.world_type as u8);
        writer.write_u8(config.reboot_time as u8);
        writer.write_u32_be(address);
        writer.write_u16(config.port as u16);
        writer.write_u16(config.max_players as u16);
        writer.write_u16(config.premium_player_buffer as u16);
        writer.write_u16(config.max_newbies as u16);
        writer.write_u16(config.premium_newbie_buffer as u16);
    });
    Ok(())
}
