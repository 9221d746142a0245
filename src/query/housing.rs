//! Housing family handlers: auctions, transfers, evictions, owner records
//! and the bulk house upload.

use super::{game_world, HandlerResult, QueryContext};
use crate::codec::ReadBuffer;
use crate::database::house_db::{House, HouseEviction};
use crate::network::{Connection, STATUS_OK};

/// FINISH_AUCTIONS (33). Returns matured auctions while deleting them;
/// deliberately non-transactional, a crash in between loses that batch and
/// nothing else.
pub(super) fn process_finish_auctions(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let auctions = ctx.db.finish_house_auctions(world_id)?;
    conn.respond_with(STATUS_OK, |writer| {
        let count = auctions.len().min(u16::MAX as usize);
        writer.write_u16(count as u16);
        for auction in auctions.iter().take(count) {
            writer.write_u16(auction.house_id as u16);
            writer.write_u32(auction.bidder_id as u32);
            writer.write_string(&auction.bidder_name);
            writer.write_u32(auction.bid_amount as u32);
        }
    });
    Ok(())
}

/// TRANSFER_HOUSES (35). Same drain discipline as FINISH_AUCTIONS.
pub(super) fn process_transfer_houses(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let transfers = ctx.db.finish_house_transfers(world_id)?;
    conn.respond_with(STATUS_OK, |writer| {
        let count = transfers.len().min(u16::MAX as usize);
        writer.write_u16(count as u16);
        for transfer in transfers.iter().take(count) {
            writer.write_u16(transfer.house_id as u16);
            writer.write_u32(transfer.new_owner_id as u32);
            writer.write_string(&transfer.new_owner_name);
            writer.write_u32(transfer.price as u32);
        }
    });
    Ok(())
}

fn write_evictions(conn: &mut Connection, evictions: &[HouseEviction]) {
    conn.respond_with(STATUS_OK, |writer| {
        let count = evictions.len().min(u16::MAX as usize);
        writer.write_u16(count as u16);
        for eviction in evictions.iter().take(count) {
            writer.write_u16(eviction.house_id as u16);
            writer.write_u32(eviction.owner_id as u32);
        }
    });
}

/// EVICT_FREE_ACCOUNTS (36). Lists owners whose premium time ran out.
pub(super) fn process_evict_free_accounts(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let evictions = ctx.db.free_account_evictions(world_id)?;
    write_evictions(conn, &evictions);
    Ok(())
}

/// EVICT_DELETED_CHARACTERS (37). Lists owners that no longer exist.
pub(super) fn process_evict_deleted_characters(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let evictions = ctx.db.deleted_character_evictions(world_id)?;
    write_evictions(conn, &evictions);
    Ok(())
}

/// EVICT_EX_GUILDLEADERS (38), inverted: the client supplies guildhall
/// owner pairs and gets back the ones whose owner is no longer a guild
/// leader.
pub(super) fn process_evict_ex_guildleaders(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let num_pairs = reader.read_u16() as usize;
    let mut pairs = Vec::with_capacity(num_pairs);
    for _ in 0..num_pairs {
        let house_id = reader.read_u16() as i32;
        let owner_id = reader.read_u32() as i32;
        pairs.push(HouseEviction { house_id, owner_id });
    }

    let mut evictions = Vec::new();
    for pair in pairs {
        if !ctx.db.guild_leader_status(world_id, pair.owner_id)? {
            evictions.push(pair);
        }
    }

    write_evictions(conn, &evictions);
    Ok(())
}

/// INSERT_HOUSE_OWNER (39). Arguments: house id, owner id, paid-until.
pub(super) fn process_insert_house_owner(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let house_id = reader.read_u16() as i32;
    let owner_id = reader.read_u32() as i32;
    let paid_until = reader.read_u32() as i32;

    ctx.db
        .insert_house_owner(world_id, house_id, owner_id, paid_until)?;
    conn.send_ok();
    Ok(())
}

/// UPDATE_HOUSE_OWNER (40). Arguments as INSERT_HOUSE_OWNER; FAILED when
/// the house has no owner record.
pub(super) fn process_update_house_owner(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let house_id = reader.read_u16() as i32;
    let owner_id = reader.read_u32() as i32;
    let paid_until = reader.read_u32() as i32;

    if ctx
        .db
        .update_house_owner(world_id, house_id, owner_id, paid_until)?
    {
        conn.send_ok();
    } else {
        conn.send_failed();
    }
    Ok(())
}

/// DELETE_HOUSE_OWNER (41). Argument: house id.
pub(super) fn process_delete_house_owner(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let house_id = reader.read_u16() as i32;
    if ctx.db.delete_house_owner(world_id, house_id)? {
        conn.send_ok();
    } else {
        conn.send_failed();
    }
    Ok(())
}

/// GET_HOUSE_OWNERS (42).
pub(super) fn process_get_house_owners(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let owners = ctx.db.house_owners(world_id)?;
    conn.respond_with(STATUS_OK, |writer| {
        let count = owners.len().min(u16::MAX as usize);
        writer.write_u16(count as u16);
        for owner in owners.iter().take(count) {
            writer.write_u16(owner.house_id as u16);
            writer.write_u32(owner.owner_id as u32);
            writer.write_string(&owner.owner_name);
            writer.write_u32(owner.paid_until as u32);
        }
    });
    Ok(())
}

/// GET_AUCTIONS (43). Lists houses currently on auction.
pub(super) fn process_get_auctions(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let auctions = ctx.db.house_auctions(world_id)?;
    conn.respond_with(STATUS_OK, |writer| {
        let count = auctions.len().min(u16::MAX as usize);
        writer.write_u16(count as u16);
        for house_id in auctions.iter().take(count) {
            writer.write_u16(*house_id as u16);
        }
    });
    Ok(())
}

/// START_AUCTION (44). Argument: house id.
pub(super) fn process_start_auction(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let house_id = reader.read_u16() as i32;
    ctx.db.start_house_auction(world_id, house_id)?;
    conn.send_ok();
    Ok(())
}

/// INSERT_HOUSES (45). The world's house set is replaced wholesale:
/// delete everything, re-insert the submitted list, one transaction.
pub(super) fn process_insert_houses(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let num_houses = reader.read_u16() as usize;
    let mut houses = Vec::with_capacity(num_houses);
    for _ in 0..num_houses {
        houses.push(House {
            house_id: reader.read_u16() as i32,
            name: reader.read_string(),
            rent: reader.read_u32() as i32,
            description: reader.read_string(),
            size: reader.read_u16() as i32,
            position_x: reader.read_u16() as i32,
            position_y: reader.read_u16() as i32,
            position_z: reader.read_u8() as i32,
            town: reader.read_string(),
            guild_house: reader.read_flag(),
        });
    }

    let mut tx = ctx.db.transaction("InsertHouses");
    tx.begin()?;
    ctx.db.delete_houses(world_id)?;
    ctx.db.insert_houses(world_id, &houses)?;
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

/// EXCLUDE_FROM_AUCTIONS (51). Arguments: gamemaster id, character name,
/// address, reason, comment, exclusion duration in seconds, and a flag
/// requesting a companion banishment of the same duration.
pub(super) fn process_exclude_from_auctions(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let gamemaster_id = reader.read_u32() as i32;
    let character_name = reader.read_string();
    let ip_address = reader.read_u32();
    let reason = reader.read_string();
    let comment = reader.read_string();
    let duration = reader.read_u32() as i32;
    let banish = reader.read_flag();

    let mut tx = ctx.db.transaction("ExcludeFromAuctions");
    tx.begin()?;

    let Some(character_id) = ctx.db.character_id(world_id, &character_name)? else {
        conn.send_error(1);
        return Ok(());
    };
    if ctx.db.character_right(character_id, "NO_BANISHMENT")? {
        conn.send_error(2);
        return Ok(());
    }

    let mut banishment_id = 0;
    if banish {
        banishment_id = ctx
            .db
            .insert_banishment(
                character_id,
                ip_address,
                gamemaster_id,
                &reason,
                &comment,
                false,
                duration as i64,
            )?
            .unwrap_or(0);
    }

    if !ctx
        .db
        .exclude_from_auctions(world_id, character_id, duration, banishment_id)?
    {
        conn.send_failed();
        return Ok(());
    }
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

/// CANCEL_HOUSE_TRANSFER (52). Consumes no arguments and answers OK.
pub(super) fn process_cancel_house_transfer(
    _ctx: &mut QueryContext,
    conn: &mut Connection,
    _reader: &mut ReadBuffer,
) -> HandlerResult {
    if game_world(conn).is_none() {
        return Ok(());
    }
    conn.send_ok();
    Ok(())
}
