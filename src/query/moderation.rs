//! Moderation handlers: namelocks, banishments, notations, statement
//! reports and IP bans. Common error codes: 1 no such character, 2 a right
//! prohibits the action, 3 the record is already present, 4 approved
//! duplicate (namelocks only).

use super::{game_world, HandlerResult, QueryContext};
use crate::codec::ReadBuffer;
use crate::database::banish_db::{BanishmentStatus, Statement};
use crate::network::{Connection, STATUS_OK};

/// Characters holding this right cannot be targeted by moderation.
const PROTECTED_RIGHT: &str = "NO_BANISHMENT";

/// IP banishments run for a fixed 30 days.
const IP_BANISHMENT_DURATION: i64 = 30 * 86400;

/// Escalation law mapping prior account status and the requested ban to the
/// effective duration and final-warning flag. Days of 0 mean permanent.
///
/// - A standing final warning makes the new ban permanent and clears the
///   warning.
/// - More than five prior bans, or an explicitly requested final warning,
///   raises the duration to at least 30 days (doubling it when already
///   there) and sets the warning.
/// - Otherwise the request passes through unchanged.
pub(super) fn compound_banishment(
    status: &BanishmentStatus,
    final_warning: bool,
    days: i32,
) -> (bool, i32) {
    if status.final_warning {
        (false, 0)
    } else if status.times_banished > 5 || final_warning {
        if days < 30 {
            (true, 30)
        } else {
            (true, days * 2)
        }
    } else {
        (final_warning, days)
    }
}

/// SET_NAMELOCK (23). Arguments: gamemaster id, character name, address,
/// reason, comment.
pub(super) fn process_set_namelock(
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

    let mut tx = ctx.db.transaction("SetNamelock");
    tx.begin()?;

    let Some(character_id) = ctx.db.character_id(world_id, &character_name)? else {
        conn.send_error(1);
        return Ok(());
    };
    if ctx.db.character_right(character_id, PROTECTED_RIGHT)? {
        conn.send_error(2);
        return Ok(());
    }
    let status = ctx.db.namelock_status(character_id)?;
    if status.namelocked {
        conn.send_error(if status.approved { 4 } else { 3 });
        return Ok(());
    }

    ctx.db
        .insert_namelock(character_id, ip_address, gamemaster_id, &reason, &comment)?;
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

/// BANISH_ACCOUNT (25). Arguments: gamemaster id, character name, address,
/// reason, comment, final-warning flag, requested days. Replies with the
/// banishment id, the effective duration as one byte (0xFF permanent) and
/// the resulting final-warning flag.
pub(super) fn process_banish_account(
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
    let final_warning = reader.read_flag();
    let days = reader.read_u16() as i32;

    let mut tx = ctx.db.transaction("BanishAccount");
    tx.begin()?;

    let Some(character_id) = ctx.db.character_id(world_id, &character_name)? else {
        conn.send_error(1);
        return Ok(());
    };
    if ctx.db.character_right(character_id, PROTECTED_RIGHT)? {
        conn.send_error(2);
        return Ok(());
    }
    let status = ctx.db.banishment_status(character_id)?;
    if status.banished {
        conn.send_error(3);
        return Ok(());
    }

    let (final_warning, days) = compound_banishment(&status, final_warning, days);
    let duration = days as i64 * 86400;
    let Some(banishment_id) = ctx.db.insert_banishment(
        character_id,
        ip_address,
        gamemaster_id,
        &reason,
        &comment,
        final_warning,
        duration,
    )?
    else {
        conn.send_failed();
        return Ok(());
    };
    tx.commit()?;

    conn.respond_with(STATUS_OK, |writer| {
        writer.write_u32(banishment_id as u32);
        writer.write_u8(if days == 0 { 0xFF } else { days.min(0xFE) as u8 });
        writer.write_flag(final_warning);
    });
    Ok(())
}

/// SET_NOTATION (26). Arguments: gamemaster id, character name, address,
/// reason, comment.
pub(super) fn process_set_notation(
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

    let mut tx = ctx.db.transaction("SetNotation");
    tx.begin()?;

    let Some(character_id) = ctx.db.character_id(world_id, &character_name)? else {
        conn.send_error(1);
        return Ok(());
    };
    if ctx.db.character_right(character_id, PROTECTED_RIGHT)? {
        conn.send_error(2);
        return Ok(());
    }

    ctx.db
        .insert_notation(character_id, ip_address, gamemaster_id, &reason, &comment)?;
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

/// REPORT_STATEMENT (27). Arguments: reporter id, reported character id,
/// reason, comment, companion banishment id, reported statement id, then
/// the statement list giving the reported one its context. The designated
/// statement must be present and belong to the reported character.
pub(super) fn process_report_statement(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let reporter_id = reader.read_u32() as i32;
    let character_id = reader.read_u32() as i32;
    let reason = reader.read_string();
    let comment = reader.read_string();
    let banishment_id = reader.read_u32() as i32;
    let reported_statement_id = reader.read_u32() as i32;

    let num_statements = reader.read_u16() as usize;
    let mut statements = Vec::with_capacity(num_statements);
    for _ in 0..num_statements {
        statements.push(Statement {
            statement_id: reader.read_u32() as i32,
            timestamp: reader.read_u32() as i32,
            character_id: reader.read_u32() as i32,
            channel: reader.read_string(),
            text: reader.read_string(),
        });
    }

    let Some(reported) = statements
        .iter()
        .find(|statement| statement.statement_id == reported_statement_id)
        .cloned()
    else {
        tracing::error!(
            "Reported statement {} missing from statement list",
            reported_statement_id
        );
        conn.send_failed();
        return Ok(());
    };
    if reported.character_id != character_id {
        tracing::error!(
            "Reported statement {} does not belong to character {}",
            reported_statement_id,
            character_id
        );
        conn.send_failed();
        return Ok(());
    }

    let mut tx = ctx.db.transaction("ReportStatement");
    tx.begin()?;

    if ctx.db.is_statement_reported(world_id, &reported)? {
        conn.send_error(3);
        return Ok(());
    }

    ctx.db.insert_statements(world_id, &statements)?;
    ctx.db.insert_reported_statement(
        world_id,
        &reported,
        banishment_id,
        reporter_id,
        &reason,
        &comment,
    )?;
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

/// BANISH_IP_ADDRESS (28). Arguments: gamemaster id, character name,
/// address, reason, comment.
pub(super) fn process_banish_ip_address(
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

    let mut tx = ctx.db.transaction("BanishIpAddress");
    tx.begin()?;

    let Some(character_id) = ctx.db.character_id(world_id, &character_name)? else {
        conn.send_error(1);
        return Ok(());
    };
    if ctx.db.character_right(character_id, PROTECTED_RIGHT)? {
        conn.send_error(2);
        return Ok(());
    }
    if ctx.db.is_ip_banished(ip_address)? {
        conn.send_error(3);
        return Ok(());
    }

    ctx.db.insert_ip_banishment(
        character_id,
        ip_address,
        gamemaster_id,
        &reason,
        &comment,
        IP_BANISHMENT_DURATION,
    )?;
    tx.commit()?;

    conn.send_ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(times_banished: i32, final_warning: bool) -> BanishmentStatus {
        BanishmentStatus {
            times_banished,
            final_warning,
            banished: false,
        }
    }

    #[test]
    fn test_standing_final_warning_makes_permanent() {
        assert_eq!(compound_banishment(&status(1, true), false, 7), (false, 0));
        assert_eq!(compound_banishment(&status(9, true), true, 90), (false, 0));
    }

    #[test]
    fn test_repeat_offender_raises_to_thirty_days() {
        assert_eq!(compound_banishment(&status(6, false), false, 7), (true, 30));
    }

    #[test]
    fn test_repeat_offender_doubles_long_bans() {
        assert_eq!(compound_banishment(&status(6, false), false, 30), (true, 60));
        assert_eq!(compound_banishment(&status(6, false), false, 45), (true, 90));
    }

    #[test]
    fn test_requested_final_warning_escalates() {
        assert_eq!(compound_banishment(&status(0, false), true, 7), (true, 30));
        assert_eq!(compound_banishment(&status(0, false), true, 60), (true, 120));
    }

    #[test]
    fn test_plain_ban_passes_through() {
        assert_eq!(compound_banishment(&status(0, false), false, 7), (false, 7));
        assert_eq!(compound_banishment(&status(5, false), false, 30), (false, 30));
    }
}
