//! Connection login plus the account/game login and logout handlers.

use super::{game_world, HandlerResult, QueryContext};
use crate::codec::{ReadBuffer, WriteBuffer};
use crate::network::crypt;
use crate::network::{ApplicationType, Connection};

/// Failed attempts per account tolerated inside a 5 minute window.
const ACCOUNT_ATTEMPT_LIMIT: i32 = 10;
const ACCOUNT_ATTEMPT_WINDOW: i64 = 5 * 60;
/// Failed attempts per address tolerated inside a 30 minute window.
const ADDRESS_ATTEMPT_LIMIT: i32 = 15;
const ADDRESS_ATTEMPT_WINDOW: i64 = 30 * 60;

/// LOGIN (0), the only query an unauthorized connection may send.
/// Arguments: application type, password, and for GAME the world name the
/// connection binds to. An unknown world or wrong password answers FAILED.
pub(super) fn process_login(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let application_type = reader.read_u8();
    let password = reader.read_string();
    let world_name = if application_type == 1 {
        reader.read_string()
    } else {
        String::new()
    };

    if !crypt::constant_time_eq(ctx.password.as_bytes(), password.as_bytes()) {
        tracing::warn!("Invalid login attempt from {}", conn.remote_address);
        conn.send_failed();
        return Ok(());
    }

    let Some(application_type) = ApplicationType::from_wire(application_type) else {
        tracing::warn!(
            "Unknown application type {} from {}",
            application_type,
            conn.remote_address
        );
        conn.send_failed();
        return Ok(());
    };

    let mut world_id = 0;
    if application_type == ApplicationType::Game {
        match ctx.db.world_id(&world_name)? {
            Some(id) => world_id = id,
            None => {
                tracing::warn!(
                    "Connection {} attempted to bind unknown world \"{}\"",
                    conn.remote_address,
                    world_name
                );
                conn.send_failed();
                return Ok(());
            }
        }
    }

    tracing::info!("Connection {} AUTHORIZED", conn.remote_address);
    conn.authorized = true;
    conn.application_type = Some(application_type);
    conn.world_id = world_id;
    conn.send_ok();
    Ok(())
}

enum AccountLoginOutcome {
    Ok {
        premium_days: i32,
        endpoints: Vec<(String, String, u32, u16)>,
    },
    Error(u8),
}

/// LOGIN_ACCOUNT (11), issued by the login gateway. Arguments: account id,
/// password, client address. One SELECT-only transaction; the attempt row
/// is inserted after the scope ends so it survives the rollback.
pub(super) fn process_login_account(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    if !matches!(
        conn.application_type,
        Some(ApplicationType::Login) | Some(ApplicationType::Web)
    ) {
        conn.send_failed();
        return Ok(());
    }

    let account_id = reader.read_u32() as i32;
    let password = reader.read_string();
    let ip_address = reader.read_u32();

    let outcome = login_account(ctx, account_id, &password, ip_address);

    let failed = !matches!(&outcome, Ok(AccountLoginOutcome::Ok { .. }));
    if let Err(err) = ctx.db.insert_login_attempt(account_id, ip_address, failed) {
        tracing::error!("Failed to insert login attempt: {:#}", err);
    }

    match outcome? {
        AccountLoginOutcome::Error(code) => conn.send_error(code),
        AccountLoginOutcome::Ok {
            premium_days,
            endpoints,
        } => conn.respond_with(crate::network::STATUS_OK, |writer| {
            let count = endpoints.len().min(u16::MAX as usize);
            writer.write_u16(count as u16);
            for (name, world_name, address, port) in endpoints.iter().take(count) {
                writer.write_string(name);
                writer.write_string(world_name);
                writer.write_u32_be(*address);
                writer.write_u16(*port);
            }
            writer.write_u16(premium_days.clamp(0, u16::MAX as i32) as u16);
        }),
    }
    Ok(())
}

fn login_account(
    ctx: &mut QueryContext,
    account_id: i32,
    password: &str,
    ip_address: u32,
) -> anyhow::Result<AccountLoginOutcome> {
    use AccountLoginOutcome::Error;

    let mut tx = ctx.db.transaction("LoginAccount");
    tx.begin()?;

    let Some(account) = ctx.db.account(account_id)? else {
        return Ok(Error(1));
    };
    if account.deleted {
        return Ok(Error(1));
    }
    if !crypt::test_password(&account.auth, password) {
        return Ok(Error(2));
    }
    if ctx.db.failed_account_attempts(account_id, ACCOUNT_ATTEMPT_WINDOW)? >= ACCOUNT_ATTEMPT_LIMIT
    {
        return Ok(Error(3));
    }
    if ctx.db.failed_address_attempts(ip_address, ADDRESS_ATTEMPT_WINDOW)? >= ADDRESS_ATTEMPT_LIMIT
    {
        return Ok(Error(4));
    }
    if ctx.db.is_account_banished(account_id)? {
        return Ok(Error(5));
    }
    if ctx.db.is_ip_banished(ip_address)? {
        return Ok(Error(6));
    }

    let mut endpoints = Vec::new();
    for endpoint in ctx.db.character_endpoints(account_id)? {
        let Some(address) = ctx.hosts.resolve(&endpoint.world_host) else {
            tracing::error!(
                "Failed to resolve world \"{}\" host name \"{}\" for character \"{}\"",
                endpoint.world_name,
                endpoint.world_host,
                endpoint.name
            );
            continue;
        };
        endpoints.push((
            endpoint.name,
            endpoint.world_name,
            address,
            endpoint.world_port as u16,
        ));
    }

    tx.commit()?;
    Ok(AccountLoginOutcome::Ok {
        premium_days: account.premium_days,
        endpoints,
    })
}

struct GameLoginData {
    character_id: i32,
    name: String,
    sex: i32,
    guild: String,
    rank: String,
    title: String,
    premium_days: i32,
    premium_activated: bool,
    buddies: Vec<(i32, String)>,
    rights: Vec<String>,
}

enum GameLoginOutcome {
    Ok(Box<GameLoginData>),
    Error(u8),
}

/// LOGIN_GAME (20). Arguments: account id, character name, password,
/// client address. Result code 5 is intentionally absent from the domain.
pub(super) fn process_login_game(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let account_id = reader.read_u32() as i32;
    let character_name = reader.read_string();
    let password = reader.read_string();
    let ip_address = reader.read_u32();

    let outcome = login_game(ctx, world_id, account_id, &character_name, &password, ip_address);

    let failed = !matches!(&outcome, Ok(GameLoginOutcome::Ok(_)));
    if let Err(err) = ctx.db.insert_login_attempt(account_id, ip_address, failed) {
        tracing::error!("Failed to insert login attempt: {:#}", err);
    }

    match outcome? {
        GameLoginOutcome::Error(code) => conn.send_error(code),
        GameLoginOutcome::Ok(data) => conn.respond_with(crate::network::STATUS_OK, |writer| {
            write_game_login_data(writer, &data);
        }),
    }
    Ok(())
}

fn write_game_login_data(writer: &mut WriteBuffer, data: &GameLoginData) {
    writer.write_u32(data.character_id as u32);
    writer.write_string(&data.name);
    writer.write_u8(data.sex as u8);
    writer.write_string(&data.guild);
    writer.write_string(&data.rank);
    writer.write_string(&data.title);
    writer.write_u16(data.premium_days.clamp(0, u16::MAX as i32) as u16);
    writer.write_flag(data.premium_activated);

    let num_buddies = data.buddies.len().min(u16::MAX as usize);
    writer.write_u16(num_buddies as u16);
    for (buddy_id, buddy_name) in data.buddies.iter().take(num_buddies) {
        writer.write_u32(*buddy_id as u32);
        writer.write_string(buddy_name);
    }

    let num_rights = data.rights.len().min(u16::MAX as usize);
    writer.write_u16(num_rights as u16);
    for right in data.rights.iter().take(num_rights) {
        writer.write_string(right);
    }
}

fn login_game(
    ctx: &mut QueryContext,
    world_id: i32,
    account_id: i32,
    character_name: &str,
    password: &str,
    ip_address: u32,
) -> anyhow::Result<GameLoginOutcome> {
    use GameLoginOutcome::Error;

    let mut tx = ctx.db.transaction("LoginGame");
    tx.begin()?;

    let Some(character) = ctx.db.character_login_data(character_name)? else {
        return Ok(Error(1));
    };
    if character.deleted {
        return Ok(Error(2));
    }
    if character.world_id != world_id {
        return Ok(Error(3));
    }
    if character.account_id != account_id {
        return Ok(Error(15));
    }

    let account = match ctx.db.account(account_id)? {
        Some(account) if !account.deleted => account,
        _ => return Ok(Error(8)),
    };
    if !crypt::test_password(&account.auth, password) {
        return Ok(Error(6));
    }
    if ctx.db.failed_account_attempts(account_id, ACCOUNT_ATTEMPT_WINDOW)? >= ACCOUNT_ATTEMPT_LIMIT
    {
        return Ok(Error(7));
    }
    if ctx.db.failed_address_attempts(ip_address, ADDRESS_ATTEMPT_WINDOW)? >= ADDRESS_ATTEMPT_LIMIT
    {
        return Ok(Error(9));
    }
    if ctx.db.is_account_banished(account_id)? {
        return Ok(Error(10));
    }
    let namelock = ctx.db.namelock_status(character.character_id)?;
    if namelock.namelocked && !namelock.approved {
        return Ok(Error(11));
    }
    if ctx.db.is_ip_banished(ip_address)? {
        return Ok(Error(12));
    }

    let world = ctx.db.world_config(world_id)?.unwrap_or_default();
    if world.world_type == super::WORLD_TYPE_PRIVATE
        && !ctx.db.world_invitation(world_id, character.character_id)?
    {
        return Ok(Error(4));
    }
    if world.world_type == super::WORLD_TYPE_GAMEMASTER
        && !ctx.db.character_right(character.character_id, "GAMEMASTER")?
    {
        return Ok(Error(14));
    }
    if ctx.db.account_online_characters(account_id)? > 0
        && !ctx
            .db
            .character_right(character.character_id, "ALLOW_MULTICLIENT")?
    {
        return Ok(Error(13));
    }

    let mut premium_days = account.premium_days;
    let mut premium_activated = false;
    if account.premium_days == 0 && account.pending_premium_days > 0 {
        ctx.db.activate_pending_premium_days(account_id)?;
        premium_days = account.pending_premium_days;
        premium_activated = true;
    }

    ctx.db.increment_is_online(world_id, character.character_id)?;

    let buddies = ctx
        .db
        .buddies(world_id, account_id)?
        .into_iter()
        .map(|buddy| (buddy.character_id, buddy.name))
        .collect();
    let rights = ctx.db.character_rights(character.character_id)?;

    tx.commit()?;
    Ok(GameLoginOutcome::Ok(Box::new(GameLoginData {
        character_id: character.character_id,
        name: character.name,
        sex: character.sex,
        guild: character.guild,
        rank: character.rank,
        title: character.title,
        premium_days,
        premium_activated,
        buddies,
        rights,
    })))
}

/// LOGOUT_GAME (21). Arguments: character id, level, profession, residence,
/// last login time, tutor activities. One UPDATE carries every field plus
/// the online-counter decrement.
pub(super) fn process_logout_game(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    let Some(world_id) = game_world(conn) else {
        return Ok(());
    };

    let character_id = reader.read_u32() as i32;
    let level = reader.read_u16() as i32;
    let profession = reader.read_string();
    let residence = reader.read_string();
    let last_login_time = reader.read_u32() as i32;
    let tutor_activities = reader.read_u16() as i32;

    let mut tx = ctx.db.transaction("LogoutGame");
    tx.begin()?;
    let updated = ctx.db.logout_character(
        world_id,
        character_id,
        level,
        &profession,
        &residence,
        last_login_time,
        tutor_activities,
    )?;
    if !updated {
        tracing::error!(
            "Logout for unknown character {} on world {}",
            character_id,
            world_id
        );
        conn.send_failed();
        return Ok(());
    }
    tx.commit()?;

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
