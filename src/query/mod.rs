//! Query dispatcher.
//!
//! Decodes the 1-byte query code off a received frame and routes it through
//! two gates: an unauthorized connection may only LOGIN (anything else
//! closes the slot), and most domain queries additionally require the GAME
//! application type. Handlers read their arguments in documented order,
//! reply through the response framing on the connection, and answer FAILED
//! on any data-layer error; ambient transaction rollback happens through
//! scope drop.

mod housing;
mod info;
mod login;
mod moderation;

use crate::codec::ReadBuffer;
use crate::database::Db;
use crate::network::hostcache::HostCache;
use crate::network::{ApplicationType, Connection};
use anyhow::Result;

// Gaps in the numbering are intentional; downstream clients must not assume
// a contiguous range.
pub const QUERY_LOGIN: u8 = 0;
pub const QUERY_CHECK_ACCOUNT_PASSWORD: u8 = 10;
pub const QUERY_LOGIN_ACCOUNT: u8 = 11;
pub const QUERY_LOGIN_ADMIN: u8 = 12;
pub const QUERY_LOGIN_GAME: u8 = 20;
pub const QUERY_LOGOUT_GAME: u8 = 21;
pub const QUERY_SET_NAMELOCK: u8 = 23;
pub const QUERY_BANISH_ACCOUNT: u8 = 25;
pub const QUERY_SET_NOTATION: u8 = 26;
pub const QUERY_REPORT_STATEMENT: u8 = 27;
pub const QUERY_BANISH_IP_ADDRESS: u8 = 28;
pub const QUERY_LOG_CHARACTER_DEATH: u8 = 29;
pub const QUERY_ADD_BUDDY: u8 = 30;
pub const QUERY_REMOVE_BUDDY: u8 = 31;
pub const QUERY_DECREMENT_IS_ONLINE: u8 = 32;
pub const QUERY_FINISH_AUCTIONS: u8 = 33;
pub const QUERY_TRANSFER_HOUSES: u8 = 35;
pub const QUERY_EVICT_FREE_ACCOUNTS: u8 = 36;
pub const QUERY_EVICT_DELETED_CHARACTERS: u8 = 37;
pub const QUERY_EVICT_EX_GUILDLEADERS: u8 = 38;
pub const QUERY_INSERT_HOUSE_OWNER: u8 = 39;
pub const QUERY_UPDATE_HOUSE_OWNER: u8 = 40;
pub const QUERY_DELETE_HOUSE_OWNER: u8 = 41;
pub const QUERY_GET_HOUSE_OWNERS: u8 = 42;
pub const QUERY_GET_AUCTIONS: u8 = 43;
pub const QUERY_START_AUCTION: u8 = 44;
pub const QUERY_INSERT_HOUSES: u8 = 45;
pub const QUERY_CLEAR_IS_ONLINE: u8 = 46;
pub const QUERY_CREATE_PLAYERLIST: u8 = 47;
pub const QUERY_LOG_KILLED_CREATURES: u8 = 48;
pub const QUERY_LOAD_PLAYERS: u8 = 50;
pub const QUERY_EXCLUDE_FROM_AUCTIONS: u8 = 51;
pub const QUERY_CANCEL_HOUSE_TRANSFER: u8 = 52;
pub const QUERY_LOAD_WORLD_CONFIG: u8 = 53;
pub const QUERY_GET_KEPT_CHARACTERS: u8 = 200;
pub const QUERY_GET_DELETED_CHARACTERS: u8 = 201;
pub const QUERY_DELETE_OLD_CHARACTER: u8 = 202;
pub const QUERY_GET_HIDDEN_CHARACTERS: u8 = 203;
pub const QUERY_CREATE_HIGHSCORES: u8 = 204;
pub const QUERY_CREATE_CENSUS: u8 = 205;
pub const QUERY_CREATE_KILL_STATISTICS: u8 = 206;
pub const QUERY_GET_PLAYERS_ONLINE: u8 = 207;
pub const QUERY_GET_WORLDS: u8 = 208;
pub const QUERY_GET_SERVER_LOAD: u8 = 209;
pub const QUERY_INSERT_PAYMENT_DATA_OLD: u8 = 210;
pub const QUERY_ADD_PAYMENT_OLD: u8 = 211;
pub const QUERY_CANCEL_PAYMENT_OLD: u8 = 212;
pub const QUERY_INSERT_PAYMENT_DATA_NEW: u8 = 213;
pub const QUERY_ADD_PAYMENT_NEW: u8 = 214;
pub const QUERY_CANCEL_PAYMENT_NEW: u8 = 215;

/// World types stored in the `Type` column of `Worlds`.
pub const WORLD_TYPE_PUBLIC: i32 = 0;
/// Invitation-gated; characters need a `WorldInvitations` row to log in.
pub const WORLD_TYPE_PRIVATE: i32 = 1;
/// Test worlds open to characters holding the GAMEMASTER right only.
pub const WORLD_TYPE_GAMEMASTER: i32 = 2;

/// Everything a handler may touch besides the connection itself: the data
/// layer, the host cache and the shared LOGIN secret. One value, threaded
/// from main; there are no process-wide singletons.
pub struct QueryContext<'conn> {
    pub db: Db<'conn>,
    pub hosts: HostCache,
    pub password: String,
}

/// Entry point from the connection engine, called with the slot in
/// PROCESSING state holding a complete frame.
pub fn process_query(ctx: &mut QueryContext, conn: &mut Connection) {
    let frame = conn.frame();
    let mut reader = ReadBuffer::new(&frame);
    let query = reader.read_u8();

    let result = if !conn.authorized {
        if query != QUERY_LOGIN {
            tracing::error!("Expected login query from {}", conn.remote_address);
            conn.close();
            return;
        }
        login::process_login(ctx, conn, &mut reader)
    } else {
        dispatch(ctx, conn, query, &mut reader)
    };

    if let Err(err) = result {
        tracing::error!(
            "Query {} from {} failed: {:#}",
            query,
            conn.remote_address,
            err
        );
        conn.send_failed();
    }
}

fn dispatch(
    ctx: &mut QueryContext,
    conn: &mut Connection,
    query: u8,
    reader: &mut ReadBuffer,
) -> HandlerResult {
    match query {
        QUERY_LOGIN_ACCOUNT => login::process_login_account(ctx, conn, reader),
        QUERY_LOGIN_GAME => login::process_login_game(ctx, conn, reader),
        QUERY_LOGOUT_GAME => login::process_logout_game(ctx, conn, reader),
        QUERY_SET_NAMELOCK => moderation::process_set_namelock(ctx, conn, reader),
        QUERY_BANISH_ACCOUNT => moderation::process_banish_account(ctx, conn, reader),
        QUERY_SET_NOTATION => moderation::process_set_notation(ctx, conn, reader),
        QUERY_REPORT_STATEMENT => moderation::process_report_statement(ctx, conn, reader),
        QUERY_BANISH_IP_ADDRESS => moderation::process_banish_ip_address(ctx, conn, reader),
        QUERY_LOG_CHARACTER_DEATH => info::process_log_character_death(ctx, conn, reader),
        QUERY_ADD_BUDDY => info::process_add_buddy(ctx, conn, reader),
        QUERY_REMOVE_BUDDY => info::process_remove_buddy(ctx, conn, reader),
        QUERY_DECREMENT_IS_ONLINE => info::process_decrement_is_online(ctx, conn, reader),
        QUERY_FINISH_AUCTIONS => housing::process_finish_auctions(ctx, conn, reader),
        QUERY_TRANSFER_HOUSES => housing::process_transfer_houses(ctx, conn, reader),
        QUERY_EVICT_FREE_ACCOUNTS => housing::process_evict_free_accounts(ctx, conn, reader),
        QUERY_EVICT_DELETED_CHARACTERS => {
            housing::process_evict_deleted_characters(ctx, conn, reader)
        }
        QUERY_EVICT_EX_GUILDLEADERS => {
            housing::process_evict_ex_guildleaders(ctx, conn, reader)
        }
        QUERY_INSERT_HOUSE_OWNER => housing::process_insert_house_owner(ctx, conn, reader),
        QUERY_UPDATE_HOUSE_OWNER => housing::process_update_house_owner(ctx, conn, reader),
        QUERY_DELETE_HOUSE_OWNER => housing::process_delete_house_owner(ctx, conn, reader),
        QUERY_GET_HOUSE_OWNERS => housing::process_get_house_owners(ctx, conn, reader),
        QUERY_GET_AUCTIONS => housing::process_get_auctions(ctx, conn, reader),
        QUERY_START_AUCTION => housing::process_start_auction(ctx, conn, reader),
        QUERY_INSERT_HOUSES => housing::process_insert_houses(ctx, conn, reader),
        QUERY_CLEAR_IS_ONLINE => info::process_clear_is_online(ctx, conn, reader),
        QUERY_CREATE_PLAYERLIST => info::process_create_playerlist(ctx, conn, reader),
        QUERY_LOG_KILLED_CREATURES => info::process_log_killed_creatures(ctx, conn, reader),
        QUERY_LOAD_PLAYERS => info::process_load_players(ctx, conn, reader),
        QUERY_EXCLUDE_FROM_AUCTIONS => {
            housing::process_exclude_from_auctions(ctx, conn, reader)
        }
        QUERY_CANCEL_HOUSE_TRANSFER => {
            housing::process_cancel_house_transfer(ctx, conn, reader)
        }
        QUERY_LOAD_WORLD_CONFIG => info::process_load_world_config(ctx, conn, reader),
        QUERY_CHECK_ACCOUNT_PASSWORD
        | QUERY_LOGIN_ADMIN
        | QUERY_GET_KEPT_CHARACTERS
        | QUERY_GET_DELETED_CHARACTERS
        | QUERY_DELETE_OLD_CHARACTER
        | QUERY_GET_HIDDEN_CHARACTERS
        | QUERY_CREATE_HIGHSCORES
        | QUERY_CREATE_CENSUS
        | QUERY_CREATE_KILL_STATISTICS
        | QUERY_GET_PLAYERS_ONLINE
        | QUERY_GET_WORLDS
        | QUERY_GET_SERVER_LOAD
        | QUERY_INSERT_PAYMENT_DATA_OLD
        | QUERY_ADD_PAYMENT_OLD
        | QUERY_CANCEL_PAYMENT_OLD
        | QUERY_INSERT_PAYMENT_DATA_NEW
        | QUERY_ADD_PAYMENT_NEW
        | QUERY_CANCEL_PAYMENT_NEW => {
            // Accepted for wire compatibility; behavior undefined here.
            conn.send_failed();
            Ok(())
        }
        _ => {
            tracing::error!("Unknown query {} from {}", query, conn.remote_address);
            conn.send_failed();
            Ok(())
        }
    }
}

/// The GAME application-type gate. Returns the bound world id, or answers
/// FAILED and yields `None`.
fn game_world(conn: &mut Connection) -> Option<i32> {
    if conn.application_type == Some(ApplicationType::Game) {
        Some(conn.world_id)
    } else {
        conn.send_failed();
        None
    }
}

type HandlerResult = Result<()>;
