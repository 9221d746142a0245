use anyhow::{Context, Result};
use querymanager::config::Config;
use querymanager::core::{self, Clock};
use querymanager::database::{self, Db};
use querymanager::network::hostcache::HostCache;
use querymanager::network::{crypt, Engine};
use querymanager::query::QueryContext;
use std::path::Path;
use std::sync::atomic::AtomicBool;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config_file = "config.cfg".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: querymanager [--config FILE]");
                return Ok(());
            }
            "--config" => {
                if i + 1 < args.len() {
                    i += 1;
                    config_file = args[i].clone();
                } else {
                    eprintln!("Error: --config requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    tracing::info!("Query Manager v{}", env!("CARGO_PKG_VERSION"));
    core::init_signal_handlers()?;

    let config = Config::from_file(&config_file)
        .with_context(|| format!("Cannot load config: {}", config_file))?;

    crypt::self_test().context("SHA-256 self-test failed")?;

    let clock = Clock::new();
    let conn = database::open_database(&config.database_file, Path::new("sql"))?;

    // Engine teardown runs before the statement cache and the connection
    // are dropped, matching the required order: listener, slots,
    // statements, database.
    let ctx = QueryContext {
        db: Db::new(&conn, config.max_cached_statements, clock),
        hosts: HostCache::new(
            config.max_cached_host_names,
            config.host_name_expire_time,
            clock,
        ),
        password: config.password.clone(),
    };

    let mut engine = Engine::new(&config, ctx, clock)?;
    engine.run(&AtomicBool::new(false));

    Ok(())
}
