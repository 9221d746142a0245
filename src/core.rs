//! Core server functionality
//!
//! Signal wiring, the monotonic clock the engine and caches stamp their
//! timestamps from, and the shutdown flag checked between event-loop ticks.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

/// Last shutdown signal received, 0 when none. Written from the signal
/// handler, read between ticks.
static SHUTDOWN_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signal types the server reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM (graceful shutdown)
    Terminate,
    /// SIGPIPE (broken pipe - ignored)
    Pipe,
}

impl Signal {
    /// Convert a libc signal number to our Signal enum.
    pub fn from_signal_num(signum: libc::c_int) -> Option<Self> {
        match signum {
            libc::SIGINT => Some(Signal::Interrupt),
            libc::SIGTERM => Some(Signal::Terminate),
            libc::SIGPIPE => Some(Signal::Pipe),
            _ => None,
        }
    }

    /// Check if this signal should trigger shutdown.
    pub fn should_shutdown(&self) -> bool {
        matches!(self, Signal::Interrupt | Signal::Terminate)
    }
}

extern "C" fn shutdown_handler(signum: libc::c_int) {
    SHUTDOWN_SIGNAL.store(signum, Ordering::SeqCst);
}

fn set_handler(signum: libc::c_int, handler: libc::sighandler_t) -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(signum, &action, std::ptr::null_mut()) == -1 {
            bail!(
                "failed to change handler for signal {}: {}",
                signum,
                std::io::Error::last_os_error()
            );
        }
    }
    Ok(())
}

/// Installs the process signal handlers: SIGPIPE is ignored, SIGINT and
/// SIGTERM set the shutdown flag.
pub fn init_signal_handlers() -> Result<()> {
    set_handler(libc::SIGPIPE, libc::SIG_IGN)?;
    set_handler(libc::SIGINT, shutdown_handler as libc::sighandler_t)?;
    set_handler(libc::SIGTERM, shutdown_handler as libc::sighandler_t)?;
    Ok(())
}

/// Returns the pending shutdown signal, if any.
pub fn shutdown_signal() -> Option<Signal> {
    Signal::from_signal_num(SHUTDOWN_SIGNAL.load(Ordering::SeqCst))
}

/// Monotonic millisecond clock, zero at construction. One instance lives in
/// the server context; every `LastActive`, cache timestamp and idle check
/// reads from it.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn monotonic_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
