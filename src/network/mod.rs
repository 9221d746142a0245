//! Connection engine.
//!
//! A loopback-only listener feeding a fixed table of connection slots, each
//! advancing a small frame state machine, all driven by one cooperative
//! event loop: accept, poll with zero timeout, step every live slot, sleep
//! the rest of the tick. Handlers run to completion between polls; the only
//! blocking calls they make are SQL.

pub mod crypt;
pub mod hostcache;

use crate::codec::WriteBuffer;
use crate::config::Config;
use crate::core::{self, Clock};
use crate::query::{self, QueryContext};
use anyhow::{bail, Result};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Query status byte on the wire.
pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
pub const STATUS_FAILED: u8 = 3;

/// Class of client behind a connection. Only game servers bind a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationType {
    Game,
    Login,
    Web,
}

impl ApplicationType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(ApplicationType::Game),
            2 => Some(ApplicationType::Login),
            3 => Some(ApplicationType::Web),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Free,
    Reading,
    Processing,
    Writing,
}

/// One slot of the fixed connection table. The frame buffer is allocated
/// lazily on first read and released with the slot. Exactly one frame is in
/// flight per slot at any time.
pub struct Connection {
    pub state: ConnectionState,
    socket: Option<TcpStream>,
    pub last_active: i64,
    rw_size: usize,
    rw_pos: usize,
    buffer: Option<Box<[u8]>>,
    pub authorized: bool,
    pub application_type: Option<ApplicationType>,
    pub world_id: i32,
    pub remote_address: String,
    max_packet_size: usize,
}

impl Connection {
    fn new(max_packet_size: usize) -> Self {
        Self {
            state: ConnectionState::Free,
            socket: None,
            last_active: 0,
            rw_size: 0,
            rw_pos: 0,
            buffer: None,
            authorized: false,
            application_type: None,
            world_id: 0,
            remote_address: String::new(),
            max_packet_size,
        }
    }

    /// Closes the socket. The slot itself is released by housekeeping once
    /// the socket is gone.
    pub fn close(&mut self) {
        self.socket = None;
    }

    fn release(&mut self) {
        if self.state != ConnectionState::Free {
            tracing::info!("Connection {} released", self.remote_address);
        }
        self.socket = None;
        self.buffer = None;
        self.state = ConnectionState::Free;
        self.last_active = 0;
        self.rw_size = 0;
        self.rw_pos = 0;
        self.authorized = false;
        self.application_type = None;
        self.world_id = 0;
        self.remote_address.clear();
    }

    fn assign(&mut self, socket: TcpStream, addr: Ipv4Addr, port: u16, now: i64) {
        self.state = ConnectionState::Reading;
        self.socket = Some(socket);
        self.last_active = now;
        self.remote_address = format!("{}:{}", addr, port);
    }

    fn ensure_buffer(&mut self) {
        if self.buffer.is_none() {
            self.buffer = Some(vec![0u8; self.max_packet_size].into_boxed_slice());
        }
    }

    /// Copy of the received frame payload, valid while in PROCESSING.
    pub fn frame(&self) -> Vec<u8> {
        match &self.buffer {
            Some(buffer) => buffer[..self.rw_size].to_vec(),
            None => Vec::new(),
        }
    }

    /// Advances the read state machine. The header is 2 bytes, or 6 when
    /// the short length escapes to the 32-bit form; then the payload. A
    /// zero or over-limit length closes the connection, as does data
    /// arriving while a query is processing or a response is flushing.
    fn check_input(&mut self, events: i16, now: i64) {
        if events & libc::POLLIN == 0 || self.socket.is_none() {
            return;
        }

        if self.state != ConnectionState::Reading {
            tracing::error!(
                "Connection {} (State: {:?}) sending out-of-order data",
                self.remote_address,
                self.state
            );
            self.close();
            return;
        }

        self.ensure_buffer();
        loop {
            let read_target = if self.rw_size != 0 {
                self.rw_size
            } else if self.rw_pos < 2 {
                2
            } else {
                6
            };

            let socket = self.socket.as_ref().unwrap();
            let buffer = self.buffer.as_mut().unwrap();
            match (&*socket).read(&mut buffer[self.rw_pos..read_target]) {
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        self.close();
                    }
                    break;
                }
                Ok(0) => {
                    // Graceful close.
                    self.close();
                    break;
                }
                Ok(n) => self.rw_pos += n,
            }

            if self.rw_pos < read_target {
                continue;
            }

            if self.rw_size != 0 {
                self.state = ConnectionState::Processing;
                self.last_active = now;
                break;
            } else if self.rw_pos == 2 {
                let buffer = self.buffer.as_ref().unwrap();
                let payload_size = u16::from_le_bytes([buffer[0], buffer[1]]) as usize;
                if payload_size == 0 || payload_size > self.max_packet_size {
                    self.close();
                    break;
                }
                if payload_size != 0xFFFF {
                    self.rw_size = payload_size;
                    self.rw_pos = 0;
                }
            } else {
                debug_assert_eq!(self.rw_pos, 6);
                let buffer = self.buffer.as_ref().unwrap();
                let payload_size =
                    u32::from_le_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]) as usize;
                if payload_size == 0 || payload_size > self.max_packet_size {
                    self.close();
                    break;
                }
                self.rw_size = payload_size;
                self.rw_pos = 0;
            }
        }
    }

    /// Flushes the pending response; back to READING once it is all out.
    fn check_output(&mut self, events: i16) {
        if events & libc::POLLOUT == 0 || self.socket.is_none() {
            return;
        }

        if self.state != ConnectionState::Writing {
            return;
        }

        loop {
            let socket = self.socket.as_ref().unwrap();
            let buffer = self.buffer.as_ref().unwrap();
            match (&*socket).write(&buffer[self.rw_pos..self.rw_size]) {
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        self.close();
                    }
                    break;
                }
                Ok(n) => self.rw_pos += n,
            }

            if self.rw_pos >= self.rw_size {
                self.state = ConnectionState::Reading;
                self.rw_size = 0;
                self.rw_pos = 0;
                break;
            }
        }
    }

    fn check_housekeeping(&mut self, events: i16, now: i64, max_idle_time: i64) {
        if events & (libc::POLLERR | libc::POLLHUP) != 0 {
            self.close();
        }

        if max_idle_time > 0 && self.socket.is_some() {
            let idle_time = now - self.last_active;
            if idle_time >= max_idle_time {
                tracing::warn!(
                    "Dropping connection {} due to inactivity",
                    self.remote_address
                );
                self.close();
            }
        }

        if self.socket.is_none() {
            self.release();
        }
    }

    /// Builds a response frame over the slot buffer and arms the write
    /// state machine. The closure appends the payload after the status
    /// byte; the length prefix is patched in afterwards, upgrading to the
    /// extended form when the payload outgrows it. An overflowed buffer
    /// closes the connection instead of sending a truncated reply.
    pub fn respond_with(&mut self, status: u8, payload: impl FnOnce(&mut WriteBuffer)) {
        if self.state != ConnectionState::Processing {
            tracing::error!(
                "Connection {} is not processing a query (State: {:?})",
                self.remote_address,
                self.state
            );
            self.close();
            return;
        }

        let Some(buffer) = self.buffer.as_mut() else {
            self.close();
            return;
        };
        let mut writer = WriteBuffer::new(buffer);
        writer.write_u16(0);
        writer.write_u8(status);
        payload(&mut writer);

        let payload_size = writer.position() - 2;
        if payload_size < 0xFFFF {
            writer.rewrite_u16(0, payload_size as u16);
        } else {
            writer.rewrite_u16(0, 0xFFFF);
            writer.insert_u32(2, payload_size as u32);
        }

        if writer.overflowed() {
            tracing::error!(
                "Write buffer overflowed when writing response to {}",
                self.remote_address
            );
            self.close();
        } else {
            self.rw_size = writer.position();
            self.rw_pos = 0;
            self.state = ConnectionState::Writing;
        }
    }

    pub fn send_ok(&mut self) {
        self.respond_with(STATUS_OK, |_| {});
    }

    pub fn send_error(&mut self, error_code: u8) {
        self.respond_with(STATUS_ERROR, |writer| writer.write_u8(error_code));
    }

    pub fn send_failed(&mut self) {
        self.respond_with(STATUS_FAILED, |_| {});
    }
}

/// Binds the listener to the loopback address. The protocol is not
/// encrypted, so refusing to bind anywhere else is what keeps it private to
/// the local machine; accepted peers are checked again against the
/// loopback literal.
fn listener_bind(port: u16) -> Result<TcpListener> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd == -1 {
            bail!(
                "failed to create listener socket: {}",
                std::io::Error::last_os_error()
            );
        }

        let reuse: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) == -1
        {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            bail!("failed to set SO_REUSEADDR: {}", err);
        }

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = u32::from(Ipv4Addr::LOCALHOST).to_be();
        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) == -1
        {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            bail!("failed to bind socket to port {}: {}", port, err);
        }

        if libc::listen(fd, 128) == -1 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            bail!("failed to listen on port {}: {}", port, err);
        }

        let listener = TcpListener::from_raw_fd(fd);
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

/// The event loop: listener, slot table and the query context the
/// dispatcher runs against.
pub struct Engine<'conn> {
    listener: TcpListener,
    connections: Vec<Connection>,
    ctx: QueryContext<'conn>,
    clock: Clock,
    update_rate: u32,
    max_idle_time: i64,
}

impl<'conn> Engine<'conn> {
    pub fn new(config: &Config, ctx: QueryContext<'conn>, clock: Clock) -> Result<Self> {
        tracing::info!("Listening port: {}", config.port);
        tracing::info!("Max connections: {}", config.max_connections);
        tracing::info!("Max connection idle time: {} ms", config.max_connection_idle_time);
        tracing::info!("Max connection packet size: {}", config.max_connection_packet_size);

        let listener = listener_bind(config.port)?;
        let connections = (0..config.max_connections)
            .map(|_| Connection::new(config.max_connection_packet_size))
            .collect();

        Ok(Self {
            listener,
            connections,
            ctx,
            clock,
            update_rate: config.update_rate,
            max_idle_time: config.max_connection_idle_time,
        })
    }

    /// Actual listen port; differs from the configured one when it was 0.
    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    fn accept_pending(&mut self, now: i64) {
        loop {
            let (socket, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        tracing::error!("Failed to accept connection: {}", err);
                    }
                    break;
                }
            };

            // Loopback cannot be spoofed, so this check plus the loopback
            // bind is the whole authentication of the transport.
            let addr = match peer.ip() {
                IpAddr::V4(v4) if v4 == Ipv4Addr::LOCALHOST => v4,
                other => {
                    tracing::error!("Rejecting remote connection from {}", other);
                    continue;
                }
            };

            if let Err(err) = socket.set_nonblocking(true) {
                tracing::error!("Failed to set socket flags: {}", err);
                continue;
            }

            match self
                .connections
                .iter_mut()
                .enumerate()
                .find(|(_, conn)| conn.state == ConnectionState::Free)
            {
                Some((index, conn)) => {
                    conn.assign(socket, addr, peer.port(), now);
                    tracing::info!(
                        "Connection {} assigned to slot {}",
                        conn.remote_address,
                        index
                    );
                }
                None => {
                    tracing::error!(
                        "Rejecting connection from {} due to max number of connections being reached ({})",
                        addr,
                        self.connections.len()
                    );
                }
            }
        }
    }

    /// One tick: drain the accept queue, poll every live slot for both
    /// readability and writability with zero timeout, then run the input,
    /// output and housekeeping steps per slot.
    pub fn tick(&mut self) {
        let now = self.clock.monotonic_ms();
        self.accept_pending(now);

        let mut indices = Vec::with_capacity(self.connections.len());
        let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(self.connections.len());
        for (index, conn) in self.connections.iter().enumerate() {
            let Some(socket) = conn.socket.as_ref() else {
                continue;
            };
            if conn.state == ConnectionState::Free {
                continue;
            }
            indices.push(index);
            pollfds.push(libc::pollfd {
                fd: socket.as_raw_fd(),
                events: libc::POLLIN | libc::POLLOUT,
                revents: 0,
            });
        }

        if pollfds.is_empty() {
            return;
        }

        let num_events =
            unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, 0) };
        if num_events == -1 {
            tracing::error!(
                "Failed to poll connections: {}",
                std::io::Error::last_os_error()
            );
            return;
        }

        for (slot, pollfd) in indices.into_iter().zip(pollfds.iter()) {
            let events = pollfd.revents;
            let conn = &mut self.connections[slot];
            conn.check_input(events, now);
            if conn.state == ConnectionState::Processing {
                query::process_query(&mut self.ctx, conn);
            }
            conn.check_output(events);
            conn.check_housekeeping(events, now, self.max_idle_time);
        }
    }

    /// Runs ticks until a shutdown signal or `stop` flag arrives, pacing to
    /// `UpdateRate` per second, then releases every slot.
    pub fn run(&mut self, stop: &AtomicBool) {
        tracing::info!("Running at {} updates per second...", self.update_rate);
        let update_interval = Duration::from_millis((1000 / self.update_rate).max(1) as u64);

        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if let Some(signal) = core::shutdown_signal() {
                if signal.should_shutdown() {
                    tracing::info!("Received {:?}, shutting down...", signal);
                    break;
                }
            }

            let update_start = Instant::now();
            self.tick();
            let elapsed = update_start.elapsed();
            if elapsed < update_interval {
                std::thread::sleep(update_interval - elapsed);
            }
        }

        for conn in &mut self.connections {
            conn.release();
        }
    }
}
