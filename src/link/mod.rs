//! Per-station UDP links: a blocking request/response channel, a polling
//! non-blocking receive channel layered on it, and the three concrete links
//! (display, tracker, goggle) with their micro-protocols.

pub mod display;
pub mod goggle;
pub mod polling;
pub mod tracker;

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::wire::{Message, DEFAULT_EOM, MAX_DATAGRAM};

pub use display::{DisplayDecode, DisplayLink};
pub use goggle::GoggleLink;
pub use polling::{LinkDecode, PollingConnection};
pub use tracker::{TrackerDecode, TrackerLink};

/// Link I/O failure taxonomy.
///
/// Bind and timeout failures surface to the operator; polling-path socket
/// errors never reach this type (they are absorbed as expected steady state).
#[derive(Error, Debug)]
pub enum LinkError {
    /// Receive endpoint is already in use or otherwise unbindable.
    /// Fatal to link setup.
    #[error("failed to bind receive endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// A blocking exchange got no reply within its deadline.
    /// The link remains usable for retry.
    #[error("no response from {addr} within {timeout:?}")]
    ResponseTimeout {
        addr: SocketAddr,
        timeout: Duration,
    },

    /// Command issued before the link was opened.
    #[error("link is not open")]
    NotOpen,

    /// Outbound command exceeds one datagram.
    #[error("command of {len} bytes exceeds the {max} byte datagram limit")]
    Oversize { len: usize, max: usize },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event produced by a link decoder, applied by the trial runner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Display station finished the running trial on its own.
    TrialComplete,

    /// Display station acknowledged an operator-initiated stop;
    /// state was already updated on the synchronous path.
    TrialStopAck,

    /// Tracker pose record; translation is the first three fields.
    Pose(Vec<f64>),
}

/// Blocking request/response channel over one UDP socket pair.
///
/// Owns its sockets exclusively. `open` binds the receive endpoint and
/// creates the send socket; all outbound payloads get the link's
/// end-of-message marker appended.
pub struct Connection {
    recv_addr: SocketAddr,
    send_addr: SocketAddr,
    eom: String,
    await_timeout: Duration,

    sock_recv: Option<UdpSocket>,
    sock_send: Option<UdpSocket>,
    rxbuf: Vec<u8>,
}

impl Connection {
    pub fn new(recv_addr: SocketAddr, send_addr: SocketAddr, await_timeout: Duration) -> Self {
        Self {
            recv_addr,
            send_addr,
            eom: DEFAULT_EOM.to_owned(),
            await_timeout,
            sock_recv: None,
            sock_send: None,
            rxbuf: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn is_open(&self) -> bool {
        self.sock_recv.is_some()
    }

    /// Address the receive socket is actually bound to.
    /// Differs from the configured address when port 0 was requested.
    pub fn local_recv_addr(&self) -> Option<SocketAddr> {
        self.sock_recv.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn send_addr(&self) -> SocketAddr {
        self.send_addr
    }

    /// Bind the receive endpoint and create the send socket.
    /// Opening an already-open channel is a no-op.
    pub fn open(&mut self) -> Result<(), LinkError> {
        if self.is_open() {
            return Ok(());
        }

        let sock_recv = UdpSocket::bind(self.recv_addr).map_err(|source| LinkError::Bind {
            addr: self.recv_addr,
            source,
        })?;

        // Ephemeral local port; the peer replies to the bound receive endpoint
        let send_bind: SocketAddr = if self.send_addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let sock_send = UdpSocket::bind(send_bind).map_err(|source| LinkError::Bind {
            addr: send_bind,
            source,
        })?;

        self.sock_recv = Some(sock_recv);
        self.sock_send = Some(sock_send);
        Ok(())
    }

    /// Release both sockets. Idempotent.
    pub fn close(&mut self) {
        self.sock_recv = None;
        self.sock_send = None;
        self.rxbuf.fill(0);
    }

    /// Send a message and block for the peer's reply, up to the link's
    /// configured deadline.
    pub fn send_and_await(&mut self, msg: &Message) -> Result<Vec<u8>, LinkError> {
        self.send_and_await_within(msg, self.await_timeout)
    }

    /// Send a message and block for the peer's reply, up to `timeout`.
    pub fn send_and_await_within(
        &mut self,
        msg: &Message,
        timeout: Duration,
    ) -> Result<Vec<u8>, LinkError> {
        let payload = format!("{}{}", msg.render(), self.eom);
        if payload.len() > MAX_DATAGRAM {
            return Err(LinkError::Oversize {
                len: payload.len(),
                max: MAX_DATAGRAM,
            });
        }

        let sock_send = self.sock_send.as_ref().ok_or(LinkError::NotOpen)?;
        sock_send.send_to(payload.as_bytes(), self.send_addr)?;
        debug!(to = %self.send_addr, "sent {payload}");

        self.receive_once(timeout)
    }

    /// Bare blocking receive with timeout semantics, for links that only
    /// consume and never reply.
    pub fn receive_once(&mut self, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let sock_recv = self.sock_recv.as_ref().ok_or(LinkError::NotOpen)?;
        sock_recv.set_read_timeout(Some(timeout))?;

        match sock_recv.recv_from(&mut self.rxbuf) {
            Ok((size, _from)) => Ok(self.rxbuf[..size].to_vec()),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(LinkError::ResponseTimeout {
                    addr: self.send_addr,
                    timeout,
                })
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}
