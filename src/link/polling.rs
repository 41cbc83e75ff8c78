//! Polling non-blocking receive channel layered on a blocking connection.
//!
//! A second UDP socket is bound to a dedicated low-latency endpoint with a
//! requested OS receive buffer of 1 byte, so stale buffered datagrams are
//! never delivered: only the most recent arrival is read. Freshness over
//! completeness, for continuous telemetry like the pose stream.
//!
//! The poll loop is cooperative and single-threaded: the host pumps it at a
//! fixed interval, each tick does at most one non-blocking read, and a
//! would-block or socket error re-arms the tick with nothing delivered.
//! Stopping clears the gate flag, so at most one more idle tick occurs
//! before the loop quiesces; there is no hard cancellation of an in-flight
//! tick.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

use super::{Connection, LinkError, LinkEvent};
use crate::ticker::Ticker;
use crate::wire::MAX_DATAGRAM;

/// Per-link decode capability: turn one inbound datagram into the event to
/// apply, or `None` to drop it silently.
pub trait LinkDecode {
    fn decode(&self, datagram: &[u8]) -> Option<LinkEvent>;
}

/// A blocking connection plus a non-blocking telemetry receive path.
pub struct PollingConnection {
    pub chan: Connection,

    poll_addr: SocketAddr,
    sock_poll: Option<UdpSocket>,
    polling: bool,
    ticker: Ticker,
    rxbuf: Vec<u8>,
}

impl PollingConnection {
    pub fn new(chan: Connection, poll_addr: SocketAddr, poll_interval: Duration) -> Self {
        Self {
            chan,
            poll_addr,
            sock_poll: None,
            polling: false,
            ticker: Ticker::new(poll_interval),
            rxbuf: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn is_open(&self) -> bool {
        self.chan.is_open() && self.sock_poll.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Address the poll socket is actually bound to.
    pub fn local_poll_addr(&self) -> Option<SocketAddr> {
        self.sock_poll.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Open the blocking pair, then bind the low-latency socket with a
    /// 1-byte receive buffer request and non-blocking mode.
    pub fn open(&mut self) -> Result<(), LinkError> {
        self.chan.open()?;
        if self.sock_poll.is_some() {
            return Ok(());
        }

        let to_bind_err = |source: std::io::Error| LinkError::Bind {
            addr: self.poll_addr,
            source,
        };

        let sock = Socket::new(
            Domain::for_address(self.poll_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(to_bind_err)?;
        // Best effort; kernels clamp to their minimum. The intent is
        // recency, not the exact size.
        let _ = sock.set_recv_buffer_size(1);
        sock.bind(&self.poll_addr.into()).map_err(to_bind_err)?;
        sock.set_nonblocking(true).map_err(to_bind_err)?;

        self.sock_poll = Some(sock.into());
        Ok(())
    }

    /// Release all three sockets and stop polling. Idempotent.
    pub fn close(&mut self) {
        self.polling = false;
        self.ticker.stop();
        self.sock_poll = None;
        self.chan.close();
    }

    /// Begin the cooperative poll loop; the first read attempt comes due
    /// one interval after `now`.
    pub fn start_polling(&mut self, now: Instant) {
        self.polling = true;
        self.ticker.start(now);
    }

    /// Clear the flag gating the next re-arm. The already-armed tick still
    /// fires once, idle, before the loop quiesces.
    pub fn stop_polling(&mut self) {
        self.polling = false;
    }

    /// One scheduler tick. If the ticker is due: attempt a single
    /// non-blocking read and decode it; on would-block or any socket error,
    /// re-arm silently with nothing delivered. Never blocks.
    pub fn pump<D: LinkDecode>(&mut self, now: Instant, decoder: &D) -> Option<LinkEvent> {
        if !self.ticker.fire(now) {
            return None;
        }
        if !self.polling {
            // Final idle tick after stop_polling
            self.ticker.stop();
            return None;
        }

        let sock = self.sock_poll.as_ref()?;
        match sock.recv(&mut self.rxbuf) {
            Ok(size) => {
                let event = decoder.decode(&self.rxbuf[..size]);
                if event.is_none() {
                    trace!("dropped undecodable datagram of {size} bytes");
                }
                event
            }
            // Expected steady state: nothing arrived, or a transient
            // socket error. Either way the next tick is already armed.
            Err(e) => {
                trace!("poll read yielded nothing: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::Message;

    /// Decoder used by channel-level tests: any well-formed message maps to
    /// a pose event carrying its field count.
    struct CountDecode;

    impl LinkDecode for CountDecode {
        fn decode(&self, datagram: &[u8]) -> Option<LinkEvent> {
            match Message::decode(datagram)? {
                Message::Pose(fields) => Some(LinkEvent::Pose(fields)),
                _ => None,
            }
        }
    }

    fn open_loopback(interval: Duration) -> PollingConnection {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let chan = Connection::new(any, any, Duration::from_millis(100));
        let mut conn = PollingConnection::new(chan, any, interval);
        conn.open().unwrap();
        conn
    }

    #[test]
    fn test_no_traffic_ticks_forever_without_handler() {
        let interval = Duration::from_millis(5);
        let mut conn = open_loopback(interval);
        let t0 = Instant::now();
        conn.start_polling(t0);

        for i in 1..200 {
            assert_eq!(conn.pump(t0 + interval * i, &CountDecode), None);
        }
        assert!(conn.is_polling());
    }

    #[test]
    fn test_only_due_ticks_read() {
        let interval = Duration::from_millis(10);
        let mut conn = open_loopback(interval);
        let t0 = Instant::now();
        conn.start_polling(t0);

        // Not yet due
        assert_eq!(conn.pump(t0, &CountDecode), None);
        assert_eq!(conn.pump(t0 + Duration::from_millis(5), &CountDecode), None);
    }

    #[test]
    fn test_delivers_latest_datagram() {
        let interval = Duration::from_millis(5);
        let mut conn = open_loopback(interval);
        let poll_addr = conn.local_poll_addr().unwrap();
        let t0 = Instant::now();
        conn.start_polling(t0);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"__msg_pose_1_2_3", poll_addr).unwrap();
        // Give the kernel a moment to queue the datagram
        std::thread::sleep(Duration::from_millis(50));

        let mut got = None;
        for i in 1..50 {
            if let Some(ev) = conn.pump(t0 + interval * i, &CountDecode) {
                got = Some(ev);
                break;
            }
        }
        assert_eq!(got, Some(LinkEvent::Pose(vec![1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_undecodable_dropped_silently() {
        let interval = Duration::from_millis(5);
        let mut conn = open_loopback(interval);
        let poll_addr = conn.local_poll_addr().unwrap();
        let t0 = Instant::now();
        conn.start_polling(t0);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"not_a_known_prefix", poll_addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        for i in 1..50 {
            assert_eq!(conn.pump(t0 + interval * i, &CountDecode), None);
        }
        // Loop stays live
        assert!(conn.is_polling());
    }

    #[test]
    fn test_stop_polling_allows_one_idle_tick() {
        let interval = Duration::from_millis(5);
        let mut conn = open_loopback(interval);
        let t0 = Instant::now();
        conn.start_polling(t0);
        conn.stop_polling();

        // The armed tick fires idle once, then the loop quiesces
        assert_eq!(conn.pump(t0 + interval, &CountDecode), None);
        for i in 2..10 {
            assert_eq!(conn.pump(t0 + interval * i, &CountDecode), None);
        }
        assert!(!conn.is_polling());
    }
}
