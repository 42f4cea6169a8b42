//! UDP command transport
//!
//! One socket per radio, serialized by an async mutex so that exactly one
//! request is in flight. Every exchange runs
//! `Idle -> Sending -> AwaitingEcho -> AwaitingReply -> Idle`: the radio
//! echoes the request line first, then answers with a reply datagram.
//! A timed-out exchange leaves the link in `Error`; the next exchange
//! flushes before sending. Datagrams that are neither the echo of the
//! request nor an answer to it are discarded as stale.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rxctl_protocol::{clean_reply, Command};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::error::{ControlError, Result};

/// Largest datagram the radio sends
const RECV_BUFFER: usize = 65_507;

/// Shortest receive timeout used while draining
const MIN_DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Upper bound on datagrams discarded by one flush
const MAX_FLUSH_DATAGRAMS: usize = 1_024;

/// Consecutive empty reads that end the flush after a failed exchange
pub const DEFAULT_FLUSH_RETRIES: u32 = 2;

/// Exchange phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No exchange running
    Idle,
    /// Writing the request
    Sending,
    /// Waiting for the radio to echo the request
    AwaitingEcho,
    /// Waiting for the reply
    AwaitingReply,
    /// Last exchange timed out; a flush is due
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::AwaitingEcho => "awaiting echo",
            Self::AwaitingReply => "awaiting reply",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Module token and verb (without `?`) of a request line
fn head(line: &str) -> Option<(&str, &str)> {
    let mut tokens = line.split_whitespace();
    let module = tokens.next()?;
    let verb = tokens.next().map_or("", |v| v.trim_end_matches('?'));
    Some((module, verb))
}

/// Whether `reply` can be the answer to `command`
///
/// Answers repeat the request's module and verb, or carry `ERR` right after
/// the module. Empty lines acknowledge sets.
fn answers(command: &str, reply: &str) -> bool {
    let Some((module, verb)) = head(command) else {
        return true;
    };
    let mut tokens = reply.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (None, _) => true,
        (Some(m), _) if m != module => false,
        (Some(_), None) => true,
        (Some(_), Some(v)) => v == verb || v == "ERR",
    }
}

#[derive(Debug)]
struct Link {
    socket: UdpSocket,
    timeout: Duration,
    phase: Phase,
}

impl Link {
    async fn recv(&self, wait: Duration) -> Result<Option<String>> {
        let mut buf = vec![0u8; RECV_BUFFER];
        match timeout(wait, self.socket.recv(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(n)) => Ok(Some(clean_reply(&buf[..n]))),
            // ICMP port-unreachable from the peer; nothing was received
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("Radio refused datagram: {}", e);
                Ok(None)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn drain(&self, retries: u32) -> Result<usize> {
        let wait = (self.timeout / 4).max(MIN_DRAIN_TIMEOUT);
        let mut empty = 0;
        let mut discarded = 0;
        while empty < retries.max(1) && discarded < MAX_FLUSH_DATAGRAMS {
            match self.recv(wait).await? {
                Some(stale) => {
                    trace!("flush discarded {:?}", stale);
                    discarded += 1;
                    empty = 0;
                }
                None => empty += 1,
            }
        }
        Ok(discarded)
    }

    async fn flush(&self, retries: u32) -> Result<usize> {
        self.socket.send(b"\n").await?;
        self.drain(retries).await
    }

    /// First datagram before `deadline` accepted by `wanted`; others are
    /// dropped
    async fn recv_until<F>(&self, deadline: Instant, wanted: F) -> Result<Option<String>>
    where
        F: Fn(&str) -> bool,
    {
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            match self.recv(left).await? {
                Some(datagram) if wanted(&datagram) => return Ok(Some(datagram)),
                Some(stale) => trace!("discarded stale {:?}", stale),
                None => return Ok(None),
            }
        }
    }

    async fn exchange(&mut self, line: &str, check_output: bool, expect_output: bool) -> Result<String> {
        let command = line.trim_end().to_string();

        self.phase = Phase::Sending;
        trace!("tx {:?}", command);
        self.socket.send(line.as_bytes()).await?;

        self.phase = Phase::AwaitingEcho;
        let deadline = Instant::now() + self.timeout;
        match self.recv_until(deadline, |d| d.trim() == command.trim()).await? {
            Some(echo) => trace!("echo {:?}", echo),
            None => {
                return Err(ControlError::TransportTimeout {
                    command,
                    phase: Phase::AwaitingEcho,
                })
            }
        }
        if !check_output {
            return Ok(String::new());
        }

        self.phase = Phase::AwaitingReply;
        let deadline = Instant::now() + self.timeout;
        let reply = match self.recv_until(deadline, |d| answers(&command, d)).await? {
            Some(reply) => reply,
            None if expect_output => {
                return Err(ControlError::TransportTimeout {
                    command,
                    phase: Phase::AwaitingReply,
                })
            }
            None => return Ok(String::new()),
        };
        trace!("rx {:?}", reply);

        if !expect_output && !reply.is_empty() {
            self.flush(DEFAULT_FLUSH_RETRIES).await?;
            return Err(ControlError::UnexpectedOutput { command, reply });
        }
        Ok(reply)
    }
}

/// Command transport to one radio
#[derive(Debug)]
pub struct Transport {
    peer: SocketAddr,
    link: Mutex<Link>,
}

impl Transport {
    /// Resolve `host:port` and open a socket connected to it
    pub async fn connect(host: &str, port: u16, recv_timeout: Duration) -> Result<Self> {
        let peer = lookup_host((host, port)).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {host}:{port}"))
        })?;
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!("Transport connected to {} from {}", peer, socket.local_addr()?);
        Ok(Self {
            peer,
            link: Mutex::new(Link {
                socket,
                timeout: recv_timeout,
                phase: Phase::Idle,
            }),
        })
    }

    /// Radio address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current receive timeout
    pub async fn timeout(&self) -> Duration {
        self.link.lock().await.timeout
    }

    /// Change the receive timeout
    pub async fn set_timeout(&self, recv_timeout: Duration) {
        self.link.lock().await.timeout = recv_timeout;
    }

    /// Phase once the lock is obtained: `Idle`, or `Error` after a
    /// timed-out exchange that has not been flushed yet
    pub async fn phase(&self) -> Phase {
        self.link.lock().await.phase
    }

    /// Send a command and collect its reply
    ///
    /// - The echo is always consumed; its absence is a `TransportTimeout`.
    /// - With `check_output`, one reply datagram is read.
    /// - With `expect_output` unset, a missing reply is fine but a non-empty
    ///   one is an `UnexpectedOutput` (after flushing).
    pub async fn send(&self, command: &Command, check_output: bool, expect_output: bool) -> Result<String> {
        self.send_line(&command.encode(), check_output, expect_output)
            .await
    }

    /// Send a raw line and return the reply text
    pub async fn send_raw(&self, line: &str) -> Result<String> {
        let mut line = line.trim_end().to_string();
        line.push('\n');
        self.send_line(&line, true, true).await
    }

    async fn send_line(&self, line: &str, check_output: bool, expect_output: bool) -> Result<String> {
        let mut link = self.link.lock().await;
        if link.phase == Phase::Error {
            let discarded = link.flush(DEFAULT_FLUSH_RETRIES).await?;
            debug!("Recovered link to {}, {} stale datagrams dropped", self.peer, discarded);
        }
        let result = link.exchange(line, check_output, expect_output).await;
        link.phase = match &result {
            Err(e) if e.is_timeout() => Phase::Error,
            _ => Phase::Idle,
        };
        result
    }

    /// Send a bare newline and discard pending datagrams
    ///
    /// Draining uses a quarter of the timeout (at least 10 ms) and stops
    /// after `retries` consecutive empty reads. Returns the number of
    /// datagrams discarded.
    pub async fn flush(&self, retries: u32) -> Result<usize> {
        let mut link = self.link.lock().await;
        let discarded = link.flush(retries).await?;
        link.phase = Phase::Idle;
        if discarded > 0 {
            debug!("Flushed {} stale datagrams from {}", discarded, self.peer);
        }
        Ok(discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxctl_protocol::ModuleId;

    /// A peer that answers every datagram with a fixed script
    async fn scripted_peer(replies: Vec<&'static str>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let mut replies = replies.into_iter();
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let line = String::from_utf8_lossy(&buf[..n]).into_owned();
                if line.trim().is_empty() {
                    continue;
                }
                socket.send_to(line.as_bytes(), peer).await.unwrap();
                if let Some(reply) = replies.next() {
                    socket.send_to(reply.as_bytes(), peer).await.unwrap();
                }
            }
        });
        addr
    }

    async fn transport(addr: SocketAddr) -> Transport {
        Transport::connect("127.0.0.1", addr.port(), Duration::from_millis(100))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_consumes_echo() {
        let addr = scripted_peer(vec!["RCV:1 FRQ 100.000000\r\n"]).await;
        let t = transport(addr).await;
        let reply = t
            .send(&ModuleId::new("RCV", 1).query("FRQ"), true, true)
            .await
            .unwrap();
        assert_eq!(reply, "RCV:1 FRQ 100.000000");
        assert_eq!(t.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_set_with_unexpected_output() {
        let addr = scripted_peer(vec!["RCV:1 FRQ ERR E_RANGE\n"]).await;
        let t = transport(addr).await;
        let err = t
            .send(&ModuleId::new("RCV", 1).set("FRQ").arg("9999"), true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::UnexpectedOutput { ref reply, .. } if reply.contains("ERR")));
    }

    #[tokio::test]
    async fn test_missing_reply_tolerated_for_sets() {
        let addr = scripted_peer(vec![]).await;
        let t = transport(addr).await;
        let reply = t
            .send(&ModuleId::global("CON").set("ECH").arg("1"), true, false)
            .await
            .unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_missing_reply_is_timeout_for_queries() {
        let addr = scripted_peer(vec![]).await;
        let t = transport(addr).await;
        let err = t
            .send(&ModuleId::global("CON").query("IDN"), true, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::TransportTimeout {
                phase: Phase::AwaitingReply,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_echo_is_timeout() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let t = transport(silent.local_addr().unwrap()).await;
        let err = t
            .send(&ModuleId::global("CON").query("IDN"), true, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::TransportTimeout {
                phase: Phase::AwaitingEcho,
                ..
            }
        ));
        drop(silent);
    }

    #[tokio::test]
    async fn test_flush_discards_stale_datagrams() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let t = transport(peer.local_addr().unwrap()).await;
        let client = {
            // learn the transport's address from its first datagram
            t.set_timeout(Duration::from_millis(40)).await;
            let _ = t.send_raw("CON IDN?").await;
            let mut buf = [0u8; 64];
            let (_, from) = peer.recv_from(&mut buf).await.unwrap();
            from
        };
        peer.send_to(b"stale one\n", client).await.unwrap();
        peer.send_to(b"stale two\n", client).await.unwrap();
        let discarded = t.flush(2).await.unwrap();
        assert_eq!(discarded, 2);
        assert_eq!(t.timeout().await, Duration::from_millis(40));
    }

    /// A peer whose first reply arrives after `delay`, then answers promptly
    async fn late_peer(delay: Duration, replies: Vec<&'static str>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let mut replies = replies.into_iter();
            let mut first = true;
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let line = String::from_utf8_lossy(&buf[..n]).into_owned();
                if line.trim().is_empty() {
                    continue;
                }
                socket.send_to(line.as_bytes(), peer).await.unwrap();
                if first {
                    tokio::time::sleep(delay).await;
                    first = false;
                }
                if let Some(reply) = replies.next() {
                    socket.send_to(reply.as_bytes(), peer).await.unwrap();
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_late_reply_does_not_shift_later_exchanges() {
        let addr = late_peer(
            Duration::from_millis(150),
            vec!["RCV:1 FRQ 100.000000\n", "RCV:1 ATN 10\n", "RCV:1 GAI 3\n"],
        )
        .await;
        let t = transport(addr).await;
        let rcv = ModuleId::new("RCV", 1);

        let err = t.send(&rcv.query("FRQ"), true, true).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::TransportTimeout {
                phase: Phase::AwaitingReply,
                ..
            }
        ));
        assert_eq!(t.phase().await, Phase::Error);

        let reply = t.send(&rcv.query("ATN"), true, true).await.unwrap();
        assert_eq!(reply, "RCV:1 ATN 10");
        assert_eq!(t.phase().await, Phase::Idle);
        let reply = t.send(&rcv.query("GAI"), true, true).await.unwrap();
        assert_eq!(reply, "RCV:1 GAI 3");
    }

    #[tokio::test]
    async fn test_stale_datagram_before_echo_is_skipped() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let t = transport(peer.local_addr().unwrap()).await;
        let rcv = ModuleId::new("RCV", 1);
        let request = tokio::spawn(async move { t.send(&rcv.query("ATN"), true, true).await });

        let mut buf = [0u8; 64];
        let (n, client) = peer.recv_from(&mut buf).await.unwrap();
        peer.send_to(b"RCV:1 FRQ 100.000000\n", client).await.unwrap();
        peer.send_to(&buf[..n], client).await.unwrap();
        peer.send_to(b"RCV:1 FRQ 100.000000\n", client).await.unwrap();
        peer.send_to(b"RCV:1 ATN 10\n", client).await.unwrap();

        assert_eq!(request.await.unwrap().unwrap(), "RCV:1 ATN 10");
    }

    #[test]
    fn test_answers_matches_module_and_verb() {
        assert!(answers("RCV:1 FRQ?", "RCV:1 FRQ 100.0"));
        assert!(answers("RCV:1 FRQ 100", ""));
        assert!(answers("RCV:x FRQ?", "RCV:x ERR E_SYNTAX"));
        assert!(answers("CON CFG? BATCH", "CON CFG BATCH x.bat"));
        assert!(!answers("RCV:1 ATN?", "RCV:1 FRQ 100.0"));
        assert!(!answers("RCV:1 ATN?", "RCV:1 ATN?"));
        assert!(!answers("RCV:1 ATN?", "RCV:2 ATN 10"));
    }
}
