//! Per-connection state and the read/write handlers.
//!
//! A [`Connection`] is either a server peer (everything it reads is queued to
//! be echoed back) or a client peer (it sends its own queue of messages and
//! finishes once the expected number of bytes came back). The handlers never
//! touch the registry: they report an [`Outcome`] and the interest they want
//! next, and the dispatcher applies both.

use crate::config::ReactorConfig;
use crate::net::Socket;
use crate::reactor::interest::Interest;

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, trace};

/// What a registry entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    ServerPeer,
    ClientPeer,
}

/// Lifecycle of a peer connection.
///
/// `Connecting` only applies to client peers. `Closing` lasts from the handler
/// deciding to close until the dispatcher unregisters the handle; `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Established,
    Closing,
    Closed,
}

/// Why a connection is being torn down.
#[derive(Debug, Error)]
pub enum CloseReason {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("all expected bytes were received")]
    Completed,

    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("echo backlog exceeded {limit} bytes")]
    BacklogExceeded { limit: usize },

    #[error("no send progress after {attempts} attempts")]
    WriteStalled { attempts: u32 },
}

impl CloseReason {
    /// Whether the close was caused by a failure rather than normal completion.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::PeerClosed | Self::Completed)
    }
}

/// Result of one handler invocation.
#[derive(Debug)]
pub enum Outcome {
    Continue,
    Close(CloseReason),
}

impl Outcome {
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

#[derive(Debug)]
enum Peer {
    Server,
    Client(ClientProgress),
}

#[derive(Debug)]
struct ClientProgress {
    id: usize,
    pending: VecDeque<Vec<u8>>,
    expected_total: u64,
}

/// One accepted or dialed TCP endpoint.
#[derive(Debug)]
pub struct Connection<S> {
    socket: S,
    state: ConnectionState,
    peer_address: SocketAddr,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    bytes_received: u64,
    bytes_sent: u64,
    stalled_writes: u32,
    peer: Peer,
}

impl<S: Socket> Connection<S> {
    /// An accepted connection, ready for I/O.
    pub fn server(socket: S, peer_address: SocketAddr) -> Self {
        Self::new(socket, ConnectionState::Established, peer_address, Peer::Server)
    }

    /// An outbound connection whose connect is still in flight.
    ///
    /// The connection gets its own copy of `messages`; they are sent in order,
    /// one whole message at a time.
    pub fn client(socket: S, peer_address: SocketAddr, id: usize, messages: &[Vec<u8>]) -> Self {
        let pending: VecDeque<Vec<u8>> = messages.iter().cloned().collect();
        let expected_total = pending.iter().map(|message| message.len() as u64).sum();

        Self::new(
            socket,
            ConnectionState::Connecting,
            peer_address,
            Peer::Client(ClientProgress {
                id,
                pending,
                expected_total,
            }),
        )
    }

    fn new(socket: S, state: ConnectionState, peer_address: SocketAddr, peer: Peer) -> Self {
        Self {
            socket,
            state,
            peer_address,
            inbound: Vec::new(),
            outbound: Vec::new(),
            bytes_received: 0,
            bytes_sent: 0,
            stalled_writes: 0,
            peer,
        }
    }

    /// Handles read readiness with a single bounded receive into `scratch`.
    pub fn on_readable(&mut self, scratch: &mut [u8], config: &ReactorConfig) -> Outcome {
        if self.is_finished() {
            return Outcome::Continue;
        }

        let received = match self.socket.recv(scratch) {
            Ok(0) => return self.begin_close(CloseReason::PeerClosed),
            Ok(received) => received,
            Err(err) if is_transient(&err) => {
                trace!(peer = %self.peer_address, "spurious read readiness");
                return Outcome::Continue;
            }
            Err(err) if self.state == ConnectionState::Connecting => {
                return self.begin_close(CloseReason::ConnectFailed(err));
            }
            Err(err) => return self.begin_close(CloseReason::Socket(err)),
        };

        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Established;
        }

        let chunk = &scratch[..received];
        self.inbound.extend_from_slice(chunk);
        self.bytes_received += received as u64;

        match &self.peer {
            Peer::Server => {
                debug!(peer = %self.peer_address, bytes = received, "received");
                let queued = self.outbound.len() + self.inbound.len();
                if queued > config.max_outbound_bytes {
                    return self.begin_close(CloseReason::BacklogExceeded {
                        limit: config.max_outbound_bytes,
                    });
                }

                self.outbound.append(&mut self.inbound);
                Outcome::Continue
            }
            Peer::Client(progress) => {
                debug!(
                    id = progress.id,
                    data = ?String::from_utf8_lossy(chunk),
                    "received from connection"
                );
                if self.bytes_received >= progress.expected_total {
                    return self.begin_close(CloseReason::Completed);
                }

                Outcome::Continue
            }
        }
    }

    /// Handles write readiness: confirms a pending connect, refills the
    /// outbound buffer from the message queue, and sends what the socket
    /// accepts, keeping the unsent suffix.
    pub fn on_writable(&mut self, config: &ReactorConfig) -> Outcome {
        if self.is_finished() {
            return Outcome::Continue;
        }

        if self.state == ConnectionState::Connecting {
            match self.socket.take_error() {
                Ok(None) => {
                    self.state = ConnectionState::Established;
                    debug!(peer = %self.peer_address, "connect completed");
                }
                Ok(Some(err)) | Err(err) => {
                    return self.begin_close(CloseReason::ConnectFailed(err));
                }
            }

            if self.bytes_expected() == Some(0) {
                return self.begin_close(CloseReason::Completed);
            }
        }

        if self.outbound.is_empty() {
            if let Peer::Client(progress) = &mut self.peer {
                if let Some(message) = progress.pending.pop_front() {
                    self.outbound = message;
                }
            }
        }

        if self.outbound.is_empty() {
            return Outcome::Continue;
        }

        match self.socket.send(&self.outbound) {
            Ok(0) => {
                self.stalled_writes += 1;
                if self.stalled_writes > config.max_stalled_writes {
                    return self.begin_close(CloseReason::WriteStalled {
                        attempts: self.stalled_writes,
                    });
                }

                trace!(peer = %self.peer_address, stalled = self.stalled_writes, "send made no progress");
                Outcome::Continue
            }
            Ok(sent) => {
                let sent = sent.min(self.outbound.len());
                if let Peer::Client(progress) = &self.peer {
                    debug!(
                        id = progress.id,
                        data = ?String::from_utf8_lossy(&self.outbound[..sent]),
                        "sending to connection"
                    );
                } else {
                    debug!(peer = %self.peer_address, bytes = sent, "echoed");
                }

                self.outbound.drain(..sent);
                self.bytes_sent += sent as u64;
                self.stalled_writes = 0;
                Outcome::Continue
            }
            Err(err) if is_transient(&err) => {
                trace!(peer = %self.peer_address, "spurious write readiness");
                Outcome::Continue
            }
            Err(err) => self.begin_close(CloseReason::Socket(err)),
        }
    }

    /// Interest this connection needs next: writability only while a connect
    /// is in flight or something is left to send.
    pub fn wants(&self) -> Interest {
        let has_pending = match &self.peer {
            Peer::Client(progress) => !progress.pending.is_empty(),
            Peer::Server => false,
        };

        if self.state == ConnectionState::Connecting || !self.outbound.is_empty() || has_pending {
            Interest::BOTH
        } else {
            Interest::READABLE
        }
    }

    pub fn role(&self) -> Role {
        match self.peer {
            Peer::Server => Role::ServerPeer,
            Peer::Client(_) => Role::ClientPeer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.peer_address
    }

    /// Client connection number, `None` for server peers.
    pub fn id(&self) -> Option<usize> {
        match &self.peer {
            Peer::Client(progress) => Some(progress.id),
            Peer::Server => None,
        }
    }

    /// Bytes a client expects back, `None` for server peers.
    pub fn bytes_expected(&self) -> Option<u64> {
        match &self.peer {
            Peer::Client(progress) => Some(progress.expected_total),
            Peer::Server => None,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Bytes received and not yet consumed. Server peers move everything into
    /// the outbound buffer right away, so this only grows for clients.
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    pub fn pending_messages(&self) -> usize {
        match &self.peer {
            Peer::Client(progress) => progress.pending.len(),
            Peer::Server => 0,
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn begin_close(&mut self, reason: CloseReason) -> Outcome {
        self.state = ConnectionState::Closing;
        Outcome::Close(reason)
    }

    fn is_finished(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed
        )
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
