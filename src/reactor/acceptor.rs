use crate::error::Result;
use crate::net::tcp_listener::TcpListener;
use crate::net::tcp_stream::TcpStream;
use crate::reactor::connection::Connection;

use libc::{ECONNABORTED, EMFILE, ENFILE, ENOBUFS, ENOMEM};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use tracing::{info, trace, warn};

/// The server role's listening socket.
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    local_address: SocketAddr,
}

impl Acceptor {
    pub fn bind(address: SocketAddr, backlog: i32) -> Result<Self> {
        let listener = TcpListener::bind(address, backlog)?;
        let local_address = listener.local_addr()?;

        Ok(Self {
            listener,
            local_address,
        })
    }

    pub fn handle(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_address
    }

    /// Accepts exactly one pending connection, if any.
    ///
    /// Failures only concern the connection being accepted, so they are logged
    /// and reported as [`AcceptOutcome::Skipped`]; the listener keeps running.
    pub fn accept(&self) -> AcceptOutcome {
        match self.listener.accept() {
            Ok((stream, peer_address)) => {
                info!(peer = %peer_address, "accepted connection");
                AcceptOutcome::Accepted(Connection::server(stream, peer_address))
            }
            Err(err) if is_spurious(&err) => {
                trace!(%err, "nothing to accept");
                AcceptOutcome::Skipped
            }
            Err(err) if is_exhaustion(&err) => AcceptOutcome::Exhausted(err),
            Err(err) => {
                warn!(%err, "accept failed");
                AcceptOutcome::Skipped
            }
        }
    }
}

/// What one accept attempt produced.
#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted(Connection<TcpStream>),
    /// Nothing was pending, or only the connection being accepted failed.
    Skipped,
    /// Out of descriptors or kernel memory. The connection is still waiting in
    /// the backlog and the listener stays readable until resources free up.
    Exhausted(io::Error),
}

fn is_spurious(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(ECONNABORTED)
}

fn is_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(EMFILE) | Some(ENFILE) | Some(ENOBUFS) | Some(ENOMEM)
    )
}
