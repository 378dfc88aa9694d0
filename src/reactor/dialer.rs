use crate::net::tcp_stream::{ConnectStatus, TcpStream};
use crate::reactor::connection::Connection;
use crate::reactor::core::Entry;
use crate::reactor::interest::Interest;
use crate::reactor::poller::{Poller, Token};

use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use tracing::{debug, info, warn};

/// The client role: a target and the messages every connection sends to it.
#[derive(Debug, Clone)]
pub struct Dialer {
    target: SocketAddr,
    messages: Vec<Vec<u8>>,
}

impl Dialer {
    pub fn new<I, M>(target: SocketAddr, messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Vec<u8>>,
    {
        Self {
            target,
            messages: messages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    /// Bytes each connection expects to get back.
    pub fn expected_total(&self) -> u64 {
        self.messages
            .iter()
            .map(|message| message.len() as u64)
            .sum()
    }

    /// Issues one non-blocking connect and wraps it as connection number `id`.
    ///
    /// The connection stays `Connecting` even when the kernel finished the
    /// handshake synchronously; the first writable event confirms it.
    pub fn dial(&self, id: usize) -> io::Result<Connection<TcpStream>> {
        let (stream, status) = TcpStream::connect(self.target)?;
        if status == ConnectStatus::Connected {
            debug!(id, "connect completed synchronously");
        }

        Ok(Connection::client(stream, self.target, id, &self.messages))
    }

    /// Starts `count` connections numbered `1..=count` and registers each for
    /// read and write readiness.
    ///
    /// An attempt the kernel rejects outright is logged and skipped; the
    /// remaining attempts are still issued.
    pub(crate) fn start(&self, poller: &mut Poller<Entry>, count: usize) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(count);

        for id in 1..=count {
            info!(id, target = %self.target, "starting connection");

            let connection = match self.dial(id) {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(id, target = %self.target, %err, "connect failed");
                    continue;
                }
            };

            let handle = connection.socket().as_raw_fd();
            match poller.register(handle, Interest::BOTH, Entry::Peer(connection)) {
                Ok(token) => tokens.push(token),
                Err(err) => warn!(id, %err, "failed to register connection"),
            }
        }

        tokens
    }
}
