use crate::builder::ReactorBuilder;
use crate::cancel::Canceller;
use crate::config::ReactorConfig;
use crate::error::{ReactorError, Result};
use crate::net::tcp_stream::TcpStream;
use crate::reactor::acceptor::{AcceptOutcome, Acceptor};
use crate::reactor::connection::{CloseReason, Connection, Outcome, Role};
use crate::reactor::dialer::Dialer;
use crate::reactor::interest::Interest;
use crate::reactor::poller::{Poller, Readiness, Token};

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How long a listener stays paused after running out of descriptors when no
/// connection closes in the meantime.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What a registry entry holds.
#[derive(Debug)]
pub enum Entry {
    Listener(Acceptor),
    Peer(Connection<TcpStream>),
}

impl Entry {
    pub fn role(&self) -> Role {
        match self {
            Entry::Listener(_) => Role::Listener,
            Entry::Peer(connection) => connection.role(),
        }
    }
}

/// Counters accumulated over the lifetime of a reactor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorStats {
    pub accepted: u64,
    pub dialed: u64,
    pub closed: u64,
    pub errors: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Single-threaded event dispatcher.
///
/// Owns the poller and every registered socket. Each [`run_once`] call polls
/// once and routes every ready handle: the listener to the acceptor, peers to
/// their read handler and then their write handler. [`run`] repeats that until
/// the registry is empty or the canceller fires.
///
/// [`run_once`]: Reactor::run_once
/// [`run`]: Reactor::run
pub struct Reactor {
    poller: Poller<Entry>,
    config: ReactorConfig,
    scratch: Vec<u8>,
    canceller: Canceller,
    stats: ReactorStats,
    paused_listeners: Vec<(RawFd, Instant)>,
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> Result<Self> {
        Self::with_canceller(config, Canceller::new())
    }

    pub fn with_canceller(config: ReactorConfig, canceller: Canceller) -> Result<Self> {
        let poller = Poller::with_capacity(config.max_events)?;
        let scratch = vec![0u8; config.chunk_size.max(1)];
        canceller.attach(poller.waker());

        Ok(Self {
            poller,
            config,
            scratch,
            canceller,
            stats: ReactorStats::default(),
            paused_listeners: Vec::new(),
        })
    }

    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    /// Binds a listener on `address` and registers it for readability.
    ///
    /// Returns the bound address, which carries the real port when `address`
    /// asked for port 0.
    pub fn listen(&mut self, address: SocketAddr) -> Result<SocketAddr> {
        let acceptor = Acceptor::bind(address, self.config.backlog)?;
        let local_address = acceptor.local_addr();

        self.poller
            .register(acceptor.handle(), Interest::READABLE, Entry::Listener(acceptor))?;
        info!(address = %local_address, backlog = self.config.backlog, "listening");

        Ok(local_address)
    }

    /// Opens `count` connections to the dialer's target.
    ///
    /// Returns the tokens of the attempts that were registered; attempts the
    /// kernel rejected immediately are logged and left out.
    pub fn dial(&mut self, dialer: &Dialer, count: usize) -> Vec<Token> {
        let tokens = dialer.start(&mut self.poller, count);
        self.stats.dialed += tokens.len() as u64;

        tokens
    }

    /// Runs until the registry is empty or cancellation is requested, then
    /// closes whatever is still registered.
    pub fn run(&mut self) -> Result<ReactorStats> {
        let timeout = self.config.poll_timeout;
        let mut result = Ok(());

        while !self.poller.is_empty() {
            if let Err(err) = self.run_once(timeout) {
                result = Err(err);
                break;
            }

            if self.canceller.is_cancelled() {
                info!("cancellation requested, shutting down");
                break;
            }
        }

        self.shutdown();
        info!(stats = ?self.stats, "reactor stopped");

        result.map(|()| self.stats)
    }

    /// Polls once and dispatches the whole batch. Returns the batch size.
    ///
    /// While a listener is paused the wait is capped so accepting resumes
    /// after the back-off even if nothing else happens.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let batch = self.poller.poll(self.cap_for_paused(timeout))?;

        for readiness in &batch {
            self.dispatch(*readiness);
        }
        self.resume_listeners(false);

        Ok(batch.len())
    }

    /// Unregisters and closes every handle. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.paused_listeners.clear();
        for (handle, entry) in self.poller.drain() {
            match entry {
                Entry::Listener(acceptor) => {
                    debug!(handle, address = %acceptor.local_addr(), "closing listener");
                }
                Entry::Peer(mut connection) => {
                    connection.mark_closed();
                    self.stats.closed += 1;
                    debug!(handle, peer = %connection.peer_address(), "closing connection");
                }
            }
        }
    }

    fn dispatch(&mut self, readiness: Readiness) {
        let role = match self.poller.get(readiness.token) {
            Some(entry) => entry.role(),
            None => {
                trace!(handle = readiness.handle(), "readiness for a closed handle");
                return;
            }
        };

        match role {
            Role::Listener => {
                if readiness.ready.is_readable() {
                    self.accept_on(readiness);
                }
            }
            Role::ServerPeer | Role::ClientPeer => self.service_connection(readiness),
        }
    }

    fn accept_on(&mut self, listener: Readiness) {
        let outcome = match self.poller.get(listener.token) {
            Some(Entry::Listener(acceptor)) => acceptor.accept(),
            _ => return,
        };

        match outcome {
            AcceptOutcome::Accepted(connection) => self.register_accepted(connection),
            AcceptOutcome::Skipped => {}
            AcceptOutcome::Exhausted(err) => self.pause_listener(listener.handle(), err),
        }
    }

    fn register_accepted(&mut self, connection: Connection<TcpStream>) {
        let handle = connection.socket().as_raw_fd();
        let peer_address = connection.peer_address();

        match self
            .poller
            .register(handle, Interest::BOTH, Entry::Peer(connection))
        {
            Ok(_) => self.stats.accepted += 1,
            Err(err) => {
                warn!(peer = %peer_address, %err, "failed to register accepted connection");
            }
        }
    }

    /// Stops watching a listener whose pending connection cannot be accepted
    /// for lack of resources. Level-triggered readiness would otherwise report
    /// it again on every poll.
    fn pause_listener(&mut self, handle: RawFd, err: io::Error) {
        if let Err(update) = self.poller.update_interest(handle, Interest::NONE) {
            warn!(handle, err = %update, "failed to pause listener");
            return;
        }

        warn!(
            handle,
            %err,
            backoff_ms = ACCEPT_BACKOFF.as_millis() as u64,
            "out of resources, pausing accepts"
        );
        self.paused_listeners.push((handle, Instant::now()));
    }

    /// Re-arms paused listeners whose back-off elapsed, or all of them when
    /// `force` is set because a descriptor was just released.
    fn resume_listeners(&mut self, force: bool) {
        if self.paused_listeners.is_empty() {
            return;
        }

        let (due, waiting): (Vec<_>, Vec<_>) = mem::take(&mut self.paused_listeners)
            .into_iter()
            .partition(|(_, since)| force || since.elapsed() >= ACCEPT_BACKOFF);
        self.paused_listeners = waiting;

        for (handle, _) in due {
            match self.poller.update_interest(handle, Interest::READABLE) {
                Ok(()) => debug!(handle, "resuming accepts"),
                Err(err) => warn!(handle, %err, "failed to resume listener"),
            }
        }
    }

    fn cap_for_paused(&self, timeout: Option<Duration>) -> Option<Duration> {
        let Some(remaining) = self
            .paused_listeners
            .iter()
            .map(|(_, since)| ACCEPT_BACKOFF.saturating_sub(since.elapsed()))
            .min()
        else {
            return timeout;
        };

        Some(timeout.map_or(remaining, |timeout| timeout.min(remaining)))
    }

    fn service_connection(&mut self, readiness: Readiness) {
        let Some(Entry::Peer(connection)) = self.poller.get_mut(readiness.token) else {
            return;
        };

        let received_before = connection.bytes_received();
        let sent_before = connection.bytes_sent();

        let mut outcome = Outcome::Continue;
        if readiness.ready.is_readable() {
            outcome = connection.on_readable(&mut self.scratch, &self.config);
        }
        // A read that closed the connection leaves nothing to write to.
        if !outcome.is_close() && readiness.ready.is_writable() {
            outcome = connection.on_writable(&self.config);
        }

        self.stats.bytes_received += connection.bytes_received() - received_before;
        self.stats.bytes_sent += connection.bytes_sent() - sent_before;
        let wants = connection.wants();

        match outcome {
            Outcome::Close(reason) => self.close_connection(readiness.handle(), reason),
            Outcome::Continue => {
                if let Err(err) = self.poller.update_interest(readiness.handle(), wants) {
                    warn!(handle = readiness.handle(), %err, "failed to update interest");
                    self.close_connection(readiness.handle(), CloseReason::Socket(into_io(err)));
                }
            }
        }
    }

    fn close_connection(&mut self, handle: RawFd, reason: CloseReason) {
        let entry = match self.poller.unregister(handle) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(handle, %err, "close requested for an unregistered handle");
                return;
            }
        };

        let Entry::Peer(mut connection) = entry else {
            return;
        };

        connection.mark_closed();
        self.stats.closed += 1;
        if reason.is_error() {
            self.stats.errors += 1;
        }

        match (connection.id(), reason.is_error()) {
            (Some(id), false) => info!(id, %reason, "closing connection"),
            (Some(id), true) => warn!(id, %reason, "closing connection"),
            (None, false) => info!(peer = %connection.peer_address(), %reason, "closing connection"),
            (None, true) => warn!(peer = %connection.peer_address(), %reason, "closing connection"),
        }

        // Dropping the connection closes its socket, after the entry is gone,
        // and frees a descriptor a paused listener can use.
        drop(connection);
        self.resume_listeners(true);
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// A handle to this reactor's cancellation flag.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn stats(&self) -> ReactorStats {
        self.stats
    }

    /// The peer connection registered under `token`, if still open.
    pub fn connection(&self, token: Token) -> Option<&Connection<TcpStream>> {
        match self.poller.get(token) {
            Some(Entry::Peer(connection)) => Some(connection),
            _ => None,
        }
    }

    /// Current peer connections, in no particular order.
    pub fn connections(&self) -> Vec<&Connection<TcpStream>> {
        self.poller
            .handles()
            .into_iter()
            .filter_map(|handle| self.poller.token(handle))
            .filter_map(|token| self.connection(token))
            .collect()
    }

    pub fn role_of(&self, handle: RawFd) -> Option<Role> {
        let token = self.poller.token(handle)?;
        self.poller.get(token).map(Entry::role)
    }

    pub fn interest_of(&self, handle: RawFd) -> Option<Interest> {
        self.poller.interest(handle)
    }

    pub fn handles(&self) -> Vec<RawFd> {
        self.poller.handles()
    }

    pub fn len(&self) -> usize {
        self.poller.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poller.is_empty()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn into_io(err: ReactorError) -> std::io::Error {
    match err {
        ReactorError::Io(err) => err,
        other => std::io::Error::other(other.to_string()),
    }
}
