//! Readiness registry on top of the OS poller.
//!
//! [`Poller`] pairs the platform selector (epoll on Linux, kqueue on the BSDs
//! and macOS) with the registry mapping every watched handle to its interest
//! and its payload. The registry is the single source of truth: a handle is
//! only ever reported by [`Poller::poll`] while it has an entry, and each entry
//! carries a [`Token`] whose generation lets callers discard readiness that
//! outlived its registration.
//!
//! Besides the registered handles, the selector watches a private wake source.
//! Triggering it through a waker makes a blocked poll return an empty
//! batch; it never shows up as readiness.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
use epoll::Selector;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::Waker;

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
mod kqueue;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
use kqueue::Selector;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub(crate) use kqueue::Waker;

use crate::config::DEFAULT_MAX_EVENTS;
use crate::error::{ReactorError, Result};
use crate::reactor::interest::Interest;

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::{trace, warn};

/// Identifies one registration of a handle.
///
/// The low half is the handle, the high half a generation that changes on
/// every registration, so a handle number reused after a close gets a
/// different token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    fn new(handle: RawFd, generation: u32) -> Self {
        Self(((generation as u64) << 32) | handle as u32 as u64)
    }

    pub fn handle(self) -> RawFd {
        self.0 as u32 as RawFd
    }
}

/// A registered handle that is ready for at least one of its interests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub ready: Interest,
}

impl Readiness {
    pub fn handle(&self) -> RawFd {
        self.token.handle()
    }
}

struct Registration<T> {
    token: Token,
    interest: Interest,
    value: T,
}

/// Registry of watched handles plus the OS readiness primitive.
pub struct Poller<T> {
    selector: Selector,
    registry: HashMap<RawFd, Registration<T>>,
    next_generation: u32,
    ready: Vec<(Token, Interest)>,
}

impl<T> Poller<T> {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Creates a poller fetching at most `max_events` readiness events per poll.
    pub fn with_capacity(max_events: usize) -> Result<Self> {
        Ok(Self {
            selector: Selector::new(max_events)?,
            registry: HashMap::new(),
            next_generation: 0,
            ready: Vec::with_capacity(max_events),
        })
    }

    /// A handle that interrupts a blocked [`poll`](Self::poll) from any thread.
    pub(crate) fn waker(&self) -> Waker {
        self.selector.waker()
    }

    /// Starts watching `handle` for `interest`, associating `value` with it.
    ///
    /// # Errors
    /// [`ReactorError::DuplicateHandle`] if the handle already has an entry;
    /// [`ReactorError::Io`] if the OS refuses the handle.
    pub fn register(&mut self, handle: RawFd, interest: Interest, value: T) -> Result<Token> {
        if self.registry.contains_key(&handle) {
            return Err(ReactorError::DuplicateHandle(handle));
        }

        let token = Token::new(handle, self.next_generation);
        self.next_generation = self.next_generation.wrapping_add(1);

        self.selector.register(handle, token, interest)?;
        self.registry.insert(
            handle,
            Registration {
                token,
                interest,
                value,
            },
        );
        trace!(handle, ?interest, "registered");

        Ok(token)
    }

    /// Stops watching `handle` and hands back its payload.
    ///
    /// The entry is gone before this returns, so dropping the payload (and
    /// with it the socket) afterwards can never leave a stale registration.
    pub fn unregister(&mut self, handle: RawFd) -> Result<T> {
        let registration = self
            .registry
            .remove(&handle)
            .ok_or(ReactorError::UnknownHandle(handle))?;

        if let Err(err) = self.selector.deregister(handle) {
            warn!(handle, %err, "failed to remove handle from the OS poller");
        }
        trace!(handle, "unregistered");

        Ok(registration.value)
    }

    /// Changes the events watched on `handle`, keeping its payload and token.
    pub fn update_interest(&mut self, handle: RawFd, interest: Interest) -> Result<()> {
        let registration = self
            .registry
            .get_mut(&handle)
            .ok_or(ReactorError::UnknownHandle(handle))?;

        if registration.interest == interest {
            return Ok(());
        }

        self.selector
            .reregister(handle, registration.token, interest)?;
        registration.interest = interest;
        trace!(handle, ?interest, "interest updated");

        Ok(())
    }

    /// Blocks for at most `timeout` (forever when `None`) and returns the
    /// registered handles that are ready.
    ///
    /// A timeout with nothing ready returns an empty list. Readiness is
    /// narrowed to each handle's registered interest, and notifications for
    /// handles that are no longer registered are dropped.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<Readiness>> {
        self.selector.select(timeout, &mut self.ready)?;

        let mut batch = Vec::with_capacity(self.ready.len());
        for &(token, reported) in &self.ready {
            let Some(registration) = self.registry.get(&token.handle()) else {
                trace!(handle = token.handle(), "dropping readiness for unregistered handle");
                continue;
            };

            if registration.token != token {
                trace!(handle = token.handle(), "dropping readiness from a previous registration");
                continue;
            }

            let ready = reported & registration.interest;
            if !ready.is_empty() {
                batch.push(Readiness { token, ready });
            }
        }

        Ok(batch)
    }

    /// Payload of the registration identified by `token`, if it is current.
    pub fn get(&self, token: Token) -> Option<&T> {
        self.registry
            .get(&token.handle())
            .filter(|registration| registration.token == token)
            .map(|registration| &registration.value)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        self.registry
            .get_mut(&token.handle())
            .filter(|registration| registration.token == token)
            .map(|registration| &mut registration.value)
    }

    pub fn token(&self, handle: RawFd) -> Option<Token> {
        self.registry.get(&handle).map(|registration| registration.token)
    }

    pub fn interest(&self, handle: RawFd) -> Option<Interest> {
        self.registry
            .get(&handle)
            .map(|registration| registration.interest)
    }

    pub fn contains(&self, handle: RawFd) -> bool {
        self.registry.contains_key(&handle)
    }

    pub fn handles(&self) -> Vec<RawFd> {
        self.registry.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Unregisters every handle, returning the payloads in no particular order.
    pub fn drain(&mut self) -> Vec<(RawFd, T)> {
        let handles = self.handles();
        let mut drained = Vec::with_capacity(handles.len());

        for handle in handles {
            if let Ok(value) = self.unregister(handle) {
                drained.push((handle, value));
            }
        }

        drained
    }
}
