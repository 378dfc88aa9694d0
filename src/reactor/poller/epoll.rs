use super::Token;
use crate::net::utils::cvt;
use crate::reactor::interest::Interest;

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, c_void, close, epoll_create1, epoll_ctl,
    epoll_event, epoll_wait, eventfd, read, write,
};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

/// Reserved for the wake eventfd. No registration can produce it: the low
/// half would be handle `-1`.
const WAKE_TOKEN: Token = Token(u64::MAX);

/// Level-triggered epoll instance.
pub(crate) struct Selector {
    epoll: RawFd,
    events: Vec<epoll_event>,
    wake: Arc<OwnedFd>,
}

/// Interrupts a blocked [`Selector::select`] from any thread.
#[derive(Clone, Debug)]
pub(crate) struct Waker {
    eventfd: Arc<OwnedFd>,
}

impl Waker {
    pub(crate) fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let written = unsafe {
            write(
                self.eventfd.as_raw_fd(),
                &one as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        };

        if written < 0 {
            let err = io::Error::last_os_error();
            // A saturated counter already guarantees a wake-up.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }

        Ok(())
    }
}

impl Selector {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = cvt(unsafe { epoll_create1(EPOLL_CLOEXEC) })?;
        let events = vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)];

        let raw_wake = match cvt(unsafe { eventfd(0, EFD_CLOEXEC | EFD_NONBLOCK) }) {
            Ok(fd) => fd,
            Err(err) => {
                unsafe { close(epoll) };
                return Err(err);
            }
        };
        let wake = Arc::new(unsafe { OwnedFd::from_raw_fd(raw_wake) });

        let selector = Self {
            epoll,
            events,
            wake,
        };
        selector.control(EPOLL_CTL_ADD, raw_wake, WAKE_TOKEN, Interest::READABLE)?;

        Ok(selector)
    }

    pub(crate) fn waker(&self) -> Waker {
        Waker {
            eventfd: Arc::clone(&self.wake),
        }
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_ADD, fd, token, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.control(EPOLL_CTL_MOD, fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // Kernels before 2.6.9 reject a null event pointer for EPOLL_CTL_DEL.
        let mut event = epoll_event { events: 0, u64: 0 };
        cvt(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, &mut event) })?;

        Ok(())
    }

    /// Waits for readiness and appends one `(token, ready)` pair per handle.
    ///
    /// An interrupted wait yields no events rather than an error.
    pub(crate) fn select(
        &mut self,
        timeout: Option<Duration>,
        ready: &mut Vec<(Token, Interest)>,
    ) -> io::Result<()> {
        ready.clear();

        let timeout_ms = match timeout {
            None => -1,
            Some(duration) => duration.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
        };

        let n_events = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };

        if n_events < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }

            return Err(err);
        }

        for event in self.events.iter().take(n_events as usize) {
            let bits = event.events;
            let token = Token(event.u64);
            if token == WAKE_TOKEN {
                self.drain_wake();
                continue;
            }

            let mut interest = Interest::NONE;
            if bits & (EPOLLIN | EPOLLRDHUP) as u32 != 0 {
                interest |= Interest::READABLE;
            }
            if bits & EPOLLOUT as u32 != 0 {
                interest |= Interest::WRITABLE;
            }
            // Errors and hang-ups surface through the next recv/send.
            if bits & (EPOLLERR | EPOLLHUP) as u32 != 0 {
                interest |= Interest::BOTH;
            }

            ready.push((token, interest));
        }

        Ok(())
    }

    fn drain_wake(&self) {
        let mut counter: u64 = 0;
        unsafe {
            read(
                self.wake.as_raw_fd(),
                &mut counter as *mut u64 as *mut c_void,
                mem::size_of::<u64>(),
            );
        }
    }

    fn control(&self, op: i32, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut events = 0u32;
        if interest.is_readable() {
            events |= (EPOLLIN | EPOLLRDHUP) as u32;
        }
        if interest.is_writable() {
            events |= EPOLLOUT as u32;
        }

        let mut event = epoll_event {
            events,
            u64: token.0,
        };
        cvt(unsafe { epoll_ctl(self.epoll, op, fd, &mut event) })?;

        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            close(self.epoll);
        }
    }
}
