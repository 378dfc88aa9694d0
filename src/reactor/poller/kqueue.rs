use super::Token;
use crate::net::utils::{cvt, set_cloexec};
use crate::reactor::interest::Interest;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER,
    EVFILT_WRITE, NOTE_TRIGGER, kevent, kqueue, timespec,
};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// Ident of the user event that interrupts a blocked wait. User events live
/// in their own filter, so the ident cannot clash with a socket.
const WAKE_IDENT: RawFd = 0;

/// kqueue instance with one read and one write filter per handle.
pub(crate) struct Selector {
    kqueue: Arc<OwnedFd>,
    events: Vec<kevent>,
}

/// Interrupts a blocked [`Selector::select`] from any thread.
#[derive(Clone, Debug)]
pub(crate) struct Waker {
    kqueue: Arc<OwnedFd>,
}

impl Waker {
    pub(crate) fn wake(&self) -> io::Result<()> {
        let mut trigger = change(WAKE_IDENT, EVFILT_USER, 0, Token(0));
        trigger.fflags = NOTE_TRIGGER;

        apply_to(self.kqueue.as_raw_fd(), trigger)
    }
}

impl Selector {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let raw = cvt(unsafe { kqueue() })?;
        let kqueue = Arc::new(unsafe { OwnedFd::from_raw_fd(raw) });
        set_cloexec(raw)?;

        let events = vec![unsafe { mem::zeroed::<kevent>() }; capacity.max(1)];
        let selector = Self { kqueue, events };
        selector.apply(change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_CLEAR, Token(0)))?;

        Ok(selector)
    }

    pub(crate) fn waker(&self) -> Waker {
        Waker {
            kqueue: Arc::clone(&self.kqueue),
        }
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        if interest.is_readable() {
            self.apply(change(fd, EVFILT_READ, EV_ADD | EV_ENABLE, token))?;
        }
        if interest.is_writable() {
            self.apply(change(fd, EVFILT_WRITE, EV_ADD | EV_ENABLE, token))?;
        }

        Ok(())
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        for (filter, wanted) in [
            (EVFILT_READ, interest.is_readable()),
            (EVFILT_WRITE, interest.is_writable()),
        ] {
            if wanted {
                self.apply(change(fd, filter, EV_ADD | EV_ENABLE, token))?;
            } else {
                self.apply_ignoring_missing(change(fd, filter, EV_DELETE, token))?;
            }
        }

        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.apply_ignoring_missing(change(fd, EVFILT_READ, EV_DELETE, Token(0)))?;
        self.apply_ignoring_missing(change(fd, EVFILT_WRITE, EV_DELETE, Token(0)))
    }

    /// Waits for readiness and appends one `(token, ready)` pair per handle,
    /// merging the separate read and write filters of the same handle.
    ///
    /// An interrupted wait yields no events rather than an error.
    pub(crate) fn select(
        &mut self,
        timeout: Option<Duration>,
        ready: &mut Vec<(Token, Interest)>,
    ) -> io::Result<()> {
        ready.clear();

        let ts = timeout.map(|duration| timespec {
            tv_sec: duration.as_secs().min(i64::MAX as u64) as _,
            tv_nsec: duration.subsec_nanos() as _,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const timespec);

        let n_events = unsafe {
            kevent(
                self.kqueue.as_raw_fd(),
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                ts_ptr,
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
            let token = Token(event.udata as usize as u64);
            let mut interest = match event.filter {
                EVFILT_READ => Interest::READABLE,
                EVFILT_WRITE => Interest::WRITABLE,
                _ => continue,
            };
            // Hangups and errors surface through whichever handler runs first.
            if event.flags & (EV_EOF | EV_ERROR) != 0 {
                interest = Interest::BOTH;
            }

            match ready.iter_mut().find(|(existing, _)| *existing == token) {
                Some((_, merged)) => *merged |= interest,
                None => ready.push((token, interest)),
            }
        }

        Ok(())
    }

    fn apply(&self, change: kevent) -> io::Result<()> {
        apply_to(self.kqueue.as_raw_fd(), change)
    }

    fn apply_ignoring_missing(&self, change: kevent) -> io::Result<()> {
        match self.apply(change) {
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }
}

fn apply_to(kqueue: RawFd, change: kevent) -> io::Result<()> {
    cvt(unsafe { kevent(kqueue, &change, 1, ptr::null_mut(), 0, ptr::null()) })?;

    Ok(())
}

fn change(fd: RawFd, filter: i16, flags: u16, token: Token) -> kevent {
    let mut event: kevent = unsafe { mem::zeroed() };
    event.ident = fd as usize;
    event.filter = filter as _;
    event.flags = flags as _;
    event.udata = token.0 as usize as *mut _;

    event
}
