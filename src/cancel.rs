//! Cooperative cancellation for the event loop.
//!
//! The reactor checks its [`Canceller`] once after every readiness batch. The
//! flag can be tripped from any thread, typically from a Ctrl+C handler, while
//! the reactor itself stays single-threaded. Tripping it also wakes every
//! attached poller, so a reactor blocked in a poll without timeout still
//! notices.

use crate::reactor::poller::Waker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// Shared cancellation flag.
///
/// Clones observe the same flag, so a clone handed to a signal handler stops
/// the reactor that created the original.
#[derive(Clone, Debug, Default)]
pub struct Canceller {
    shared: Arc<Shared>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the owning loop to stop after its current batch.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);

        let wakers = self
            .shared
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for waker in wakers.iter() {
            if let Err(err) = waker.wake() {
                warn!(%err, "failed to wake the poller");
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Makes [`cancel`](Self::cancel) interrupt the poller behind `waker`.
    pub(crate) fn attach(&self, waker: Waker) {
        let mut wakers = self
            .shared
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        wakers.push(waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::Poller;
    use std::time::{Duration, Instant};

    #[test]
    fn clones_share_the_flag() {
        let canceller = Canceller::new();
        let handler_copy = canceller.clone();
        assert!(!canceller.is_cancelled());

        handler_copy.cancel();
        assert!(canceller.is_cancelled());
    }

    #[test]
    fn cancel_interrupts_an_unbounded_poll() {
        let mut poller: Poller<()> = Poller::new().expect("poller");
        let canceller = Canceller::new();
        canceller.attach(poller.waker());

        let remote = canceller.clone();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let batch = poller.poll(None).expect("poll");
        trigger.join().unwrap();

        assert!(batch.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
