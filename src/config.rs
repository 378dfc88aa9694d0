//! Reactor tuning knobs.
//!
//! Defaults match the demonstration programs: 1024-byte reads, a one second
//! poll timeout so cancellation is noticed promptly, and a listen backlog of 2.
//! Any of the `MULTICONN_*` variables below can override a default:
//!
//! | Variable                    | Field          |
//! |-----------------------------|----------------|
//! | `MULTICONN_CHUNK_SIZE`      | `chunk_size`   |
//! | `MULTICONN_POLL_TIMEOUT_MS` | `poll_timeout` (`0` blocks indefinitely) |
//! | `MULTICONN_MAX_EVENTS`      | `max_events`   |
//! | `MULTICONN_BACKLOG`         | `backlog`      |

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_EVENTS: usize = 64;
pub const DEFAULT_BACKLOG: i32 = 2;
pub const DEFAULT_MAX_OUTBOUND_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_STALLED_WRITES: u32 = 16;

/// Configuration consumed by [`Reactor`](crate::Reactor) and by the
/// connection handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Upper bound on bytes received per readable event.
    pub chunk_size: usize,
    /// How long one poll may block; `None` waits until a handle is ready.
    pub poll_timeout: Option<Duration>,
    /// Readiness events fetched from the OS per poll.
    pub max_events: usize,
    /// Listen backlog for the acceptor.
    pub backlog: i32,
    /// Echo backlog ceiling; a server peer exceeding it is closed.
    pub max_outbound_bytes: usize,
    /// Consecutive zero-progress sends tolerated before a connection is closed.
    pub max_stalled_writes: u32,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_timeout: Some(DEFAULT_POLL_TIMEOUT),
            max_events: DEFAULT_MAX_EVENTS,
            backlog: DEFAULT_BACKLOG,
            max_outbound_bytes: DEFAULT_MAX_OUTBOUND_BYTES,
            max_stalled_writes: DEFAULT_MAX_STALLED_WRITES,
        }
    }
}

impl ReactorConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Layers overrides obtained through `lookup` on top of `self`.
    ///
    /// Unparsable or zero values are ignored with a warning.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(chunk_size) = parse_positive::<usize>(&lookup, "MULTICONN_CHUNK_SIZE") {
            self.chunk_size = chunk_size;
        }

        if let Some(raw) = lookup("MULTICONN_POLL_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.poll_timeout = None,
                Ok(ms) => self.poll_timeout = Some(Duration::from_millis(ms)),
                Err(_) => warn!(value = %raw, "ignoring MULTICONN_POLL_TIMEOUT_MS"),
            }
        }

        if let Some(max_events) = parse_positive::<usize>(&lookup, "MULTICONN_MAX_EVENTS") {
            self.max_events = max_events;
        }

        if let Some(backlog) = parse_positive::<i32>(&lookup, "MULTICONN_BACKLOG") {
            self.backlog = backlog;
        }

        self
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid override");
            None
        }
    }
}
