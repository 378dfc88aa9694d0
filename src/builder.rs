//! Fluent builder for Reactor construction.
//!
//! Provides a builder pattern interface for creating and configuring Reactor instances.

use crate::cancel::Canceller;
use crate::config::ReactorConfig;
use crate::error::Result;
use crate::reactor::core::Reactor;

use std::time::Duration;

/// Builder for constructing Reactor instances with fluent API.
///
/// # Example
/// ```no_run
/// use multiconn::ReactorBuilder;
/// use std::time::Duration;
///
/// let reactor = ReactorBuilder::new()
///     .poll_timeout(Some(Duration::from_millis(250)))
///     .backlog(16)
///     .build()
///     .expect("reactor");
/// ```
#[derive(Debug, Default)]
pub struct ReactorBuilder {
    config: ReactorConfig,
    canceller: Option<Canceller>,
}

impl ReactorBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder whose defaults are overridden by `MULTICONN_*`
    /// environment variables.
    pub fn from_env() -> Self {
        Self::with_config(ReactorConfig::from_env())
    }

    pub fn with_config(config: ReactorConfig) -> Self {
        Self {
            config,
            canceller: None,
        }
    }

    /// Sets the upper bound on bytes received per readable event.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets how long one poll may block. `None` blocks until a handle is ready.
    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn max_events(mut self, max_events: usize) -> Self {
        self.config.max_events = max_events.max(1);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    pub fn max_outbound_bytes(mut self, max_outbound_bytes: usize) -> Self {
        self.config.max_outbound_bytes = max_outbound_bytes;
        self
    }

    pub fn max_stalled_writes(mut self, max_stalled_writes: u32) -> Self {
        self.config.max_stalled_writes = max_stalled_writes;
        self
    }

    /// Shares an existing cancellation flag with the reactor being built.
    pub fn canceller(mut self, canceller: Canceller) -> Self {
        self.canceller = Some(canceller);
        self
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Builds the reactor, creating its OS poller.
    ///
    /// # Errors
    /// Fails when the readiness primitive cannot be created (for example when
    /// the process is out of file descriptors).
    pub fn build(self) -> Result<Reactor> {
        Reactor::with_canceller(self.config, self.canceller.unwrap_or_default())
    }
}
