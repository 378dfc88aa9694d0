//! Readiness-driven I/O reactor.
//!
//! This module provides the single-threaded event loop and its parts, leaves first:
//! - [`interest`]: readable/writable bitset
//! - [`poller`]: registry of watched handles on top of epoll or kqueue
//! - [`connection`]: per-connection state and the read/write handlers
//! - [`acceptor`]: the server role's listening socket
//! - [`dialer`]: the client role's outbound connection attempts
//! - [`core`]: the dispatcher that polls and routes readiness

pub mod acceptor;
pub mod connection;
pub mod core;
pub mod dialer;
pub mod interest;
pub mod poller;
