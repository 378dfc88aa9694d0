//! TCP networking primitives.
//!
//! This module provides the non-blocking sockets the reactor drives:
//! - [`tcp_listener`]: [`TcpListener`] for accepting connections
//! - [`tcp_stream`]: [`TcpStream`] for reading/writing data
//! - `utils`: sockaddr conversion and socket option helpers
//!
//! Connection handlers only see sockets through the [`Socket`] trait, which
//! lets them run against scripted sockets as well as real ones.
//!
//! [`TcpListener`]: tcp_listener::TcpListener
//! [`TcpStream`]: tcp_stream::TcpStream

pub mod tcp_listener;
pub mod tcp_stream;
pub(crate) mod utils;

use std::io;

/// The I/O a connection handler performs on its socket.
///
/// Implementations must be non-blocking: when no progress is possible they
/// fail with [`io::ErrorKind::WouldBlock`] instead of waiting.
pub trait Socket {
    /// Receives up to `buffer.len()` bytes. `Ok(0)` means the peer shut down.
    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    /// Sends a prefix of `buffer`, returning how many bytes were accepted.
    fn send(&mut self, buffer: &[u8]) -> io::Result<usize>;

    /// Takes the pending socket error, which is how a failed non-blocking
    /// connect is reported.
    fn take_error(&self) -> io::Result<Option<io::Error>>;
}
