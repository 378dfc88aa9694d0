//! TCP listener for accepting incoming connections.
//!
//! Provides a non-blocking [`TcpListener`] for the server role.
//!
//! # Usage
//!
//! ```no_run
//! use multiconn::net::tcp_listener::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap(), 2).unwrap();
//! println!("Listening on {}", listener.local_addr().unwrap());
//!
//! match listener.accept() {
//!     Ok((stream, peer_addr)) => println!("New connection from {}", peer_addr),
//!     Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
//!     Err(err) => eprintln!("accept failed: {err}"),
//! }
//! ```
use crate::net::tcp_stream::{TcpStream, suppress_sigpipe};
use crate::net::utils::{
    cvt, set_nonblocking, set_option, sockaddr_to_socketaddr, socketaddr_to_sockaddr,
    stream_socket,
};

use libc::{
    SO_REUSEADDR, SOL_SOCKET, bind, close, getsockname, listen, sockaddr, sockaddr_storage,
    socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

/// A TCP listener that accepts incoming connections.
///
/// `TcpListener` binds to an address and queues incoming connections in the
/// kernel backlog. Each call to [`Self::accept`] takes one of them and returns
/// a new non-blocking [`TcpStream`] and the peer's address.
///
/// # Non-blocking
///
/// All operations are non-blocking. If no connection is pending, `accept`
/// fails with [`io::ErrorKind::WouldBlock`].
#[derive(Debug)]
pub struct TcpListener {
    file_descriptor: RawFd,
}

impl TcpListener {
    /// Binds a listener to the given address.
    ///
    /// This method performs the following:
    /// 1. Creates a new close-on-exec socket with `SO_REUSEADDR`
    /// 2. Sets it to non-blocking mode
    /// 3. Binds to the specified address
    /// 4. Starts listening with the given backlog
    ///
    /// # Arguments
    /// * `address` - Address to bind to; port 0 picks an ephemeral port
    /// * `backlog` - Number of not-yet-accepted connections the kernel may queue
    pub fn bind(address: SocketAddr, backlog: i32) -> io::Result<Self> {
        let file_descriptor = stream_socket(&address)?;
        let listener = Self { file_descriptor };

        set_option(file_descriptor, SOL_SOCKET, SO_REUSEADDR, 1)?;
        set_nonblocking(file_descriptor)?;

        let (storage, length) = socketaddr_to_sockaddr(&address);
        cvt(unsafe {
            bind(
                file_descriptor,
                &storage as *const sockaddr_storage as *const sockaddr,
                length,
            )
        })?;

        cvt(unsafe { listen(file_descriptor, backlog) })?;

        Ok(listener)
    }

    /// Accepts one pending connection.
    ///
    /// The returned stream is close-on-exec and switched to non-blocking mode
    /// before it is handed out, so no I/O on it can stall the caller.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

        let client_file_descriptor = accept_cloexec(
            self.file_descriptor,
            &mut storage as *mut _ as *mut sockaddr,
            &mut length,
        )?;
        let stream = TcpStream::from_raw(client_file_descriptor);

        set_nonblocking(client_file_descriptor)?;
        suppress_sigpipe(client_file_descriptor)?;

        Ok((stream, sockaddr_to_socketaddr(&storage)?))
    }

    /// Returns the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;
        cvt(unsafe {
            getsockname(
                self.file_descriptor,
                &mut storage as *mut _ as *mut sockaddr,
                &mut length,
            )
        })?;

        sockaddr_to_socketaddr(&storage)
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.file_descriptor
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        unsafe {
            close(self.file_descriptor);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn accept_cloexec(
    listener: RawFd,
    address: *mut sockaddr,
    length: &mut socklen_t,
) -> io::Result<RawFd> {
    cvt(unsafe { libc::accept4(listener, address, length, libc::SOCK_CLOEXEC) })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn accept_cloexec(
    listener: RawFd,
    address: *mut sockaddr,
    length: &mut socklen_t,
) -> io::Result<RawFd> {
    let file_descriptor = cvt(unsafe { libc::accept(listener, address, length) })?;
    if let Err(err) = crate::net::utils::set_cloexec(file_descriptor) {
        unsafe { close(file_descriptor) };
        return Err(err);
    }

    Ok(file_descriptor)
}
