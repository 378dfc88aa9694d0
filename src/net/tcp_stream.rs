//! Non-blocking TCP stream owned by a registered connection.

use crate::net::Socket;
use crate::net::utils::{
    cvt, cvt_size, get_option, set_nonblocking, sockaddr_to_socketaddr, socketaddr_to_sockaddr,
    stream_socket,
};

use libc::{
    EINPROGRESS, EINTR, SO_ERROR, SOL_SOCKET, c_int, c_void, close, connect, getpeername,
    getsockname, recv, send, sockaddr, sockaddr_storage, socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

#[cfg(any(target_os = "macos", target_os = "ios"))]
const SEND_FLAGS: c_int = 0;

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

/// Result of issuing a non-blocking connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The kernel completed the handshake synchronously (common on loopback).
    Connected,
    /// The handshake is in flight; writability reports its completion.
    InProgress,
}

/// A non-blocking TCP stream.
///
/// The descriptor is closed when the stream is dropped, so whoever owns the
/// stream decides when the socket goes away.
#[derive(Debug)]
pub struct TcpStream {
    file_descriptor: RawFd,
}

impl TcpStream {
    /// Takes ownership of an already-configured descriptor.
    pub(crate) fn from_raw(file_descriptor: RawFd) -> Self {
        Self { file_descriptor }
    }

    /// Starts a non-blocking connect to `address`.
    ///
    /// An in-progress connect is reported as [`ConnectStatus::InProgress`],
    /// never as an error. Errors are reserved for attempts the kernel rejected
    /// outright.
    pub fn connect(address: SocketAddr) -> io::Result<(Self, ConnectStatus)> {
        let file_descriptor = stream_socket(&address)?;
        let stream = Self::from_raw(file_descriptor);

        set_nonblocking(file_descriptor)?;
        suppress_sigpipe(file_descriptor)?;

        let (storage, length) = socketaddr_to_sockaddr(&address);
        let ret = unsafe {
            connect(
                file_descriptor,
                &storage as *const sockaddr_storage as *const sockaddr,
                length,
            )
        };

        if ret == 0 {
            return Ok((stream, ConnectStatus::Connected));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(EINPROGRESS) | Some(EINTR) => Ok((stream, ConnectStatus::InProgress)),
            _ => Err(err),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;
        cvt(unsafe {
            getpeername(
                self.file_descriptor,
                &mut storage as *mut _ as *mut sockaddr,
                &mut length,
            )
        })?;

        sockaddr_to_socketaddr(&storage)
    }

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

impl Socket for TcpStream {
    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            recv(
                self.file_descriptor,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                0,
            )
        })
    }

    fn send(&mut self, buffer: &[u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            send(
                self.file_descriptor,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                SEND_FLAGS,
            )
        })
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        match get_option(self.file_descriptor, SOL_SOCKET, SO_ERROR)? {
            0 => Ok(None),
            code => Ok(Some(io::Error::from_raw_os_error(code))),
        }
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.file_descriptor
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        unsafe {
            close(self.file_descriptor);
        }
    }
}

/// Keeps a send on a reset connection from raising SIGPIPE.
///
/// Linux-like targets pass `MSG_NOSIGNAL` per send instead.
pub(crate) fn suppress_sigpipe(file_descriptor: RawFd) -> io::Result<()> {
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    crate::net::utils::set_option(file_descriptor, SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    let _ = file_descriptor;

    Ok(())
}
