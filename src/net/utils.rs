use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, O_NONBLOCK, SOCK_STREAM, c_int, c_void, fcntl,
    getsockopt, sa_family_t, setsockopt, sockaddr_in, sockaddr_in6, sockaddr_storage, socket,
    socklen_t,
};

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::ptr;

/// Maps a negative libc return value to the current OS error.
pub(crate) fn cvt(result: c_int) -> io::Result<c_int> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

pub(crate) fn cvt_size(result: isize) -> io::Result<usize> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}

pub(crate) fn set_nonblocking(file_descriptor: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { fcntl(file_descriptor, F_GETFL) })?;
    if flags & O_NONBLOCK == 0 {
        cvt(unsafe { fcntl(file_descriptor, F_SETFL, flags | O_NONBLOCK) })?;
    }

    Ok(())
}

pub(crate) fn set_option(
    file_descriptor: RawFd,
    level: c_int,
    name: c_int,
    value: c_int,
) -> io::Result<()> {
    cvt(unsafe {
        setsockopt(
            file_descriptor,
            level,
            name,
            &value as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })?;

    Ok(())
}

pub(crate) fn get_option(file_descriptor: RawFd, level: c_int, name: c_int) -> io::Result<c_int> {
    let mut value: c_int = 0;
    let mut length = mem::size_of::<c_int>() as socklen_t;
    cvt(unsafe {
        getsockopt(
            file_descriptor,
            level,
            name,
            &mut value as *mut c_int as *mut c_void,
            &mut length,
        )
    })?;

    Ok(value)
}

/// Writes `address` into a `sockaddr_storage` suitable for `bind`/`connect`.
pub(crate) fn socketaddr_to_sockaddr(address: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match address {
        SocketAddr::V4(v4) => {
            let mut sin: sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = AF_INET as sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            {
                sin.sin_len = mem::size_of::<sockaddr_in>() as u8;
            }

            unsafe { ptr::write(&mut storage as *mut _ as *mut sockaddr_in, sin) };
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let mut sin6: sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = AF_INET6 as sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            {
                sin6.sin6_len = mem::size_of::<sockaddr_in6>() as u8;
            }

            unsafe { ptr::write(&mut storage as *mut _ as *mut sockaddr_in6, sin6) };
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

pub(crate) fn sockaddr_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported address family {family}"),
        )),
    }
}

/// Linux creates every descriptor with its close-on-exec flag set, other
/// targets go through this.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_cloexec(file_descriptor: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { fcntl(file_descriptor, libc::F_GETFD) })?;
    if flags & libc::FD_CLOEXEC == 0 {
        cvt(unsafe { fcntl(file_descriptor, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    }

    Ok(())
}

/// Creates a close-on-exec TCP socket of the family of `address`.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn stream_socket(address: &SocketAddr) -> io::Result<RawFd> {
    cvt(unsafe { socket(domain_of(address), SOCK_STREAM | libc::SOCK_CLOEXEC, 0) })
}

/// Creates a close-on-exec TCP socket of the family of `address`.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn stream_socket(address: &SocketAddr) -> io::Result<RawFd> {
    let file_descriptor = cvt(unsafe { socket(domain_of(address), SOCK_STREAM, 0) })?;
    if let Err(err) = set_cloexec(file_descriptor) {
        unsafe { libc::close(file_descriptor) };
        return Err(err);
    }

    Ok(file_descriptor)
}

/// Socket domain matching the family of `address`.
pub(crate) fn domain_of(address: &SocketAddr) -> c_int {
    match address {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}
