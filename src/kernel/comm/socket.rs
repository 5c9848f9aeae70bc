/*!
 * Socket Helpers
 * Nonblocking connect and vectored sends on raw descriptors
 */

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

fn raw_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Outcome of starting a nonblocking connect
pub(crate) enum Connecting {
    Connected(OwnedFd),
    InProgress(OwnedFd),
}

pub(crate) fn connect_nonblocking(addr: &SocketAddr) -> io::Result<Connecting> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let fd = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let one: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let (storage, len) = raw_sockaddr(addr);
    let ret = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &storage as *const _ as *const libc::sockaddr,
            len,
        )
    };
    if ret == 0 {
        return Ok(Connecting::Connected(fd));
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        Ok(Connecting::InProgress(fd))
    } else {
        Err(err)
    }
}

/// Send as much of `iov` as the socket accepts right now
///
/// Sent bytes are consumed from the front of `iov`; an empty `iov` on
/// return means everything went out.
pub(crate) fn send_vectors(fd: RawFd, iov: &mut VecDeque<Bytes>) -> io::Result<usize> {
    let mut sent = 0;
    while let Some(front) = iov.front_mut() {
        if front.is_empty() {
            iov.pop_front();
            continue;
        }
        let n = unsafe {
            libc::send(
                fd,
                front.as_ptr() as *const libc::c_void,
                front.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => break,
                _ => return Err(err),
            }
        }
        sent += n as usize;
        front.advance(n as usize);
    }
    Ok(sent)
}

/// Half-close both directions so the peer sees EOF now
pub(crate) fn shutdown(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }
}

pub(crate) fn set_backlog(fd: RawFd, backlog: i32) {
    unsafe {
        libc::listen(fd, backlog);
    }
}
