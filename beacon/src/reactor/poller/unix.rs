//! Thin socket syscall layer.
//!
//! Every wrapper turns the C return convention into an `io::Result`
//! carrying `errno`. Descriptors are created with `CLOEXEC`.

use libc::{c_int, c_void, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem, ptr};

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn cvt_len(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Reads into `buffer`. The descriptor must be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    cvt_len(unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len()) })
}

/// Writes `buffer` to a socket.
///
/// `MSG_NOSIGNAL` turns a reset peer into `EPIPE` instead of `SIGPIPE`.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt_len(unsafe {
        libc::send(
            fd,
            buffer.as_ptr() as *const c_void,
            buffer.len(),
            libc::MSG_NOSIGNAL,
        )
    })
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

fn set_flag(fd: RawFd, level: c_int, name: c_int, on: bool) -> io::Result<()> {
    let value = c_int::from(on);

    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })?;

    Ok(())
}

/// Creates a blocking listening socket bound to `address`.
///
/// `SO_REUSEADDR` is set, and IPv6 sockets also accept IPv4 clients.
/// The socket stays blocking: the acceptor parks in `accept(2)`.
pub(crate) fn sys_listen(address: SocketAddr, backlog: u32) -> io::Result<RawFd> {
    let domain = match address {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    let fd = cvt(unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) })?;

    let setup = || -> io::Result<()> {
        set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, true)?;
        if domain == libc::AF_INET6 {
            set_flag(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, false)?;
        }

        let (storage, len) = to_raw(address);
        cvt(unsafe { libc::bind(fd, &storage as *const sockaddr_storage as *const sockaddr, len) })?;

        let backlog = backlog.min(c_int::MAX as u32) as c_int;
        cvt(unsafe { libc::listen(fd, backlog) })?;
        Ok(())
    };

    if let Err(e) = setup() {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

/// Blocks until a client connects. The returned socket is non-blocking.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client = cvt(unsafe {
        libc::accept4(
            fd,
            &mut storage as *mut sockaddr_storage as *mut sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        )
    })?;

    match from_raw(&storage) {
        Ok(peer) => Ok((client, peer)),
        Err(e) => {
            sys_close(client);
            Err(e)
        }
    }
}

pub(crate) fn sys_local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe {
        libc::getsockname(
            fd,
            &mut storage as *mut sockaddr_storage as *mut sockaddr,
            &mut len,
        )
    })?;

    from_raw(&storage)
}

pub(crate) fn sys_shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };

    cvt(unsafe { libc::shutdown(fd, how) })?;
    Ok(())
}

fn from_raw(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            // SAFETY: the family says the storage holds a `sockaddr_in`.
            let raw = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr));

            Ok(SocketAddrV4::new(ip, u16::from_be(raw.sin_port)).into())
        }
        libc::AF_INET6 => {
            // SAFETY: the family says the storage holds a `sockaddr_in6`.
            let raw = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(raw.sin6_addr.s6_addr);

            Ok(SocketAddrV6::new(
                ip,
                u16::from_be(raw.sin6_port),
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            )
            .into())
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {family}"),
        )),
    }
}

fn to_raw(address: SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let target = &mut storage as *mut sockaddr_storage;

    let len = match address {
        SocketAddr::V4(v4) => {
            let raw = sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from(*v4.ip()).to_be(),
                },
                sin_zero: [0; 8],
            };
            unsafe { ptr::write(target as *mut sockaddr_in, raw) };
            mem::size_of::<sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let raw = sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe { ptr::write(target as *mut sockaddr_in6, raw) };
            mem::size_of::<sockaddr_in6>()
        }
    };

    (storage, len as socklen_t)
}
