//! Raw socket plumbing: plain `socket(2)`/`setsockopt(2)` calls rather than
//! going through `std::net` (we need `accept4` and `SOCK_NONBLOCK` at
//! creation time, which `std::net` doesn't expose).

use std::io;
use std::mem::{self, size_of};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::RawFd;

fn to_sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn from_sockaddr_in(raw: &libc::sockaddr_in) -> SocketAddrV4 {
    let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());
    SocketAddrV4::new(ip, u16::from_be(raw.sin_port))
}

/// `createNonblocking()` from Acceptor.cc: a non-blocking, close-on-exec
/// IPv4 TCP socket.
pub fn new_nonblocking_tcp_socket() -> io::Result<RawFd> {
    syscall!(socket(
        libc::AF_INET,
        libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        0,
    ))
}

pub fn bind(fd: RawFd, addr: SocketAddrV4) -> io::Result<()> {
    let raw = to_sockaddr_in(addr);
    syscall!(bind(
        fd,
        &raw as *const libc::sockaddr_in as *const libc::sockaddr,
        size_of::<libc::sockaddr_in>() as libc::socklen_t,
    ))
    .map(drop)
}

pub fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    syscall!(listen(fd, backlog)).map(drop)
}

/// `Socket::accept` + `Acceptor::handleRead`: `accept4` so the connected
/// socket is non-blocking and close-on-exec from the moment it exists.
pub fn accept(fd: RawFd) -> io::Result<(RawFd, SocketAddrV4)> {
    let mut storage: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let conn_fd = syscall!(accept4(
        fd,
        &mut storage as *mut libc::sockaddr_in as *mut libc::sockaddr,
        &mut len,
        libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
    ))?;
    Ok((conn_fd, from_sockaddr_in(&storage)))
}

pub fn local_addr(fd: RawFd) -> io::Result<SocketAddrV4> {
    let mut storage: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
    syscall!(getsockname(
        fd,
        &mut storage as *mut libc::sockaddr_in as *mut libc::sockaddr,
        &mut len,
    ))?;
    Ok(from_sockaddr_in(&storage))
}

pub fn peer_addr(fd: RawFd) -> io::Result<SocketAddrV4> {
    let mut storage: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
    syscall!(getpeername(
        fd,
        &mut storage as *mut libc::sockaddr_in as *mut libc::sockaddr,
        &mut len,
    ))?;
    Ok(from_sockaddr_in(&storage))
}

fn set_bool_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, on: bool) -> io::Result<()> {
    let val: libc::c_int = if on { 1 } else { 0 };
    syscall!(setsockopt(
        fd,
        level,
        name,
        &val as *const libc::c_int as *const libc::c_void,
        size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(drop)
}

/// `Socket::setReuseAddr`.
pub fn set_reuse_addr(fd: RawFd, on: bool) -> io::Result<()> {
    set_bool_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on)
}

/// `Socket::setReusePort`, offered on request.
pub fn set_reuse_port(fd: RawFd, on: bool) -> io::Result<()> {
    set_bool_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, on)
}

/// `Socket::setTcpNoDelay`.
pub fn set_tcp_nodelay(fd: RawFd, on: bool) -> io::Result<()> {
    set_bool_opt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on)
}

/// `Socket::setKeepAlive`.
pub fn set_keep_alive(fd: RawFd, on: bool) -> io::Result<()> {
    set_bool_opt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, on)
}

/// Scatter read backing `Buffer::read_from_fd`: one syscall spanning the
/// buffer's writable region and the caller's stack scratch.
pub fn readv(fd: RawFd, iov: &mut [libc::iovec]) -> io::Result<usize> {
    let n = syscall!(readv(fd, iov.as_ptr(), iov.len() as libc::c_int))?;
    Ok(n as usize)
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = syscall!(write(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
    ))?;
    Ok(n as usize)
}

pub fn close(fd: RawFd) {
    // Best-effort: a failing close(2) here can only be EINTR/EBADF/EIO, none
    // of which this caller can act on.
    let _ = unsafe { libc::close(fd) };
}

/// `Socket::shutdownWrite`.
pub fn shutdown_write(fd: RawFd) -> io::Result<()> {
    syscall!(shutdown(fd, libc::SHUT_WR)).map(drop)
}
