//! Generic file-descriptor readiness multiplexor (spec §4.8, C8).
//!
//! Grounded in the teacher's `event_loop::EventLoop`, which hard-coded a
//! compositor-specific `Event` enum (`Socket`, `Backend(u32)`, `Client(ClientId)`,
//! ...). Neither `wl-client` (one connection) nor `wl-server` (a listening
//! socket plus one source per connected client) know about each other's
//! token types, so this version is generic over a caller-supplied `Token`
//! and reports which half of the interest mask is ready instead of folding
//! that into the token.

use std::collections::HashMap;
use std::ffi::c_int;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readiness interest, per spec §4.1/§4.8 "interest masks are `READABLE|WRITABLE`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Self = Self(libc::EPOLLIN as u32);
    pub const WRITABLE: Self = Self(libc::EPOLLOUT as u32);

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    fn as_raw(self) -> u32 {
        self.0
    }

    fn from_raw(raw: u32) -> Self {
        Self(raw & (Self::READABLE.0 | Self::WRITABLE.0))
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One readiness notification: which source, and in which direction(s).
#[derive(Debug, Clone, Copy)]
pub struct Readiness<T> {
    pub token: T,
    pub interest: Interest,
}

/// An epoll-backed multiplexor over a handful of file descriptors, generic
/// over a small `Copy` token identifying each registered source.
///
/// Dispatch is strictly sequential (spec §4.8): [`dispatch`](Self::dispatch)
/// performs one `epoll_wait` and returns every currently-ready source in one
/// batch; there is no per-source thread or callback re-entrancy here, the
/// caller drives handling of each `Readiness` in turn.
pub struct EventLoop<T> {
    epoll: OwnedFd,
    tokens: HashMap<RawFd, T>,
}

impl<T: Copy> EventLoop<T> {
    pub fn new() -> io::Result<Self> {
        Ok(Self { epoll: epoll_create1(libc::EPOLL_CLOEXEC)?, tokens: HashMap::new() })
    }

    /// Register `fd` for the given interest, tagged with `token`.
    pub fn add(&mut self, fd: RawFd, interest: Interest, token: T) -> io::Result<()> {
        let mut event = libc::epoll_event { events: interest.as_raw(), u64: fd as u64 };
        epoll_ctl(&self.epoll, libc::EPOLL_CTL_ADD, fd, &mut event)?;
        self.tokens.insert(fd, token);
        Ok(())
    }

    /// Change the interest set for an already-registered `fd` (spec §4.1
    /// `update_mask`: "writability is only requested when output is
    /// pending").
    pub fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event { events: interest.as_raw(), u64: fd as u64 };
        epoll_ctl(&self.epoll, libc::EPOLL_CTL_MOD, fd, &mut event)
    }

    pub fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        epoll_ctl(&self.epoll, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())?;
        self.tokens.remove(&fd);
        Ok(())
    }

    /// Block until at least one registered source is ready (or `timeout`
    /// elapses, if given), and return every source that is ready right now.
    ///
    /// Per spec §4.8, `dispatch` "returns after processing at least the
    /// ready fds once" -- it does not itself invoke any callback, the
    /// caller walks the returned batch.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness<T>>> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };

        let mut buf = [unsafe { std::mem::zeroed::<libc::epoll_event>() }; 32];
        loop {
            let n = unsafe {
                libc::epoll_wait(self.epoll.as_raw_fd(), buf.as_mut_ptr(), buf.len() as i32, timeout_ms)
            };
            if n == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            let mut out = Vec::with_capacity(n as usize);
            for ev in &buf[..n as usize] {
                let fd = ev.u64 as RawFd;
                if let Some(&token) = self.tokens.get(&fd) {
                    out.push(Readiness { token, interest: Interest::from_raw(ev.events) });
                }
            }
            return Ok(out);
        }
    }
}

fn epoll_create1(flags: c_int) -> io::Result<OwnedFd> {
    match unsafe { libc::epoll_create1(flags) } {
        -1 => Err(io::Error::last_os_error()),
        fd => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
    }
}

fn epoll_ctl(epoll: &OwnedFd, op: c_int, fd: RawFd, event: *mut libc::epoll_event) -> io::Result<()> {
    if unsafe { libc::epoll_ctl(epoll.as_raw_fd(), op, fd, event) } == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
