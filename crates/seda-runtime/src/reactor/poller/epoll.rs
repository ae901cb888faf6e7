//! epoll(7) backend

use std::os::unix::io::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use seda_core::error::{Result, SedaError};

use super::{timeout_ms, Poller};
use crate::reactor::interest::{Interest, PollEvent};

/// O(ready) multiplexer over an epoll instance.
pub struct EpollPoller {
    epoll: Epoll,
    buf: Vec<EpollEvent>,
    edge_triggered: bool,
}

impl EpollPoller {
    fn flags(&self, interest: Interest) -> EpollFlags {
        let mut flags = EpollFlags::empty();
        if interest.is_readable() {
            flags |= EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP;
        }
        if interest.is_writable() {
            flags |= EpollFlags::EPOLLOUT;
        }
        if self.edge_triggered {
            flags |= EpollFlags::EPOLLET;
        }
        flags
    }

    #[inline]
    fn borrow(fd: RawFd) -> BorrowedFd<'static> {
        // Safety: the caller keeps fd open for the duration of the epoll_ctl
        unsafe { BorrowedFd::borrow_raw(fd) }
    }
}

impl Poller for EpollPoller {
    const NAME: &'static str = "epoll";

    fn new(max_fds: usize, edge_triggered: bool) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Self {
            epoll,
            buf: vec![EpollEvent::empty(); max_fds.clamp(1, 4096)],
            edge_triggered,
        })
    }

    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        let event = EpollEvent::new(self.flags(interest), token);
        match self.epoll.add(Self::borrow(fd), event) {
            Ok(()) => Ok(()),
            Err(Errno::EEXIST) => Err(SedaError::AlreadyRegistered),
            Err(e) => Err(e.into()),
        }
    }

    fn reregister(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        let mut event = EpollEvent::new(self.flags(interest), token);
        match self.epoll.modify(Self::borrow(fd), &mut event) {
            Ok(()) => Ok(()),
            Err(Errno::ENOENT) => Err(SedaError::NotRegistered),
            Err(e) => Err(e.into()),
        }
    }

    fn deregister(&mut self, fd: RawFd) -> Result<()> {
        match self.epoll.delete(Self::borrow(fd)) {
            Ok(()) => Ok(()),
            // already closed by its owner, which removes it from the set
            Err(Errno::ENOENT) | Err(Errno::EBADF) => Err(SedaError::NotRegistered),
            Err(e) => Err(e.into()),
        }
    }

    fn poll(
        &mut self,
        events: &mut Vec<PollEvent>,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let max = max.clamp(1, self.buf.len());
        let ms = timeout_ms(timeout);
        let timeout = if ms < 0 {
            EpollTimeout::NONE
        } else {
            EpollTimeout::from(ms.min(u16::MAX as i32) as u16)
        };

        let n = match self.epoll.wait(&mut self.buf[..max], timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        for ev in &self.buf[..n] {
            let flags = ev.events();
            events.push(PollEvent {
                token: ev.data(),
                readable: flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI),
                writable: flags.contains(EpollFlags::EPOLLOUT),
                error: flags.contains(EpollFlags::EPOLLERR),
                hangup: flags.contains(EpollFlags::EPOLLHUP),
            });
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::test_support::{socketpair, write_all, Fd};

    #[test]
    fn test_readable_after_write() {
        let mut poller = EpollPoller::new(16, false).unwrap();
        let (a, b) = socketpair();
        poller.register(a.raw(), 7, Interest::READ).unwrap();
        assert!(matches!(
            poller.register(a.raw(), 7, Interest::READ),
            Err(SedaError::AlreadyRegistered)
        ));

        let mut events = Vec::new();
        assert_eq!(
            poller
                .poll(&mut events, 16, Some(Duration::ZERO))
                .unwrap(),
            0
        );

        write_all(&b, b"ping");
        let n = poller
            .poll(&mut events, 16, Some(Duration::from_millis(500)))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].token, 7);
        assert!(events[0].readable);
        assert!(!events[0].writable);
    }

    #[test]
    fn test_reregister_for_write() {
        let mut poller = EpollPoller::new(4, false).unwrap();
        let (a, _b): (Fd, Fd) = socketpair();
        poller.register(a.raw(), 1, Interest::READ).unwrap();
        poller.reregister(a.raw(), 2, Interest::WRITE).unwrap();
        let mut events = Vec::new();
        poller
            .poll(&mut events, 4, Some(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 2);
        assert!(events[0].writable);

        poller.deregister(a.raw()).unwrap();
        assert!(matches!(
            poller.deregister(a.raw()),
            Err(SedaError::NotRegistered)
        ));
    }
}
