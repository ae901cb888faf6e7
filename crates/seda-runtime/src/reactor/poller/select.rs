//! select(2) backend
//!
//! Portable fallback. Descriptors must be below `FD_SETSIZE` and the set is
//! rebuilt on every call, so cost grows with registrations, not readiness.
//! Edge-triggered registration is not available; the hint is ignored.

use std::os::unix::io::RawFd;
use std::time::Duration;

use seda_core::error::{Result, SedaError};
use seda_core::log_debug;

use super::Poller;
use crate::reactor::interest::{Interest, PollEvent};

#[derive(Debug, Clone, Copy)]
struct Entry {
    fd: RawFd,
    token: u64,
    interest: Interest,
}

/// Bitset multiplexer capped at `FD_SETSIZE` descriptors.
pub struct SelectPoller {
    entries: Vec<Entry>,
    max_fds: usize,
}

impl SelectPoller {
    fn position(&self, fd: RawFd) -> Option<usize> {
        self.entries.iter().position(|e| e.fd == fd)
    }
}

impl Poller for SelectPoller {
    const NAME: &'static str = "select";

    fn new(max_fds: usize, edge_triggered: bool) -> Result<Self> {
        if edge_triggered {
            log_debug!("select poller: edge-triggered mode unavailable, using level");
        }
        Ok(Self {
            entries: Vec::with_capacity(max_fds.min(libc::FD_SETSIZE)),
            max_fds: max_fds.min(libc::FD_SETSIZE),
        })
    }

    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(SedaError::InvalidArgument("fd outside FD_SETSIZE"));
        }
        if self.position(fd).is_some() {
            return Err(SedaError::AlreadyRegistered);
        }
        if self.entries.len() >= self.max_fds {
            return Err(SedaError::HandlerTableFull);
        }
        self.entries.push(Entry {
            fd,
            token,
            interest,
        });
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        let i = self.position(fd).ok_or(SedaError::NotRegistered)?;
        self.entries[i].token = token;
        self.entries[i].interest = interest;
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<()> {
        let i = self.position(fd).ok_or(SedaError::NotRegistered)?;
        self.entries.swap_remove(i);
        Ok(())
    }

    fn poll(
        &mut self,
        events: &mut Vec<PollEvent>,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        // Safety: fd_set is plain data; FD_ZERO initializes it
        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut error_set: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_ZERO(&mut error_set);
        }

        let mut max_fd = -1;
        for e in &self.entries {
            // Safety: fd < FD_SETSIZE checked at registration
            unsafe {
                if e.interest.is_readable() {
                    libc::FD_SET(e.fd, &mut read_set);
                }
                if e.interest.is_writable() {
                    libc::FD_SET(e.fd, &mut write_set);
                }
                libc::FD_SET(e.fd, &mut error_set);
            }
            max_fd = max_fd.max(e.fd);
        }

        let mut tv;
        let tv_ptr = match timeout {
            None => std::ptr::null_mut(),
            Some(d) => {
                tv = libc::timeval {
                    tv_sec: d.as_secs().min(i32::MAX as u64) as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv as *mut libc::timeval
            }
        };

        let rc = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_set,
                &mut write_set,
                &mut error_set,
                tv_ptr,
            )
        };
        if rc < 0 {
            let err = SedaError::last_os_error();
            if matches!(err, SedaError::Os(e) if e == libc::EINTR) {
                return Ok(0);
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(0);
        }

        let mut n = 0;
        for e in &self.entries {
            if n >= max {
                break;
            }
            // Safety: same sets select() just filled
            let (readable, writable, error) = unsafe {
                (
                    libc::FD_ISSET(e.fd, &read_set),
                    libc::FD_ISSET(e.fd, &write_set),
                    libc::FD_ISSET(e.fd, &error_set),
                )
            };
            if readable || writable || error {
                events.push(PollEvent {
                    token: e.token,
                    readable,
                    writable,
                    error,
                    hangup: false,
                });
                n += 1;
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::test_support::{socketpair, write_all};

    #[test]
    fn test_readable_after_write() {
        let mut poller = SelectPoller::new(8, true).unwrap();
        let (a, b) = socketpair();
        poller.register(a.raw(), 3, Interest::READ).unwrap();

        let mut events = Vec::new();
        assert_eq!(
            poller.poll(&mut events, 8, Some(Duration::ZERO)).unwrap(),
            0
        );
        write_all(&b, b"x");
        assert_eq!(
            poller
                .poll(&mut events, 8, Some(Duration::from_millis(500)))
                .unwrap(),
            1
        );
        assert_eq!(events[0].token, 3);
        assert!(events[0].readable);
    }

    #[test]
    fn test_table_limits() {
        let mut poller = SelectPoller::new(1, false).unwrap();
        let (a, b) = socketpair();
        poller.register(a.raw(), 1, Interest::READ).unwrap();
        assert!(matches!(
            poller.register(a.raw(), 1, Interest::READ),
            Err(SedaError::AlreadyRegistered)
        ));
        assert!(matches!(
            poller.register(b.raw(), 2, Interest::READ),
            Err(SedaError::HandlerTableFull)
        ));
        assert!(matches!(
            poller.register(libc::FD_SETSIZE as RawFd, 9, Interest::READ),
            Err(SedaError::InvalidArgument(_))
        ));
        poller.deregister(a.raw()).unwrap();
        assert!(matches!(
            poller.deregister(a.raw()),
            Err(SedaError::NotRegistered)
        ));
    }
}
