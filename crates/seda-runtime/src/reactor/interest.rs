//! Readiness interest and readiness reports

use std::ops::BitOr;

/// Readiness a handler wants to hear about.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(1 << 0);
    pub const WRITE: Interest = Interest(1 << 1);
    pub const READ_WRITE: Interest = Interest(Self::READ.0 | Self::WRITE.0);

    #[inline]
    pub const fn is_readable(&self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    #[inline]
    pub const fn is_writable(&self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    #[inline]
    pub const fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl std::fmt::Debug for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "READ|WRITE"),
            (true, false) => write!(f, "READ"),
            (false, true) => write!(f, "WRITE"),
            (false, false) => write!(f, "NONE"),
        }
    }
}

/// One readiness report from a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}
