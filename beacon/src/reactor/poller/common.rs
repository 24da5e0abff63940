use std::fmt;
use std::ops::BitOr;
use std::os::fd::RawFd;

/// The readiness a registration wants to be notified about.
///
/// An empty interest set means the registration is disarmed: its handler
/// is running on a worker, or it is about to be.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    read: bool,
    write: bool,
}

impl Interest {
    /// No readiness at all.
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    /// Data is available to read, or the peer hung up.
    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    /// Send buffer space is available.
    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    pub fn is_readable(self) -> bool {
        self.read
    }

    pub fn is_writable(self) -> bool {
        self.write
    }

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    /// Packs the set into the low two bits of a byte.
    pub(crate) fn bits(self) -> u8 {
        (self.read as u8) | ((self.write as u8) << 1)
    }

    /// Inverse of [`bits`](Self::bits).
    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            read: bits & 0b01 != 0,
            write: bits & 0b10 != 0,
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
        }
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.read, self.write) {
            (false, false) => f.write_str("NONE"),
            (true, false) => f.write_str("READABLE"),
            (false, true) => f.write_str("WRITABLE"),
            (true, true) => f.write_str("READABLE | WRITABLE"),
        }
    }
}

/// Handle on the poller's wake-up descriptor.
///
/// Writing to it forces a blocked `poll` to return.
pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

#[cfg(test)]
mod tests {
    use super::Interest;

    #[test]
    fn bits_round_trip_every_set() {
        for interest in [
            Interest::NONE,
            Interest::READABLE,
            Interest::WRITABLE,
            Interest::READABLE | Interest::WRITABLE,
        ] {
            assert_eq!(Interest::from_bits(interest.bits()), interest);
        }
    }

    #[test]
    fn union_of_read_and_write() {
        let both = Interest::READABLE | Interest::WRITABLE;

        assert!(both.is_readable() && both.is_writable());
        assert!(Interest::NONE.is_empty());
        assert_eq!(format!("{both:?}"), "READABLE | WRITABLE");
    }
}
