use std::fmt;
use std::ops::{BitOr, BitOrAssign};

const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

/// The set of readiness a [`Channel`](crate::channel::Channel) is currently
/// interested in.
///
/// Unlike `mio::Interests`, this set is allowed to be empty: an empty
/// `Interest` is the "mask == 0" state a `Channel` is in right after
/// construction or after `disable_all`.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(READABLE);
    pub const WRITABLE: Interest = Interest(WRITABLE);

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub const fn with_readable(self, on: bool) -> Interest {
        if on {
            Interest(self.0 | READABLE)
        } else {
            Interest(self.0 & !READABLE)
        }
    }

    pub const fn with_writable(self, on: bool) -> Interest {
        if on {
            Interest(self.0 | WRITABLE)
        } else {
            Interest(self.0 & !WRITABLE)
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "Interest(")?;
        if self.is_readable() {
            write!(f, "READABLE")?;
            first = false;
        }
        if self.is_writable() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "WRITABLE")?;
            first = false;
        }
        if first {
            write!(f, "NONE")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_none() {
        assert!(Interest::NONE.is_none());
        assert!(!Interest::NONE.is_readable());
        assert!(!Interest::NONE.is_writable());
    }

    #[test]
    fn combine_and_clear() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        let read_only = both.with_writable(false);
        assert!(read_only.is_readable());
        assert!(!read_only.is_writable());
    }
}
