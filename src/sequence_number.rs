//! Dedicated logic for 8 bit route sequence numbers.

use core::fmt;
use core::ops::{Add, AddAssign};

/// A sequence number on a route or packet. Sequence numbers wrap around after 255, so they are
/// compared with serial number arithmetic instead of plain integer ordering.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqNo(u8);

impl SeqNo {
    /// Create a new `SeqNo` with the default value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `self` is strictly newer than `other`, that is, `other` can be advanced to
    /// `self` in less than half the sequence number space.
    ///
    /// Note that we don't implement the [`PartialOrd`](std::cmp::PartialOrd) trait, as the
    /// contract on that trait specifically defines that it is transitive, which is clearly not the
    /// case here. Values which are exactly 128 apart are not newer than each other in either
    /// direction.
    pub fn is_newer(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i8) > 0
    }

    /// Returns true if `self` is newer than or equal to `other`.
    pub fn is_newer_or_equal(&self, other: &Self) -> bool {
        self == other || self.is_newer(other)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl From<u8> for SeqNo {
    fn from(value: u8) -> Self {
        SeqNo(value)
    }
}

impl From<SeqNo> for u8 {
    fn from(value: SeqNo) -> Self {
        value.0
    }
}

impl Add<u8> for SeqNo {
    type Output = Self;

    fn add(self, rhs: u8) -> Self::Output {
        SeqNo(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u8> for SeqNo {
    fn add_assign(&mut self, rhs: u8) {
        *self = SeqNo(self.0.wrapping_add(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::SeqNo;

    #[test]
    fn cmp_eq_seqno() {
        let s1 = SeqNo::from(1);
        let s2 = SeqNo::from(1);
        assert_eq!(s1, s2);
        assert!(!s1.is_newer(&s2));
        assert!(s1.is_newer_or_equal(&s2));
    }

    #[test]
    fn cmp_small_seqno_increase() {
        let s1 = SeqNo::from(3);
        let s2 = SeqNo::from(5);
        assert!(s2.is_newer(&s1));
        assert!(!s1.is_newer(&s2));

        let s1 = SeqNo::from(0);
        let s2 = SeqNo::from(127);
        assert!(s2.is_newer(&s1));
        assert!(!s1.is_newer(&s2));
    }

    #[test]
    fn cmp_wrapping_seqno() {
        let s1 = SeqNo::from(250);
        let s2 = SeqNo::from(2);
        assert!(s2.is_newer(&s1));
        assert!(!s1.is_newer(&s2));

        let s1 = SeqNo::from(255);
        let s2 = SeqNo::from(0);
        assert!(s2.is_newer(&s1));
        assert!(s2.is_newer_or_equal(&s1));
        assert!(!s1.is_newer_or_equal(&s2));
    }

    #[test]
    fn cmp_half_space_quirk() {
        let s1 = SeqNo::from(0);
        let s2 = SeqNo::from(128);
        assert!(!s1.is_newer(&s2));
        assert!(!s2.is_newer(&s1));
    }

    #[test]
    fn increment_wraps() {
        let mut s = SeqNo::from(255);
        s += 1;
        assert_eq!(s, SeqNo::from(0));
        assert_eq!(SeqNo::from(254) + 3, SeqNo::from(1));
    }
}
