//! Reference: the one scalar handle the runtime passes around.
//!
//! A reference is either a small integer, stored inline, or an index into the
//! object table. Negative and odd values are integers, everything else is an
//! object. Index 0 is `nil`.
//!
//! ```text
//! integer n >= 0  -> (n << 1) | 1
//! integer n <  0  -> n
//! object  i       -> i << 1
//! ```

/// Largest non-negative value that still encodes as a small integer.
pub const SMALL_INT_MAX: i32 = (1 << 30) - 1;
/// Negative values are stored as-is, so the whole negative `i32` range is available.
pub const SMALL_INT_MIN: i32 = i32::MIN;

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Reference(i32);

impl Reference {
    pub const NIL: Reference = Reference(0);

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Reference to the object stored at `index` in the object table.
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self((index as i32) << 1)
    }

    /// Encodes `value` as a small integer.
    /// Values above [`SMALL_INT_MAX`] do not fit, use [`Reference::try_from_small_int`]
    /// when the input is not known to be in range.
    #[inline]
    pub const fn from_small_int(value: i32) -> Self {
        if value < 0 {
            Self(value)
        } else {
            Self((value << 1) + 1)
        }
    }

    /// Encodes `value` if it is representable, `None` otherwise.
    #[inline]
    pub fn try_from_small_int(value: i64) -> Option<Self> {
        if value < SMALL_INT_MIN as i64 || value > SMALL_INT_MAX as i64 {
            return None;
        }
        Some(Self::from_small_int(value as i32))
    }

    #[inline]
    pub const fn is_integer(self) -> bool {
        self.0 < 0 || self.0 & 1 == 1
    }

    #[inline]
    pub const fn is_object(self) -> bool {
        !self.is_integer()
    }

    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Decodes a small integer. Debug builds assert that this is one.
    #[inline]
    pub const fn as_small_int(self) -> i32 {
        debug_assert!(self.is_integer());
        if self.0 < 0 { self.0 } else { self.0 >> 1 }
    }

    /// Small integer value if this is one.
    #[inline]
    pub const fn small_int(self) -> Option<i32> {
        if self.is_integer() {
            Some(self.as_small_int())
        } else {
            None
        }
    }

    /// Object table index of an object reference.
    #[inline]
    pub const fn index(self) -> usize {
        debug_assert!(self.is_object());
        (self.0 >> 1) as usize
    }
}

impl From<i32> for Reference {
    fn from(value: i32) -> Self {
        Reference::from_small_int(value)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_nil() {
            write!(f, "nil")
        } else if self.is_integer() {
            write!(f, "{}", self.as_small_int())
        } else {
            write!(f, "#{}", self.index())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_round_trip() {
        for n in [
            0,
            1,
            2,
            -1,
            -2,
            42,
            -42,
            1000,
            SMALL_INT_MAX,
            SMALL_INT_MAX - 1,
            SMALL_INT_MIN,
            SMALL_INT_MIN + 1,
        ] {
            let r = Reference::from_small_int(n);
            assert!(r.is_integer(), "{n} should encode as an integer");
            assert_eq!(r.as_small_int(), n, "round trip of {n}");
        }
    }

    #[test]
    fn objects_are_never_integers() {
        for index in [0usize, 1, 2, 3, 100, 32767] {
            let r = Reference::from_index(index);
            assert!(r.raw() >= 0 && r.raw() % 2 == 0);
            assert!(!r.is_integer());
            assert_eq!(r.index(), index);
        }
        assert!(Reference::NIL.is_nil());
        assert!(Reference::NIL.is_object());
    }

    #[test]
    fn zero_is_not_nil() {
        let zero = Reference::from_small_int(0);
        assert_eq!(zero.raw(), 1);
        assert!(!zero.is_nil());
    }

    #[test]
    fn out_of_range_does_not_encode() {
        assert!(Reference::try_from_small_int(SMALL_INT_MAX as i64 + 1).is_none());
        assert!(Reference::try_from_small_int(SMALL_INT_MIN as i64 - 1).is_none());
        assert_eq!(
            Reference::try_from_small_int(-7).map(Reference::as_small_int),
            Some(-7)
        );
    }
}
