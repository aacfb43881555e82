//! Value type tags and the possible-type bitmask produced by type inference

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};

/// Concrete zval type tags, as stored in the low byte of a zval's type info.
pub mod tag {
    /// Slot holds no value (undefined compiled variable)
    pub const UNDEF: u8 = 0;
    /// `null`
    pub const NULL: u8 = 1;
    /// `false`
    pub const FALSE: u8 = 2;
    /// `true`
    pub const TRUE: u8 = 3;
    /// Signed machine integer
    pub const LONG: u8 = 4;
    /// IEEE-754 double
    pub const DOUBLE: u8 = 5;
    /// Byte string
    pub const STRING: u8 = 6;
    /// Ordered hash table
    pub const ARRAY: u8 = 7;
    /// Object
    pub const OBJECT: u8 = 8;
    /// Resource handle
    pub const RESOURCE: u8 = 9;
    /// Reference cell
    pub const REFERENCE: u8 = 10;
    /// Pointer to another zval (only ever seen in VAR slots)
    pub const INDIRECT: u8 = 12;

    /// Human readable name of a tag, used in diagnostics and dumps.
    pub const fn name(tag: u8) -> &'static str {
        match tag {
            UNDEF => "undef",
            NULL => "null",
            FALSE => "false",
            TRUE => "true",
            LONG => "int",
            DOUBLE => "float",
            STRING => "string",
            ARRAY => "array",
            OBJECT => "object",
            RESOURCE => "resource",
            REFERENCE => "reference",
            INDIRECT => "indirect",
            _ => "unknown",
        }
    }
}

/// Possible-type set of a value.
///
/// Bit `1 << tag` is set when the value may hold that tag. The two
/// refcount modifier bits only refine `STRING | ARRAY | OBJECT | RESOURCE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TypeMask(pub u32);

impl TypeMask {
    /// Empty set
    pub const NONE: Self = Self(0);
    /// May be undefined
    pub const UNDEF: Self = Self(1 << tag::UNDEF);
    /// May be `null`
    pub const NULL: Self = Self(1 << tag::NULL);
    /// May be `false`
    pub const FALSE: Self = Self(1 << tag::FALSE);
    /// May be `true`
    pub const TRUE: Self = Self(1 << tag::TRUE);
    /// May be an integer
    pub const LONG: Self = Self(1 << tag::LONG);
    /// May be a double
    pub const DOUBLE: Self = Self(1 << tag::DOUBLE);
    /// May be a string
    pub const STRING: Self = Self(1 << tag::STRING);
    /// May be an array
    pub const ARRAY: Self = Self(1 << tag::ARRAY);
    /// May be an object
    pub const OBJECT: Self = Self(1 << tag::OBJECT);
    /// May be a resource
    pub const RESOURCE: Self = Self(1 << tag::RESOURCE);
    /// May be a reference cell
    pub const REF: Self = Self(1 << tag::REFERENCE);
    /// Refcounted payload may have a count of exactly one
    pub const RC1: Self = Self(1 << 30);
    /// Refcounted payload may have a count above one
    pub const RCN: Self = Self(1 << 31);

    /// `false | true`
    pub const BOOL: Self = Self(Self::FALSE.0 | Self::TRUE.0);
    /// `null | false | true`
    pub const SIMPLE: Self = Self(Self::NULL.0 | Self::BOOL.0);
    /// `int | float`
    pub const NUMBER: Self = Self(Self::LONG.0 | Self::DOUBLE.0);
    /// Every concrete type a defined, dereferenced value can have
    pub const ANY: Self = Self(
        Self::SIMPLE.0
            | Self::NUMBER.0
            | Self::STRING.0
            | Self::ARRAY.0
            | Self::OBJECT.0
            | Self::RESOURCE.0
            | Self::RC1.0
            | Self::RCN.0,
    );
    /// Types whose payload may be heap allocated and counted
    pub const REFCOUNTED: Self =
        Self(Self::STRING.0 | Self::ARRAY.0 | Self::OBJECT.0 | Self::RESOURCE.0 | Self::REF.0);
    /// Types that are counted whenever present (never interned or immutable)
    pub const ALWAYS_REFCOUNTED: Self = Self(Self::OBJECT.0 | Self::RESOURCE.0 | Self::REF.0);
    /// Types the cycle collector can trace
    pub const COLLECTABLE: Self = Self(Self::ARRAY.0 | Self::OBJECT.0);
    /// Mask of the concrete tag bits (modifiers stripped)
    pub const TAGS: Self = Self((1 << (tag::REFERENCE + 1)) - 1);

    /// Build a mask from raw bits.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Mask with only `tag` set.
    #[inline]
    pub const fn of(tag: u8) -> Self {
        Self(1 << tag)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Union.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection.
    #[inline]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Set difference.
    #[inline]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True when every bit of `other` is in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share any bit.
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every tag of `self` is also in `other` (modifiers ignored).
    #[inline]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.tags().0 & !other.0 == 0
    }

    /// Concrete tag bits only.
    #[inline]
    pub const fn tags(self) -> Self {
        Self(self.0 & Self::TAGS.0)
    }

    /// True when no tag can occur.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.tags().0 == 0
    }

    /// True when the tag `t` may occur.
    #[inline]
    pub const fn may_be(self, t: u8) -> bool {
        self.0 & (1 << t) != 0
    }

    /// The single concrete tag of this set, when there is exactly one.
    #[inline]
    pub const fn concrete(self) -> Option<u8> {
        let tags = self.tags().0;
        if tags != 0 && tags & (tags - 1) == 0 {
            Some(tags.trailing_zeros() as u8)
        } else {
            None
        }
    }

    /// True when the set names exactly one tag equal to `t`.
    #[inline]
    pub const fn is_only(self, t: u8) -> bool {
        self.tags().0 == 1 << t
    }

    /// Number of distinct tags.
    #[inline]
    pub const fn count(self) -> u32 {
        self.tags().0.count_ones()
    }

    /// True when the value may carry a refcounted payload.
    #[inline]
    pub const fn may_be_refcounted(self) -> bool {
        self.intersects(Self::REFCOUNTED)
    }

    /// True when every possible payload is counted without exception.
    #[inline]
    pub const fn always_refcounted(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::ALWAYS_REFCOUNTED)
    }

    /// Iterate the concrete tags in ascending order.
    pub fn iter_tags(self) -> impl Iterator<Item = u8> {
        (0..=tag::REFERENCE).filter(move |t| self.may_be(*t))
    }
}

impl BitOr for TypeMask {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitAnd for TypeMask {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl Not for TypeMask {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for TypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("TypeMask(none)");
        }
        f.write_str("TypeMask(")?;
        let mut first = true;
        for t in self.iter_tags() {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(tag::name(t))?;
        }
        if self.contains(Self::RC1) {
            f.write_str(",rc1")?;
        }
        if self.contains(Self::RCN) {
            f.write_str(",rcn")?;
        }
        f.write_str(")")
    }
}

/// Inclusive integer range proven for a long-typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Smallest possible value
    pub min: i64,
    /// Largest possible value
    pub max: i64,
    /// The computation producing the value may wrap below `min`
    pub underflow: bool,
    /// The computation producing the value may wrap above `max`
    pub overflow: bool,
}

impl ValueRange {
    /// Exact range without wrap flags.
    pub const fn new(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            underflow: false,
            overflow: false,
        }
    }

    /// Range holding exactly one value.
    pub const fn constant(value: i64) -> Self {
        Self::new(value, value)
    }

    /// True when `value` may occur.
    #[inline]
    pub const fn may_contain(&self, value: i64) -> bool {
        self.underflow || self.overflow || (self.min <= value && value <= self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_sets_report_their_tag() {
        assert_eq!(TypeMask::LONG.concrete(), Some(tag::LONG));
        assert_eq!((TypeMask::LONG | TypeMask::RC1).concrete(), Some(tag::LONG));
        assert_eq!(TypeMask::NUMBER.concrete(), None);
        assert_eq!(TypeMask::NONE.concrete(), None);
    }

    #[test]
    fn refcount_classification() {
        assert!(!TypeMask::NUMBER.may_be_refcounted());
        assert!(TypeMask::STRING.may_be_refcounted());
        assert!(TypeMask::OBJECT.always_refcounted());
        assert!(!(TypeMask::OBJECT | TypeMask::STRING).always_refcounted());
        assert!(!TypeMask::NONE.always_refcounted());
    }

    #[test]
    fn any_excludes_undef_and_ref() {
        assert!(!TypeMask::ANY.may_be(tag::UNDEF));
        assert!(!TypeMask::ANY.may_be(tag::REFERENCE));
        assert_eq!(TypeMask::ANY.count(), 9);
    }

    #[test]
    fn debug_lists_tags() {
        let text = format!("{:?}", TypeMask::NULL | TypeMask::ARRAY | TypeMask::RC1);
        assert_eq!(text, "TypeMask(null|array,rc1)");
    }

    #[test]
    fn range_wrap_flags_widen_membership() {
        let r = ValueRange::new(1, 10);
        assert!(!r.may_contain(0));
        assert!(r.may_contain(5));
        let wrapped = ValueRange {
            overflow: true,
            ..r
        };
        assert!(wrapped.may_contain(0));
    }
}
