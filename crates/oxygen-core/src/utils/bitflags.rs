// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A macro to define bitflag sets used for resource states, pass masks and node flags.

/// Defines a `Copy` bitflag set with named constants and the usual set operators.
///
/// The generated type keeps its raw bits private to the invoking crate, exposes
/// `EMPTY`/`ALL`, set queries, and a `Debug` impl listing the named flags.
#[macro_export]
macro_rules! oxygen_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            /// The set with no flag.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// The union of every named flag.
            pub const ALL: Self = Self { bits: 0 $(| $flag_value)* };

            /// Builds a set from raw bits, keeping unknown bits.
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// Builds a set from raw bits, returning `None` if any bit is unnamed.
            pub const fn from_bits(bits: $ty) -> Option<Self> {
                if bits & !Self::ALL.bits == 0 {
                    Some(Self { bits })
                } else {
                    None
                }
            }

            /// Returns the raw bits.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Returns `true` if no bit is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Returns `true` if every flag of `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if `self` and `other` share at least one flag.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Sets the flags of `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears the flags of `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// Sets or clears the flags of `other` depending on `value`.
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            /// Returns a copy with the flags of `other` set.
            #[must_use]
            pub const fn with(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Returns a copy with the flags of `other` cleared.
            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::BitXor for $name {
            type Output = Self;
            fn bitxor(self, other: Self) -> Self {
                Self { bits: self.bits ^ other.bits }
            }
        }

        impl core::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self { bits: !self.bits }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, other: Self) {
                self.bits &= other.bits;
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut remaining = self.bits;
                let mut written = false;

                write!(f, "{}(", stringify!($name))?;
                $(
                    let flag: $ty = $flag_value;
                    if flag != 0 && (remaining & flag) == flag {
                        if written {
                            write!(f, " | ")?;
                        }
                        write!(f, "{}", stringify!($flag_name))?;
                        remaining &= !flag;
                        written = true;
                    }
                )*
                if remaining != 0 {
                    if written {
                        write!(f, " | ")?;
                    }
                    write!(f, "{:#x}", remaining)?;
                    written = true;
                }
                if !written {
                    write!(f, "EMPTY")?;
                }
                write!(f, ")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    crate::oxygen_bitflags! {
        /// Flags used to exercise the macro.
        pub struct Access: u32 {
            const READ = 1 << 0;
            const WRITE = 1 << 1;
            const COPY = 1 << 2;
            const READ_WRITE = (1 << 0) | (1 << 1);
        }
    }

    #[test]
    fn empty_and_all() {
        assert!(Access::EMPTY.is_empty());
        assert_eq!(Access::ALL.bits(), 0b111);
        assert_eq!(Access::default(), Access::EMPTY);
        assert_eq!(format!("{:?}", Access::EMPTY), "Access(EMPTY)");
    }

    #[test]
    fn composite_flag_is_reported_once() {
        let flags = Access::READ | Access::WRITE;
        assert_eq!(flags, Access::READ_WRITE);
        assert_eq!(format!("{:?}", flags), "Access(READ | WRITE)");
    }

    #[test]
    fn contains_and_intersects() {
        let flags = Access::READ | Access::COPY;
        assert!(flags.contains(Access::READ));
        assert!(!flags.contains(Access::READ_WRITE));
        assert!(flags.intersects(Access::READ_WRITE));
        assert!(!flags.intersects(Access::WRITE));
    }

    #[test]
    fn insert_remove_and_set() {
        let mut flags = Access::EMPTY;
        flags.insert(Access::WRITE);
        flags.set(Access::COPY, true);
        assert_eq!(flags, Access::WRITE | Access::COPY);
        flags.remove(Access::WRITE);
        flags.set(Access::COPY, false);
        assert!(flags.is_empty());
    }

    #[test]
    fn unknown_bits() {
        assert!(Access::from_bits(1 << 5).is_none());
        let raw = Access::from_bits_retain((1 << 5) | 1);
        assert_eq!(format!("{:?}", raw), "Access(READ | 0x20)");
        assert_eq!(Access::from_bits(0b11), Some(Access::READ_WRITE));
    }

    #[test]
    fn with_without_are_pure() {
        let base = Access::READ;
        let extended = base.with(Access::COPY);
        assert_eq!(base, Access::READ);
        assert_eq!(extended.without(Access::READ), Access::COPY);
    }
}
