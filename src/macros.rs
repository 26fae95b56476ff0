//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in
//! blockdb.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that
//! use little-endian wrapper types (U16/U32/U64 and the signed I16/I32/
//! I64 used by the slot-table layout).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{I32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     count: I32,
//!     timestamp: U64,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         count: i32,
//!         timestamp: u64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn count(&self) -> i32 { self.count.get() }
//! // pub fn set_count(&mut self, val: i32) { self.count = I32::new(val); }
//! // pub fn timestamp(&self) -> u64 { self.timestamp.get() }
//! // pub fn set_timestamp(&mut self, val: u64) { self.timestamp = U64::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        $crate::zerocopy_accessors!(@emit $field, u16, U16);
    };
    (@impl $field:ident, u32) => {
        $crate::zerocopy_accessors!(@emit $field, u32, U32);
    };
    (@impl $field:ident, u64) => {
        $crate::zerocopy_accessors!(@emit $field, u64, U64);
    };
    (@impl $field:ident, i16) => {
        $crate::zerocopy_accessors!(@emit $field, i16, I16);
    };
    (@impl $field:ident, i32) => {
        $crate::zerocopy_accessors!(@emit $field, i32, I32);
    };
    (@impl $field:ident, i64) => {
        $crate::zerocopy_accessors!(@emit $field, i64, I64);
    };
    (@emit $field:ident, $native:ty, $wrapper:ident) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> $native {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: $native) {
                self.$field = ::zerocopy::little_endian::$wrapper::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
