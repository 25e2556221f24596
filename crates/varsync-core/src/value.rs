//! The closed set of replicable value types.
//!
//! Every variable is parameterized over one of `bool`, `f64`, `i64` or
//! `String`. The envelope carries one typed batch per kind, so the engine
//! erases values to [`WireValue`] when it needs to handle them uniformly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a replicable value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `bool`
    Bool,
    /// `f64`
    Float,
    /// `i64`
    Int,
    /// `String`
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueKind::Bool => "bool",
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::String => "string",
        };
        f.write_str(label)
    }
}

/// A value of any replicable type.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Boolean value
    Bool(bool),
    /// Floating point value
    Float(f64),
    /// Integer value
    Int(i64),
    /// String value
    String(String),
}

impl WireValue {
    /// Kind of the carried value
    pub fn kind(&self) -> ValueKind {
        match self {
            WireValue::Bool(_) => ValueKind::Bool,
            WireValue::Float(_) => ValueKind::Float,
            WireValue::Int(_) => ValueKind::Int,
            WireValue::String(_) => ValueKind::String,
        }
    }

    /// Whether both carry the same value, floats compared bit for bit
    pub fn same_value(&self, other: &WireValue) -> bool {
        match (self, other) {
            (WireValue::Bool(a), WireValue::Bool(b)) => a.same_value(b),
            (WireValue::Float(a), WireValue::Float(b)) => a.same_value(b),
            (WireValue::Int(a), WireValue::Int(b)) => a.same_value(b),
            (WireValue::String(a), WireValue::String(b)) => a.same_value(b),
            _ => false,
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for f64 {}
    impl Sealed for i64 {}
    impl Sealed for String {}
}

/// A type that can be stored in a replicated variable.
///
/// Sealed: the wire protocol only knows the four kinds in [`ValueKind`].
pub trait SyncValue:
    sealed::Sealed + Clone + PartialEq + fmt::Debug + Default + Send + Sync + 'static
{
    /// Wire kind of this type
    const KIND: ValueKind;

    /// Erase into a [`WireValue`]
    fn into_wire(self) -> WireValue;

    /// Recover from a [`WireValue`], `None` if the kind differs
    fn from_wire(value: WireValue) -> Option<Self>;

    /// Equality used to decide whether a write changed anything.
    ///
    /// Floats compare by bit pattern, so writing the same NaN twice is not a
    /// change, while `0.0` and `-0.0` are different values.
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

macro_rules! impl_sync_value {
    ($ty:ty, $kind:ident) => {
        impl_sync_value!($ty, $kind, |a: &$ty, b: &$ty| a == b);
    };
    ($ty:ty, $kind:ident, $same:expr) => {
        impl SyncValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn into_wire(self) -> WireValue {
                WireValue::$kind(self)
            }

            fn from_wire(value: WireValue) -> Option<Self> {
                match value {
                    WireValue::$kind(inner) => Some(inner),
                    _ => None,
                }
            }

            fn same_value(&self, other: &Self) -> bool {
                let same: fn(&$ty, &$ty) -> bool = $same;
                same(self, other)
            }
        }
    };
}

impl_sync_value!(bool, Bool);
impl_sync_value!(f64, Float, |a: &f64, b: &f64| a.to_bits() == b.to_bits());
impl_sync_value!(i64, Int);
impl_sync_value!(String, String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_wire_rejects_other_kinds() {
        assert_eq!(i64::from_wire(WireValue::Int(7)), Some(7));
        assert_eq!(i64::from_wire(WireValue::Float(7.0)), None);
        assert_eq!(String::from_wire(WireValue::Bool(true)), None);
    }

    #[test]
    fn kind_matches_type() {
        assert_eq!(true.into_wire().kind(), <bool as SyncValue>::KIND);
        assert_eq!(1.5f64.into_wire().kind(), ValueKind::Float);
        assert_eq!(String::from("x").into_wire().kind(), ValueKind::String);
    }

    #[test]
    fn floats_compare_by_bits() {
        assert!(f64::NAN.same_value(&f64::NAN));
        assert!(!0.0f64.same_value(&-0.0));
        assert!(WireValue::Float(f64::NAN).same_value(&WireValue::Float(f64::NAN)));
        assert!(!WireValue::Int(1).same_value(&WireValue::Float(1.0)));
        assert!(String::from("a").same_value(&String::from("a")));
    }
}
