// src/value.rs
//
// Logical field values as they come off the wire. Null is a first-class
// inhabitant, distinct from zero and from the empty string: nullable encodings
// and the copy/default operators all need the distinction.

use crate::error::{CodecResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    UInt32(u32),
    Int32(i32),
    UInt64(u64),
    Int64(i64),
    Ascii(String),
    Unicode(String),
    Bytes(Vec<u8>),
    Decimal { exponent: i32, mantissa: i64 },
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::UInt32(_) => "uint32",
            Value::Int32(_) => "int32",
            Value::UInt64(_) => "uint64",
            Value::Int64(_) => "int64",
            Value::Ascii(_) => "ascii",
            Value::Unicode(_) => "unicode",
            Value::Bytes(_) => "bytevector",
            Value::Decimal { .. } => "decimal",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Ascii(s) | Value::Unicode(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Decimal { exponent, mantissa } => write!(f, "{mantissa}e{exponent}"),
        }
    }
}

// Delta and increment arithmetic. All additions run in 128-bit intermediates
// so overflow is detected before the result is narrowed back to the field
// width.

#[inline]
pub fn add_u32(prev: u32, delta: i64) -> CodecResult<u32> {
    let sum = i128::from(prev) + i128::from(delta);
    u32::try_from(sum).map_err(|_| ErrorKind::IntegerOverflow { target: "uint32" })
}

#[inline]
pub fn add_i32(prev: i32, delta: i64) -> CodecResult<i32> {
    let sum = i128::from(prev) + i128::from(delta);
    i32::try_from(sum).map_err(|_| ErrorKind::IntegerOverflow { target: "int32" })
}

#[inline]
pub fn add_u64(prev: u64, delta: i64) -> CodecResult<u64> {
    let sum = i128::from(prev) + i128::from(delta);
    u64::try_from(sum).map_err(|_| ErrorKind::IntegerOverflow { target: "uint64" })
}

#[inline]
pub fn add_i64(prev: i64, delta: i64) -> CodecResult<i64> {
    let sum = i128::from(prev) + i128::from(delta);
    i64::try_from(sum).map_err(|_| ErrorKind::IntegerOverflow { target: "int64" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_u32_within_bounds() {
        assert_eq!(add_u32(0, 57), Ok(57));
        assert_eq!(add_u32(100, -40), Ok(60));
        assert_eq!(add_u32(u32::MAX - 1, 1), Ok(u32::MAX));
    }

    #[test]
    fn add_u32_overflow_both_directions() {
        assert!(add_u32(u32::MAX, 1).is_err());
        assert!(add_u32(0, -1).is_err());
        // a delta larger than the width is representable in the intermediate
        assert!(add_u32(1, i64::MAX).is_err());
    }

    #[test]
    fn add_i32_overflow() {
        assert_eq!(add_i32(i32::MIN, 1), Ok(i32::MIN + 1));
        assert!(add_i32(i32::MAX, 1).is_err());
        assert!(add_i32(i32::MIN, -1).is_err());
    }

    #[test]
    fn add_u64_near_max() {
        assert_eq!(add_u64(u64::MAX, 0), Ok(u64::MAX));
        assert!(add_u64(u64::MAX, 1).is_err());
        assert!(add_u64(0, -1).is_err());
    }

    #[test]
    fn add_i64_never_wraps() {
        assert!(add_i64(i64::MAX, 1).is_err());
        assert!(add_i64(i64::MIN, -1).is_err());
        assert_eq!(add_i64(i64::MAX, -1), Ok(i64::MAX - 1));
    }

    #[test]
    fn null_is_not_zero_or_empty() {
        assert!(Value::Null.is_null());
        assert!(!Value::UInt32(0).is_null());
        assert!(!Value::Ascii(String::new()).is_null());
    }

    #[test]
    fn display_bytes_as_hex() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "dead");
        assert_eq!(
            Value::Decimal {
                exponent: -2,
                mantissa: 12345
            }
            .to_string(),
            "12345e-2"
        );
    }
}
