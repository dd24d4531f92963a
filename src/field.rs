// src/field.rs
//
// The field-by-operator decode engine. A field is (properties, type,
// operator); decoding one field consumes zero or one presence-map bit and
// zero or more buffer bytes, consults the dictionary, and writes the
// resolved value back to it. Which of those happen is decided entirely by
// the (type, operator, required) triple.

use crate::codec::{self, ByteReader};
use crate::dictionary::{Dictionary, Entry};
use crate::error::{CodecResult, DecodeResult, ErrorKind};
use crate::operator::Operator;
use crate::pmap::PresenceMap;
use crate::value::{self, Value};

/// FIX-level attributes the template attaches to every field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldProperties {
    /// FIX tag.
    pub id: u64,
    /// Dictionary key, unique within the template.
    pub name: String,
    /// Required fields never decode to null; optional fields use the
    /// nullable wire encodings.
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    UInt32,
    Int32,
    UInt64,
    Int64,
    Ascii,
    Unicode,
    ByteVector,
    Decimal,
}

impl FieldType {
    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::UInt32 | FieldType::Int32 | FieldType::UInt64 | FieldType::Int64
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::UInt32 => "uInt32",
            FieldType::Int32 => "int32",
            FieldType::UInt64 => "uInt64",
            FieldType::Int64 => "int64",
            FieldType::Ascii => "string",
            FieldType::Unicode => "string(unicode)",
            FieldType::ByteVector => "byteVector",
            FieldType::Decimal => "decimal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub props: FieldProperties,
    pub ty: FieldType,
    pub operator: Operator,
}

impl Field {
    #[inline]
    pub fn uses_pmap(&self) -> bool {
        self.operator.uses_pmap(self.props.required)
    }

    #[inline]
    pub fn tag(&self) -> u64 {
        self.props.id
    }

    /// Decode the next value for this field. On success the dictionary holds
    /// the resolved value (null included) under the field's name.
    pub fn decode(
        &self,
        r: &mut ByteReader,
        pmap: &mut PresenceMap,
        dict: &mut Dictionary,
    ) -> DecodeResult<Value> {
        let resolved = self
            .resolve(r, pmap, dict)
            .map_err(|k| k.at(self.props.id))?;
        if self.props.required && resolved.is_null() {
            return Err(ErrorKind::RequiredFieldNull.at(self.props.id));
        }
        dict.set_value(&self.props.name, resolved.clone());
        Ok(resolved)
    }

    fn resolve(
        &self,
        r: &mut ByteReader,
        pmap: &mut PresenceMap,
        dict: &mut Dictionary,
    ) -> CodecResult<Value> {
        match &self.operator {
            Operator::None => self.read_value(r),

            Operator::Constant(c) => {
                if self.props.required {
                    Ok(c.clone())
                } else if pmap.next_bit()? {
                    Ok(c.clone())
                } else {
                    Ok(Value::Null)
                }
            }

            Operator::Default(d) => {
                if pmap.next_bit()? {
                    self.read_value(r)
                } else {
                    Ok(d.clone())
                }
            }

            Operator::Copy(initial) => {
                if pmap.next_bit()? {
                    self.read_value(r)
                } else {
                    match dict.get(&self.props.name) {
                        Entry::Undefined => Ok(initial.clone()),
                        Entry::Null => Ok(Value::Null),
                        Entry::Assigned(v) => Ok(v),
                    }
                }
            }

            Operator::Increment(initial) => {
                if !self.ty.is_integer() {
                    return Err(ErrorKind::UnsupportedOperatorForType);
                }
                if pmap.next_bit()? {
                    self.read_value(r)
                } else {
                    match dict.get(&self.props.name) {
                        Entry::Undefined => Ok(initial.clone()),
                        Entry::Null => Ok(Value::Null),
                        Entry::Assigned(v) => increment(v),
                    }
                }
            }

            Operator::Tail { initial, base } => {
                if pmap.next_bit()? {
                    let tail = self.read_value(r)?;
                    if tail.is_null() {
                        return Ok(Value::Null);
                    }
                    let prior = match dict.get(&self.props.name) {
                        Entry::Undefined => {
                            if initial.is_null() {
                                base.clone()
                            } else {
                                initial.clone()
                            }
                        }
                        Entry::Null => base.clone(),
                        Entry::Assigned(v) => v,
                    };
                    self.apply_tail(prior, tail)
                } else {
                    match dict.get(&self.props.name) {
                        Entry::Undefined => Ok(initial.clone()),
                        Entry::Null => Ok(Value::Null),
                        Entry::Assigned(v) => Ok(v),
                    }
                }
            }

            Operator::Delta(initial) => self.resolve_delta(r, dict, initial),
        }
    }

    /// Plain wire read for this field's type, using the nullable encoding
    /// when the field is optional.
    fn read_value(&self, r: &mut ByteReader) -> CodecResult<Value> {
        let required = self.props.required;
        match self.ty {
            FieldType::UInt32 => {
                if required {
                    codec::read_uint32(r).map(Value::UInt32)
                } else {
                    Ok(codec::read_optional_uint32(r)?.map_or(Value::Null, Value::UInt32))
                }
            }
            FieldType::Int32 => {
                if required {
                    codec::read_int32(r).map(Value::Int32)
                } else {
                    Ok(codec::read_optional_int32(r)?.map_or(Value::Null, Value::Int32))
                }
            }
            FieldType::UInt64 => {
                if required {
                    codec::read_uint64(r).map(Value::UInt64)
                } else {
                    Ok(codec::read_optional_uint64(r)?.map_or(Value::Null, Value::UInt64))
                }
            }
            FieldType::Int64 => {
                if required {
                    codec::read_int64(r).map(Value::Int64)
                } else {
                    Ok(codec::read_optional_int64(r)?.map_or(Value::Null, Value::Int64))
                }
            }
            FieldType::Ascii => {
                if required {
                    codec::read_ascii(r).map(Value::Ascii)
                } else {
                    Ok(codec::read_optional_ascii(r)?.map_or(Value::Null, Value::Ascii))
                }
            }
            FieldType::Unicode => {
                let bytes = if required {
                    Some(codec::read_byte_vector(r)?)
                } else {
                    codec::read_optional_byte_vector(r)?
                };
                match bytes {
                    None => Ok(Value::Null),
                    Some(b) => String::from_utf8(b)
                        .map(Value::Unicode)
                        .map_err(|_| ErrorKind::InvalidUtf8),
                }
            }
            FieldType::ByteVector => {
                if required {
                    codec::read_byte_vector(r).map(Value::Bytes)
                } else {
                    Ok(codec::read_optional_byte_vector(r)?.map_or(Value::Null, Value::Bytes))
                }
            }
            FieldType::Decimal => {
                let dec = if required {
                    Some(codec::read_decimal(r)?)
                } else {
                    codec::read_optional_decimal(r)?
                };
                Ok(dec.map_or(Value::Null, |(exponent, mantissa)| Value::Decimal {
                    exponent,
                    mantissa,
                }))
            }
        }
    }

    fn resolve_delta(
        &self,
        r: &mut ByteReader,
        dict: &Dictionary,
        initial: &Value,
    ) -> CodecResult<Value> {
        match self.ty {
            FieldType::UInt32 | FieldType::Int32 | FieldType::UInt64 | FieldType::Int64 => {
                let delta = if self.props.required {
                    Some(codec::read_int64(r)?)
                } else {
                    codec::read_optional_int64(r)?
                };
                let Some(delta) = delta else {
                    return Ok(Value::Null);
                };
                let base = self.integer_base(dict, initial)?;
                self.narrow_integer(base + i128::from(delta))
            }

            FieldType::Decimal => {
                let delta = if self.props.required {
                    Some(codec::read_decimal(r)?)
                } else {
                    codec::read_optional_decimal(r)?
                };
                let Some((de, dm)) = delta else {
                    return Ok(Value::Null);
                };
                let (be, bm) = self.decimal_base(dict, initial)?;
                Ok(Value::Decimal {
                    exponent: value::add_i32(be, i64::from(de))?,
                    mantissa: value::add_i64(bm, dm)?,
                })
            }

            FieldType::Ascii | FieldType::Unicode | FieldType::ByteVector => {
                let subtraction = if self.props.required {
                    Some(codec::read_int32(r)?)
                } else {
                    codec::read_optional_int32(r)?
                };
                let Some(subtraction) = subtraction else {
                    return Ok(Value::Null);
                };
                let diff = match self.ty {
                    FieldType::Ascii => codec::read_ascii(r)?.into_bytes(),
                    _ => codec::read_byte_vector(r)?,
                };
                let base = self.bytes_base(dict, initial)?;
                let merged = apply_bytes_delta(base, subtraction, &diff)?;
                self.bytes_to_value(merged)
            }
        }
    }

    fn integer_base(&self, dict: &Dictionary, initial: &Value) -> CodecResult<i128> {
        let v = match dict.get(&self.props.name) {
            Entry::Assigned(v) => v,
            Entry::Undefined if !initial.is_null() => initial.clone(),
            // never assigned and no declared initial, or explicitly null:
            // the delta base is zero
            _ => return Ok(0),
        };
        match v {
            Value::UInt32(v) => Ok(i128::from(v)),
            Value::Int32(v) => Ok(i128::from(v)),
            Value::UInt64(v) => Ok(i128::from(v)),
            Value::Int64(v) => Ok(i128::from(v)),
            _ => Err(ErrorKind::UnsupportedOperatorForType),
        }
    }

    fn decimal_base(&self, dict: &Dictionary, initial: &Value) -> CodecResult<(i32, i64)> {
        let v = match dict.get(&self.props.name) {
            Entry::Assigned(v) => v,
            Entry::Undefined if !initial.is_null() => initial.clone(),
            _ => return Ok((0, 0)),
        };
        match v {
            Value::Decimal { exponent, mantissa } => Ok((exponent, mantissa)),
            _ => Err(ErrorKind::UnsupportedOperatorForType),
        }
    }

    fn bytes_base(&self, dict: &Dictionary, initial: &Value) -> CodecResult<Vec<u8>> {
        let v = match dict.get(&self.props.name) {
            Entry::Assigned(v) => v,
            Entry::Undefined if !initial.is_null() => initial.clone(),
            _ => return Ok(Vec::new()),
        };
        value_bytes(v)
    }

    fn narrow_integer(&self, sum: i128) -> CodecResult<Value> {
        match self.ty {
            FieldType::UInt32 => u32::try_from(sum)
                .map(Value::UInt32)
                .map_err(|_| ErrorKind::IntegerOverflow { target: "uint32" }),
            FieldType::Int32 => i32::try_from(sum)
                .map(Value::Int32)
                .map_err(|_| ErrorKind::IntegerOverflow { target: "int32" }),
            FieldType::UInt64 => u64::try_from(sum)
                .map(Value::UInt64)
                .map_err(|_| ErrorKind::IntegerOverflow { target: "uint64" }),
            FieldType::Int64 => i64::try_from(sum)
                .map(Value::Int64)
                .map_err(|_| ErrorKind::IntegerOverflow { target: "int64" }),
            _ => Err(ErrorKind::UnsupportedOperatorForType),
        }
    }

    /// Tail semantics: for strings and byte vectors the read value replaces
    /// a same-length suffix of the prior; for everything else it replaces
    /// the value outright.
    fn apply_tail(&self, prior: Value, tail: Value) -> CodecResult<Value> {
        match self.ty {
            FieldType::Ascii | FieldType::Unicode | FieldType::ByteVector => {
                let t = value_bytes(tail)?;
                let mut base = value_bytes(prior)?;
                let merged = if t.len() >= base.len() {
                    t
                } else {
                    let keep = base.len() - t.len();
                    base.truncate(keep);
                    base.extend_from_slice(&t);
                    base
                };
                self.bytes_to_value(merged)
            }
            _ => Ok(tail),
        }
    }

    fn bytes_to_value(&self, bytes: Vec<u8>) -> CodecResult<Value> {
        match self.ty {
            FieldType::Ascii => String::from_utf8(bytes)
                .map(Value::Ascii)
                .map_err(|_| ErrorKind::InvalidUtf8),
            FieldType::Unicode => String::from_utf8(bytes)
                .map(Value::Unicode)
                .map_err(|_| ErrorKind::InvalidUtf8),
            FieldType::ByteVector => Ok(Value::Bytes(bytes)),
            _ => Err(ErrorKind::UnsupportedOperatorForType),
        }
    }
}

fn increment(prev: Value) -> CodecResult<Value> {
    match prev {
        Value::UInt32(v) => value::add_u32(v, 1).map(Value::UInt32),
        Value::Int32(v) => value::add_i32(v, 1).map(Value::Int32),
        Value::UInt64(v) => value::add_u64(v, 1).map(Value::UInt64),
        Value::Int64(v) => value::add_i64(v, 1).map(Value::Int64),
        _ => Err(ErrorKind::UnsupportedOperatorForType),
    }
}

fn value_bytes(v: Value) -> CodecResult<Vec<u8>> {
    match v {
        Value::Ascii(s) | Value::Unicode(s) => Ok(s.into_bytes()),
        Value::Bytes(b) => Ok(b),
        _ => Err(ErrorKind::UnsupportedOperatorForType),
    }
}

/// String/byte-vector delta. A non-negative subtraction removes that many
/// bytes from the tail of the base and appends the diff; a negative
/// subtraction `-n - 1` removes `n` bytes from the head and prepends it.
fn apply_bytes_delta(base: Vec<u8>, subtraction: i32, diff: &[u8]) -> CodecResult<Vec<u8>> {
    if subtraction >= 0 {
        let n = subtraction as usize;
        if n > base.len() {
            return Err(ErrorKind::DeltaOutOfRange {
                subtraction: i64::from(subtraction),
                prev_len: base.len(),
            });
        }
        let mut out = base;
        out.truncate(out.len() - n);
        out.extend_from_slice(diff);
        Ok(out)
    } else {
        let n = (-i64::from(subtraction) - 1) as usize;
        if n > base.len() {
            return Err(ErrorKind::DeltaOutOfRange {
                subtraction: i64::from(subtraction),
                prev_len: base.len(),
            });
        }
        let mut out = diff.to_vec();
        out.extend_from_slice(&base[n..]);
        Ok(out)
    }
}
