// src/codec.rs
//
// FAST primitive codec: stop-bit terminated variable-length values.
// Every byte carries 7 payload bits; the most significant bit is the stop
// bit, set on the final byte of a value. Nullable encodings shift non-null
// values by +1 so that a raw zero can mean null:
//   unsigned: null = 0, value v transmitted as v + 1
//   signed:   null = 0, v >= 0 transmitted as v + 1, v < 0 transmitted as v

use crate::error::{CodecResult, ErrorKind};

pub const STOP_BIT: u8 = 0x80;
pub const PAYLOAD_MASK: u8 = 0x7F;
const SIGN_BIT: u8 = 0x40;

// Byte counts beyond which a stop-bit integer no longer fits the target
// width: ceil(32/7) = 5, ceil(64/7) = 10.
const MAX_BYTES_32: usize = 5;
const MAX_BYTES_64: usize = 10;

/// Cursor over a borrowed message buffer. All reads are bounds-checked; the
/// decoder never panics on truncated input.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn read_byte(&mut self) -> CodecResult<u8> {
        let b = *self.buf.get(self.pos).ok_or(ErrorKind::BufferUnderflow)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_exact(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(ErrorKind::BufferUnderflow);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

fn read_unsigned_raw(
    r: &mut ByteReader,
    max_bytes: usize,
    target: &'static str,
) -> CodecResult<u128> {
    let mut acc: u128 = 0;
    for _ in 0..max_bytes {
        let b = r.read_byte()?;
        acc = (acc << 7) | u128::from(b & PAYLOAD_MASK);
        if b & STOP_BIT != 0 {
            return Ok(acc);
        }
    }
    Err(ErrorKind::IntegerOverflow { target })
}

fn read_signed_raw(
    r: &mut ByteReader,
    max_bytes: usize,
    target: &'static str,
) -> CodecResult<i128> {
    let first = r.read_byte()?;
    // Sign-extend from the first payload byte's sixth bit.
    let mut acc: i128 = if first & SIGN_BIT != 0 { -1 } else { 0 };
    acc = (acc << 7) | i128::from(first & PAYLOAD_MASK);
    if first & STOP_BIT != 0 {
        return Ok(acc);
    }
    for _ in 1..max_bytes {
        let b = r.read_byte()?;
        acc = (acc << 7) | i128::from(b & PAYLOAD_MASK);
        if b & STOP_BIT != 0 {
            return Ok(acc);
        }
    }
    Err(ErrorKind::IntegerOverflow { target })
}

pub fn read_uint32(r: &mut ByteReader) -> CodecResult<u32> {
    let raw = read_unsigned_raw(r, MAX_BYTES_32, "uint32")?;
    u32::try_from(raw).map_err(|_| ErrorKind::IntegerOverflow { target: "uint32" })
}

pub fn read_optional_uint32(r: &mut ByteReader) -> CodecResult<Option<u32>> {
    let raw = read_unsigned_raw(r, MAX_BYTES_32, "uint32")?;
    if raw == 0 {
        return Ok(None);
    }
    u32::try_from(raw - 1)
        .map(Some)
        .map_err(|_| ErrorKind::IntegerOverflow { target: "uint32" })
}

pub fn read_uint64(r: &mut ByteReader) -> CodecResult<u64> {
    let raw = read_unsigned_raw(r, MAX_BYTES_64, "uint64")?;
    u64::try_from(raw).map_err(|_| ErrorKind::IntegerOverflow { target: "uint64" })
}

pub fn read_optional_uint64(r: &mut ByteReader) -> CodecResult<Option<u64>> {
    let raw = read_unsigned_raw(r, MAX_BYTES_64, "uint64")?;
    if raw == 0 {
        return Ok(None);
    }
    u64::try_from(raw - 1)
        .map(Some)
        .map_err(|_| ErrorKind::IntegerOverflow { target: "uint64" })
}

pub fn read_int32(r: &mut ByteReader) -> CodecResult<i32> {
    let raw = read_signed_raw(r, MAX_BYTES_32, "int32")?;
    i32::try_from(raw).map_err(|_| ErrorKind::IntegerOverflow { target: "int32" })
}

pub fn read_optional_int32(r: &mut ByteReader) -> CodecResult<Option<i32>> {
    let raw = read_signed_raw(r, MAX_BYTES_32, "int32")?;
    let adjusted = match raw {
        0 => return Ok(None),
        n if n > 0 => n - 1,
        n => n,
    };
    i32::try_from(adjusted)
        .map(Some)
        .map_err(|_| ErrorKind::IntegerOverflow { target: "int32" })
}

pub fn read_int64(r: &mut ByteReader) -> CodecResult<i64> {
    let raw = read_signed_raw(r, MAX_BYTES_64, "int64")?;
    i64::try_from(raw).map_err(|_| ErrorKind::IntegerOverflow { target: "int64" })
}

pub fn read_optional_int64(r: &mut ByteReader) -> CodecResult<Option<i64>> {
    let raw = read_signed_raw(r, MAX_BYTES_64, "int64")?;
    let adjusted = match raw {
        0 => return Ok(None),
        n if n > 0 => n - 1,
        n => n,
    };
    i64::try_from(adjusted)
        .map(Some)
        .map_err(|_| ErrorKind::IntegerOverflow { target: "int64" })
}

/// A stop-bit delimited byte run with the stop bit cleared on the final byte.
/// This is the raw form of ASCII strings.
fn read_stop_bit_run(r: &mut ByteReader) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = r.read_byte()?;
        out.push(b & PAYLOAD_MASK);
        if b & STOP_BIT != 0 {
            return Ok(out);
        }
    }
}

/// Required ASCII string. A single 0x80 byte is the empty string.
pub fn read_ascii(r: &mut ByteReader) -> CodecResult<String> {
    let raw = read_stop_bit_run(r)?;
    if raw == [0] {
        return Ok(String::new());
    }
    Ok(raw.into_iter().map(char::from).collect())
}

/// Nullable ASCII string. 0x80 is null, 0x00 0x80 is the empty string.
pub fn read_optional_ascii(r: &mut ByteReader) -> CodecResult<Option<String>> {
    let raw = read_stop_bit_run(r)?;
    match raw.as_slice() {
        [0] => Ok(None),
        [0, 0] => Ok(Some(String::new())),
        _ => Ok(Some(raw.into_iter().map(char::from).collect())),
    }
}

/// Length-prefixed byte vector: an unsigned length then that many raw bytes.
pub fn read_byte_vector(r: &mut ByteReader) -> CodecResult<Vec<u8>> {
    let len = read_uint32(r)? as usize;
    Ok(r.read_exact(len)?.to_vec())
}

pub fn read_optional_byte_vector(r: &mut ByteReader) -> CodecResult<Option<Vec<u8>>> {
    match read_optional_uint32(r)? {
        None => Ok(None),
        Some(len) => Ok(Some(r.read_exact(len as usize)?.to_vec())),
    }
}

/// Decimal: signed exponent then signed mantissa.
pub fn read_decimal(r: &mut ByteReader) -> CodecResult<(i32, i64)> {
    let exponent = read_int32(r)?;
    let mantissa = read_int64(r)?;
    Ok((exponent, mantissa))
}

/// Nullable decimal: if the exponent is null the whole decimal is null and no
/// mantissa follows on the wire.
pub fn read_optional_decimal(r: &mut ByteReader) -> CodecResult<Option<(i32, i64)>> {
    match read_optional_int32(r)? {
        None => Ok(None),
        Some(exponent) => Ok(Some((exponent, read_int64(r)?))),
    }
}
