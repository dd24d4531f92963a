// src/error.rs
use std::fmt;
use thiserror::Error;

/// What went wrong during a decode, without field context. The codec and
/// presence-map layers report these; `DecodeError` attaches the FIX tag once
/// the failing field is known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("read past end of input")]
    BufferUnderflow,

    #[error("value does not fit {target}")]
    IntegerOverflow { target: &'static str },

    #[error("unknown template id {id:?}")]
    UnknownTemplateId { id: Option<u32> },

    #[error("presence map exhausted")]
    PmapExhausted,

    #[error("required field decoded as null")]
    RequiredFieldNull,

    #[error("operator not supported for this field type")]
    UnsupportedOperatorForType,

    #[error("delta subtraction {subtraction} exceeds previous length {prev_len}")]
    DeltaOutOfRange { subtraction: i64, prev_len: usize },

    #[error("unicode field is not valid UTF-8")]
    InvalidUtf8,
}

impl ErrorKind {
    /// Attach the FIX tag of the field in whose decode the error arose.
    #[inline]
    pub fn at(self, tag: u64) -> DecodeError {
        DecodeError {
            kind: self,
            tag: Some(tag),
        }
    }

    /// The error arose before any field was being decoded (presence map,
    /// template-id lookup).
    #[inline]
    pub fn pre_field(self) -> DecodeError {
        DecodeError {
            kind: self,
            tag: None,
        }
    }

    /// Stable short label, used as a metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::BufferUnderflow => "buffer_underflow",
            ErrorKind::IntegerOverflow { .. } => "integer_overflow",
            ErrorKind::UnknownTemplateId { .. } => "unknown_template_id",
            ErrorKind::PmapExhausted => "pmap_exhausted",
            ErrorKind::RequiredFieldNull => "required_field_null",
            ErrorKind::UnsupportedOperatorForType => "unsupported_operator",
            ErrorKind::DeltaOutOfRange { .. } => "delta_out_of_range",
            ErrorKind::InvalidUtf8 => "invalid_utf8",
        }
    }
}

/// A decode failure with the FIX tag it arose on; `tag` is `None` for errors
/// raised before any field decode started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub kind: ErrorKind,
    pub tag: Option<u64>,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) => write!(f, "tag {}: {}", tag, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Errors from loading a template definition. Kept apart from `DecodeError`
/// since they arise once at startup, not per message.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template file: {0}")]
    Io(#[from] std::io::Error),

    #[error("template xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed template: {0}")]
    Malformed(String),
}

impl TemplateError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        TemplateError::Malformed(msg.into())
    }
}

pub type CodecResult<T> = Result<T, ErrorKind>;
pub type DecodeResult<T> = Result<T, DecodeError>;
