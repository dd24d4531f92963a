// src/operator.rs
//
// Field operators. An operator carries only its declared constant/default/
// initial value; all mutable state lives in the dictionary.

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    None,
    /// Declared constant; never null.
    Constant(Value),
    /// Declared default, `Value::Null` when the template declares none.
    Default(Value),
    /// Initial value, `Value::Null` when the template declares none.
    Copy(Value),
    /// Integer types only.
    Increment(Value),
    /// `initial` as for copy; `base` is the type's empty value, the anchor a
    /// tail is applied to before anything was decoded.
    Tail { initial: Value, base: Value },
    Delta(Value),
}

impl Operator {
    /// Whether a field with this operator consumes one presence-map bit.
    /// Pure function of (operator, required); nothing else may influence the
    /// cursor.
    pub fn uses_pmap(&self, required: bool) -> bool {
        match self {
            Operator::None | Operator::Delta(_) => false,
            Operator::Constant(_) => !required,
            Operator::Default(_)
            | Operator::Copy(_)
            | Operator::Increment(_)
            | Operator::Tail { .. } => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::None => "none",
            Operator::Constant(_) => "constant",
            Operator::Default(_) => "default",
            Operator::Copy(_) => "copy",
            Operator::Increment(_) => "increment",
            Operator::Tail { .. } => "tail",
            Operator::Delta(_) => "delta",
        }
    }
}
