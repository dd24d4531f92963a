// src/message.rs
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A decoded message: the template that shaped it and its fields in wire
/// order. Null values are preserved, not elided, so consumers see every
/// field the template names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub template_id: u32,
    pub fields: Vec<(u64, Value)>,
}

impl Message {
    /// First field with the given FIX tag.
    pub fn get(&self, tag: u64) -> Option<&Value> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u64, Value)> {
        self.fields.iter()
    }
}
