// src/template.rs
use crate::codec::ByteReader;
use crate::dictionary::Dictionary;
use crate::error::DecodeResult;
use crate::field::Field;
use crate::pmap::PresenceMap;
use crate::value::Value;
use hashbrown::HashMap;

/// An ordered field schema for one message shape. Field order is the wire
/// order; fields are decoded positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: u32,
    pub fields: Vec<Field>,
}

impl Template {
    /// Presence-map bits this template's fields consume, not counting the
    /// template-id indicator bit.
    pub fn pmap_bits(&self) -> usize {
        self.fields.iter().filter(|f| f.uses_pmap()).count()
    }

    /// Walk the fields in order against the body, collecting (tag, value)
    /// pairs. The caller has already positioned the pmap cursor.
    pub fn decode_body(
        &self,
        r: &mut ByteReader,
        pmap: &mut PresenceMap,
        dict: &mut Dictionary,
    ) -> DecodeResult<Vec<(u64, Value)>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let v = field.decode(r, pmap, dict)?;
            out.push((field.tag(), v));
        }
        Ok(out)
    }
}

/// All templates for a session, keyed by template id. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct Store {
    templates: HashMap<u32, Template>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous template under the same id, if any. The loader
    /// treats that as a malformed definition.
    pub fn insert(&mut self, template: Template) -> Option<Template> {
        self.templates.insert(template.id, template)
    }

    pub fn get(&self, id: u32) -> Option<&Template> {
        self.templates.get(&id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.templates.keys().copied()
    }
}
