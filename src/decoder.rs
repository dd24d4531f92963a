// src/decoder.rs
//
// Template runtime. One decoder services one logical stream and exclusively
// owns that stream's dictionary; run independent decoders for independent
// streams. Decoding is synchronous over an already-framed message buffer.
//
// Message layout: presence map (stop-bit framed), then a template id if the
// map's first bit is set (otherwise the id is replayed from the dictionary),
// then the per-field encoded forms in template order.

use crate::codec::{self, ByteReader};
use crate::dictionary::{Dictionary, Entry};
use crate::error::{DecodeResult, ErrorKind};
use crate::message::Message;
use crate::pmap::PresenceMap;
use crate::template::Store;
use crate::value::Value;

// Reserved dictionary key for the replayed template id. Field names come
// from XML attributes and cannot collide with it.
const TEMPLATE_ID_KEY: &str = "\u{0}template-id";

#[derive(Debug)]
pub struct Decoder {
    store: Store,
    dict: Dictionary,
}

impl Decoder {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            dict: Dictionary::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Decode one message. Dictionary updates are committed only when the
    /// whole message decodes; on error the dictionary is left exactly as it
    /// was at message start, so the caller can drop the message and carry on.
    pub fn decode(&mut self, buf: &[u8]) -> DecodeResult<Message> {
        let result = self.decode_inner(buf, None);
        self.finish(result)
    }

    /// Decode one message against a known template, for sessions that pin
    /// the template out of band. The presence map carries field bits only;
    /// no template-id indicator is consumed.
    pub fn decode_with_template(
        &mut self,
        template_id: u32,
        buf: &[u8],
    ) -> DecodeResult<Message> {
        let result = self.decode_inner(buf, Some(template_id));
        self.finish(result)
    }

    /// Drop all prior-value state. Call between independent streams; never
    /// between messages of one stream.
    pub fn reset(&mut self) {
        self.dict.reset();
    }

    fn finish(&mut self, result: DecodeResult<Message>) -> DecodeResult<Message> {
        match result {
            Ok(msg) => {
                self.dict.commit();
                Ok(msg)
            }
            Err(e) => {
                self.dict.rollback();
                Err(e)
            }
        }
    }

    fn decode_inner(
        &mut self,
        buf: &[u8],
        pinned_template: Option<u32>,
    ) -> DecodeResult<Message> {
        let store = &self.store;
        let dict = &mut self.dict;

        let mut r = ByteReader::new(buf);
        let mut pmap = PresenceMap::parse(&mut r).map_err(ErrorKind::pre_field)?;

        let template_id = match pinned_template {
            Some(id) => id,
            None => {
                if pmap.next_bit().map_err(ErrorKind::pre_field)? {
                    let id = codec::read_uint32(&mut r).map_err(ErrorKind::pre_field)?;
                    dict.set_value(TEMPLATE_ID_KEY, Value::UInt32(id));
                    id
                } else {
                    match dict.get(TEMPLATE_ID_KEY) {
                        Entry::Assigned(Value::UInt32(id)) => id,
                        _ => {
                            return Err(ErrorKind::UnknownTemplateId { id: None }.pre_field());
                        }
                    }
                }
            }
        };

        let template = store.get(template_id).ok_or_else(|| {
            ErrorKind::UnknownTemplateId {
                id: Some(template_id),
            }
            .pre_field()
        })?;

        let fields = template.decode_body(&mut r, &mut pmap, dict)?;
        Ok(Message {
            template_id,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldProperties, FieldType};
    use crate::operator::Operator;
    use crate::template::Template;

    fn fld(id: u64, name: &str, ty: FieldType, op: Operator, required: bool) -> Field {
        Field {
            props: FieldProperties {
                id,
                name: name.to_string(),
                required,
            },
            ty,
            operator: op,
        }
    }

    fn one_field_store(id: u32, field: Field) -> Store {
        let mut s = Store::new();
        s.insert(Template {
            id,
            fields: vec![field],
        });
        s
    }

    #[test]
    fn single_uint32_none_required() {
        let store = one_field_store(1, fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true));
        let mut dec = Decoder::new(store);
        let msg = dec.decode_with_template(1, &[0x80, 0xB9]).unwrap();
        assert_eq!(msg.fields, vec![(34, Value::UInt32(57))]);
    }

    #[test]
    fn optional_uint64_decodes_null() {
        let store = one_field_store(
            1,
            fld(52, "SendingTime", FieldType::UInt64, Operator::None, false),
        );
        let mut dec = Decoder::new(store);
        let msg = dec.decode_with_template(1, &[0x80, 0x80]).unwrap();
        assert_eq!(msg.fields, vec![(52, Value::Null)]);
    }

    #[test]
    fn copy_replays_across_messages() {
        let store = one_field_store(
            1,
            fld(
                35,
                "MessageType",
                FieldType::Ascii,
                Operator::Copy(Value::Null),
                true,
            ),
        );
        let mut dec = Decoder::new(store);
        let a = dec.decode_with_template(1, &[0xC0, 0xC1]).unwrap();
        assert_eq!(a.fields, vec![(35, Value::Ascii("A".into()))]);
        let b = dec.decode_with_template(1, &[0x80]).unwrap();
        assert_eq!(b.fields, vec![(35, Value::Ascii("A".into()))]);
    }

    #[test]
    fn increment_counts_from_initial() {
        let store = one_field_store(
            1,
            fld(
                100,
                "Seq",
                FieldType::UInt32,
                Operator::Increment(Value::UInt32(5)),
                false,
            ),
        );
        let mut dec = Decoder::new(store);
        let m1 = dec.decode_with_template(1, &[0x80]).unwrap();
        assert_eq!(m1.fields, vec![(100, Value::UInt32(5))]);
        let m2 = dec.decode_with_template(1, &[0x80]).unwrap();
        assert_eq!(m2.fields, vec![(100, Value::UInt32(6))]);
    }

    #[test]
    fn required_uint32_raw_zero_is_zero() {
        let store = one_field_store(1, fld(1, "Account", FieldType::UInt32, Operator::None, true));
        let mut dec = Decoder::new(store);
        let msg = dec.decode_with_template(1, &[0x80, 0x80]).unwrap();
        assert_eq!(msg.fields, vec![(1, Value::UInt32(0))]);
    }

    #[test]
    fn template_id_read_from_stream_when_bit_set() {
        let store = one_field_store(2, fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true));
        let mut dec = Decoder::new(store);
        // pmap 0xC0: template-id bit set; id 2 on the wire, then the field
        let msg = dec.decode(&[0xC0, 0x82, 0xB9]).unwrap();
        assert_eq!(msg.template_id, 2);
        assert_eq!(msg.fields, vec![(34, Value::UInt32(57))]);
    }

    #[test]
    fn template_id_replayed_from_dictionary() {
        let store = one_field_store(2, fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true));
        let mut dec = Decoder::new(store);
        dec.decode(&[0xC0, 0x82, 0xB9]).unwrap();
        // second message: bit clear, id comes from the dictionary
        let msg = dec.decode(&[0x80, 0xBA]).unwrap();
        assert_eq!(msg.template_id, 2);
        assert_eq!(msg.fields, vec![(34, Value::UInt32(58))]);
    }

    #[test]
    fn missing_template_id_with_empty_dictionary_fails() {
        let store = one_field_store(2, fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true));
        let mut dec = Decoder::new(store);
        let err = dec.decode(&[0x80, 0xB9]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownTemplateId { id: None });
        assert_eq!(err.tag, None);
    }

    #[test]
    fn unknown_template_id_is_fatal() {
        let store = one_field_store(2, fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true));
        let mut dec = Decoder::new(store);
        let err = dec.decode(&[0xC0, 0x87, 0xB9]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownTemplateId { id: Some(7) });
    }

    #[test]
    fn failed_message_rolls_the_dictionary_back() {
        let mut s = Store::new();
        s.insert(Template {
            id: 1,
            fields: vec![
                fld(
                    35,
                    "MessageType",
                    FieldType::Ascii,
                    Operator::Copy(Value::Null),
                    true,
                ),
                fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true),
            ],
        });
        let mut dec = Decoder::new(s);

        // seed the copy state
        dec.decode_with_template(1, &[0xC0, 0xC1, 0xB9]).unwrap();

        // overwrite the copy value but truncate before the second field:
        // the write must not survive
        let err = dec.decode_with_template(1, &[0xC0, 0xC2]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BufferUnderflow);
        assert_eq!(err.tag, Some(34));

        // replay still sees "A", not "B"
        let msg = dec.decode_with_template(1, &[0x80, 0xBA]).unwrap();
        assert_eq!(msg.fields[0].1, Value::Ascii("A".into()));
    }

    #[test]
    fn pmap_shorter_than_template_demand_is_fatal() {
        let mut s = Store::new();
        s.insert(Template {
            id: 1,
            fields: (0..8)
                .map(|i| {
                    fld(
                        i,
                        &format!("f{i}"),
                        FieldType::UInt32,
                        Operator::Copy(Value::UInt32(1)),
                        true,
                    )
                })
                .collect(),
        });
        let mut dec = Decoder::new(s);
        // a one-byte pmap carries 7 bits; the eighth copy field has none left
        let err = dec.decode_with_template(1, &[0x80]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PmapExhausted);
        assert_eq!(err.tag, Some(7));
    }

    #[test]
    fn reset_clears_replay_state() {
        let store = one_field_store(
            1,
            fld(
                35,
                "MessageType",
                FieldType::Ascii,
                Operator::Copy(Value::Null),
                true,
            ),
        );
        let mut dec = Decoder::new(store);
        dec.decode_with_template(1, &[0xC0, 0xC1]).unwrap();
        dec.reset();
        let err = dec.decode_with_template(1, &[0x80]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequiredFieldNull);
    }

    #[test]
    fn heartbeat_template_end_to_end() {
        let mut s = Store::new();
        s.insert(Template {
            id: 1,
            fields: vec![
                fld(1128, "ApplVerID", FieldType::Ascii, Operator::None, true),
                fld(35, "MessageType", FieldType::Ascii, Operator::None, true),
                fld(34, "MsgSeqNum", FieldType::UInt32, Operator::None, true),
                fld(52, "SendingTime", FieldType::UInt64, Operator::None, true),
            ],
        });
        let mut dec = Decoder::new(s);
        // pmap with template-id bit set, id 1, then "9", "0", 57, 2312
        let msg = dec
            .decode(&[0xC0, 0x81, 0xB9, 0xB0, 0xB9, 0x12, 0x88])
            .unwrap();
        assert_eq!(msg.template_id, 1);
        assert_eq!(
            msg.fields,
            vec![
                (1128, Value::Ascii("9".into())),
                (35, Value::Ascii("0".into())),
                (34, Value::UInt32(57)),
                (52, Value::UInt64(2312)),
            ]
        );
    }

    mod fuzz {
        use super::*;
        use proptest::prelude::*;

        fn store() -> Store {
            let mut s = Store::new();
            s.insert(Template {
                id: 1,
                fields: vec![
                    fld(1128, "ApplVerID", FieldType::Ascii, Operator::None, true),
                    fld(
                        35,
                        "MessageType",
                        FieldType::Ascii,
                        Operator::Copy(Value::Null),
                        true,
                    ),
                    fld(
                        34,
                        "MsgSeqNum",
                        FieldType::UInt32,
                        Operator::Increment(Value::UInt32(1)),
                        true,
                    ),
                    fld(52, "SendingTime", FieldType::UInt64, Operator::Delta(Value::Null), false),
                ],
            });
            s
        }

        proptest! {
            #[test]
            fn decode_random_input_does_not_panic(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
                let mut dec = Decoder::new(store());
                // errors are fine, panics are not
                let _ = dec.decode(&payload);
                let _ = dec.decode_with_template(1, &payload);
            }

            #[test]
            fn random_failures_never_corrupt_replay_state(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
                let mut dec = Decoder::new(store());
                dec.decode_with_template(1, &[0xE0, 0xC1, 0xB9, 0xB9, 0x82]).unwrap();
                let before = dec.decode_with_template(1, &[0x80, 0xC1, 0x80]);
                prop_assume!(before.is_ok());

                let mut dec2 = Decoder::new(store());
                dec2.decode_with_template(1, &[0xE0, 0xC1, 0xB9, 0xB9, 0x82]).unwrap();
                if dec2.decode_with_template(1, &payload).is_err() {
                    let after = dec2.decode_with_template(1, &[0x80, 0xC1, 0x80]);
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}
