// src/loader.rs
//
// Template XML loader. Surface:
//   <templates>
//     <template id="..">
//       <uInt32 id=".." name=".." presence="optional|mandatory">
//         <copy value=".."/>
//       </uInt32>
//       ...
//     </template>
//   </templates>
// Field tags: string (charset="ascii|unicode"), uInt32, int32, uInt64,
// int64, byteVector, decimal. Zero or one operator child per field; a field
// with no operator child decodes with operator none.

use crate::error::TemplateError;
use crate::field::{Field, FieldProperties, FieldType};
use crate::operator::Operator;
use crate::template::{Store, Template};
use crate::value::Value;
use hashbrown::{HashMap, HashSet};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs;
use std::path::Path;

pub fn load_file(path: &Path) -> Result<Store, TemplateError> {
    let xml = fs::read_to_string(path)?;
    load_str(&xml)
}

pub fn load_str(xml: &str) -> Result<Store, TemplateError> {
    let mut reader = Reader::from_str(xml);
    let mut store = Store::new();

    let mut ctx = Ctx::Top;
    let mut template: Option<OpenTemplate> = None;
    let mut field: Option<OpenField> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = tag_name(&e)?;
                match ctx {
                    Ctx::Top if tag == "templates" => ctx = Ctx::InTemplates,
                    Ctx::InTemplates if tag == "template" => {
                        template = Some(OpenTemplate::begin(&e)?);
                        ctx = Ctx::InTemplate;
                    }
                    Ctx::InTemplate => {
                        field = Some(OpenField::begin(&tag, &e)?);
                        ctx = Ctx::InField;
                    }
                    Ctx::InField => {
                        let f = field.as_mut().expect("open field");
                        f.set_operator(&tag, &e)?;
                        ctx = Ctx::InOperator;
                    }
                    _ => {
                        return Err(TemplateError::malformed(format!(
                            "unexpected element <{tag}>"
                        )))
                    }
                }
            }
            Event::Empty(e) => {
                let tag = tag_name(&e)?;
                match ctx {
                    Ctx::InTemplates if tag == "template" => {
                        let t = OpenTemplate::begin(&e)?;
                        finish_template(&mut store, t)?;
                    }
                    Ctx::InTemplate => {
                        let f = OpenField::begin(&tag, &e)?;
                        template.as_mut().expect("open template").push(f.finish())?;
                    }
                    Ctx::InField => {
                        let f = field.as_mut().expect("open field");
                        f.set_operator(&tag, &e)?;
                    }
                    _ => {
                        return Err(TemplateError::malformed(format!(
                            "unexpected element <{tag}/>"
                        )))
                    }
                }
            }
            Event::End(_) => match ctx {
                Ctx::InOperator => ctx = Ctx::InField,
                Ctx::InField => {
                    let f = field.take().expect("open field");
                    template.as_mut().expect("open template").push(f.finish())?;
                    ctx = Ctx::InTemplate;
                }
                Ctx::InTemplate => {
                    let t = template.take().expect("open template");
                    finish_template(&mut store, t)?;
                    ctx = Ctx::InTemplates;
                }
                Ctx::InTemplates => ctx = Ctx::Top,
                Ctx::Top => {
                    return Err(TemplateError::malformed("unbalanced closing element"))
                }
            },
            Event::Eof => break,
            // declaration, comments, whitespace text
            _ => {}
        }
    }

    if !matches!(ctx, Ctx::Top) {
        return Err(TemplateError::malformed("truncated template definition"));
    }
    if store.is_empty() {
        return Err(TemplateError::malformed("no templates defined"));
    }
    Ok(store)
}

#[derive(Clone, Copy)]
enum Ctx {
    Top,
    InTemplates,
    InTemplate,
    InField,
    InOperator,
}

struct OpenTemplate {
    id: u32,
    fields: Vec<Field>,
    names: HashSet<String>,
}

impl OpenTemplate {
    fn begin(e: &BytesStart) -> Result<Self, TemplateError> {
        let attrs = attributes(e)?;
        let id = attrs
            .get("id")
            .ok_or_else(|| TemplateError::malformed("template is missing an id attribute"))?
            .parse::<u32>()
            .map_err(|_| TemplateError::malformed("template id must be an unsigned integer"))?;
        Ok(Self {
            id,
            fields: Vec::new(),
            names: HashSet::new(),
        })
    }

    fn push(&mut self, field: Field) -> Result<(), TemplateError> {
        if !self.names.insert(field.props.name.clone()) {
            return Err(TemplateError::malformed(format!(
                "template {}: duplicate field name {:?}",
                self.id, field.props.name
            )));
        }
        self.fields.push(field);
        Ok(())
    }
}

fn finish_template(store: &mut Store, t: OpenTemplate) -> Result<(), TemplateError> {
    let id = t.id;
    if store
        .insert(Template {
            id,
            fields: t.fields,
        })
        .is_some()
    {
        return Err(TemplateError::malformed(format!(
            "duplicate template id {id}"
        )));
    }
    Ok(())
}

struct OpenField {
    ty: FieldType,
    props: FieldProperties,
    operator: Option<Operator>,
}

impl OpenField {
    fn begin(tag: &str, e: &BytesStart) -> Result<Self, TemplateError> {
        let attrs = attributes(e)?;
        let ty = field_type(tag, &attrs)?;
        let props = field_properties(tag, &attrs)?;
        Ok(Self {
            ty,
            props,
            operator: None,
        })
    }

    fn set_operator(&mut self, tag: &str, e: &BytesStart) -> Result<(), TemplateError> {
        if self.operator.is_some() {
            return Err(TemplateError::malformed(format!(
                "field {:?}: more than one operator",
                self.props.name
            )));
        }
        let attrs = attributes(e)?;
        let value = attrs
            .get("value")
            .map(|s| convert_value(self.ty, s, &self.props.name))
            .transpose()?;
        self.operator = Some(make_operator(tag, value, self.ty, &self.props.name)?);
        Ok(())
    }

    fn finish(self) -> Field {
        Field {
            props: self.props,
            ty: self.ty,
            operator: self.operator.unwrap_or(Operator::None),
        }
    }
}

fn tag_name(e: &BytesStart) -> Result<String, TemplateError> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(|_| TemplateError::malformed("element name is not UTF-8"))
}

fn attributes(e: &BytesStart) -> Result<HashMap<String, String>, TemplateError> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| TemplateError::malformed(format!("bad attribute: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| TemplateError::malformed("attribute name is not UTF-8"))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| TemplateError::malformed(format!("bad attribute value: {err}")))?
            .into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn field_type(tag: &str, attrs: &HashMap<String, String>) -> Result<FieldType, TemplateError> {
    match tag {
        "string" => match attrs.get("charset").map(String::as_str) {
            None | Some("ascii") => Ok(FieldType::Ascii),
            Some("unicode") => Ok(FieldType::Unicode),
            Some(other) => Err(TemplateError::malformed(format!(
                "unknown string charset {other:?}"
            ))),
        },
        "uInt32" => Ok(FieldType::UInt32),
        "int32" => Ok(FieldType::Int32),
        "uInt64" => Ok(FieldType::UInt64),
        "int64" => Ok(FieldType::Int64),
        "byteVector" => Ok(FieldType::ByteVector),
        "decimal" => Ok(FieldType::Decimal),
        "sequence" | "group" => Err(TemplateError::malformed(format!(
            "<{tag}> fields are not supported"
        ))),
        other => Err(TemplateError::malformed(format!(
            "unknown field tag <{other}>"
        ))),
    }
}

fn field_properties(
    tag: &str,
    attrs: &HashMap<String, String>,
) -> Result<FieldProperties, TemplateError> {
    let id = attrs
        .get("id")
        .ok_or_else(|| TemplateError::malformed(format!("<{tag}> is missing an id attribute")))?
        .parse::<u64>()
        .map_err(|_| TemplateError::malformed(format!("<{tag}> id must be an unsigned integer")))?;
    let name = attrs
        .get("name")
        .ok_or_else(|| TemplateError::malformed(format!("<{tag}> is missing a name attribute")))?
        .clone();
    let required = match attrs.get("presence").map(String::as_str) {
        None | Some("mandatory") => true,
        Some("optional") => false,
        Some(other) => {
            return Err(TemplateError::malformed(format!(
                "field {name:?}: unknown presence {other:?}"
            )))
        }
    };
    Ok(FieldProperties { id, name, required })
}

fn make_operator(
    tag: &str,
    value: Option<Value>,
    ty: FieldType,
    field: &str,
) -> Result<Operator, TemplateError> {
    match tag {
        "constant" => value.map(Operator::Constant).ok_or_else(|| {
            TemplateError::malformed(format!(
                "field {field:?}: no value specified for constant operation"
            ))
        }),
        "default" => Ok(Operator::Default(value.unwrap_or(Value::Null))),
        "copy" => Ok(Operator::Copy(value.unwrap_or(Value::Null))),
        "increment" => {
            if !ty.is_integer() {
                return Err(TemplateError::malformed(format!(
                    "field {field:?}: increment is only valid on integer types"
                )));
            }
            Ok(Operator::Increment(value.unwrap_or(Value::Null)))
        }
        "tail" => Ok(Operator::Tail {
            initial: value.unwrap_or(Value::Null),
            base: tail_base(ty),
        }),
        "delta" => Ok(Operator::Delta(value.unwrap_or(Value::Null))),
        other => Err(TemplateError::malformed(format!(
            "unsupported operation type: {other}"
        ))),
    }
}

fn tail_base(ty: FieldType) -> Value {
    match ty {
        FieldType::Ascii => Value::Ascii(String::new()),
        FieldType::Unicode => Value::Unicode(String::new()),
        FieldType::ByteVector => Value::Bytes(Vec::new()),
        FieldType::UInt32 => Value::UInt32(0),
        FieldType::Int32 => Value::Int32(0),
        FieldType::UInt64 => Value::UInt64(0),
        FieldType::Int64 => Value::Int64(0),
        FieldType::Decimal => Value::Decimal {
            exponent: 0,
            mantissa: 0,
        },
    }
}

fn convert_value(ty: FieldType, s: &str, field: &str) -> Result<Value, TemplateError> {
    let bad = || {
        TemplateError::malformed(format!(
            "field {field:?}: cannot parse {s:?} as {}",
            ty.name()
        ))
    };
    match ty {
        FieldType::UInt32 => s.parse().map(Value::UInt32).map_err(|_| bad()),
        FieldType::Int32 => s.parse().map(Value::Int32).map_err(|_| bad()),
        FieldType::UInt64 => s.parse().map(Value::UInt64).map_err(|_| bad()),
        FieldType::Int64 => s.parse().map(Value::Int64).map_err(|_| bad()),
        FieldType::Ascii => Ok(Value::Ascii(s.to_string())),
        FieldType::Unicode => Ok(Value::Unicode(s.to_string())),
        FieldType::ByteVector => parse_hex(s).map(Value::Bytes).ok_or_else(bad),
        FieldType::Decimal => parse_decimal(s)
            .map(|(exponent, mantissa)| Value::Decimal { exponent, mantissa })
            .ok_or_else(bad),
    }
}

// Byte vector initial values are hex strings.
fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

// Decimal literals like "123.45" become mantissa 12345, exponent -2. No
// float parsing anywhere near wire values.
fn parse_decimal(s: &str) -> Option<(i32, i64)> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let mut mantissa: i64 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        mantissa = mantissa
            .checked_mul(10)?
            .checked_add(i64::from(c as u8 - b'0'))?;
    }
    if negative {
        mantissa = -mantissa;
    }
    Some((-(frac_part.len() as i32), mantissa))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEARTBEAT_XML: &str = include_str!("../templates/heartbeat.xml");

    #[test]
    fn heartbeat_template_loads_with_expected_shape() {
        let store = load_str(HEARTBEAT_XML).unwrap();
        assert_eq!(store.len(), 1);
        let t = store.get(1).expect("template 1");
        let shape: Vec<(u64, FieldType, bool)> = t
            .fields
            .iter()
            .map(|f| (f.props.id, f.ty, f.props.required))
            .collect();
        assert_eq!(
            shape,
            vec![
                (1128, FieldType::Ascii, true),
                (35, FieldType::Ascii, true),
                (34, FieldType::UInt32, true),
                (52, FieldType::UInt64, true),
            ]
        );
        assert!(t.fields.iter().all(|f| f.operator == Operator::None));
        assert_eq!(t.pmap_bits(), 0);
    }

    #[test]
    fn presence_optional_and_default_mandatory() {
        let store = load_str(
            r#"<templates><template id="1">
                <uInt32 id="1" name="a" presence="optional"/>
                <uInt32 id="2" name="b"/>
            </template></templates>"#,
        )
        .unwrap();
        let t = store.get(1).unwrap();
        assert!(!t.fields[0].props.required);
        assert!(t.fields[1].props.required);
    }

    #[test]
    fn operator_children_are_parsed() {
        let store = load_str(
            r#"<templates><template id="1">
                <string id="1" name="a"><constant value="FIX.4.4"/></string>
                <uInt32 id="2" name="b"><default value="9"/></uInt32>
                <uInt32 id="3" name="c"><copy/></uInt32>
                <uInt32 id="4" name="d"><increment value="5"/></uInt32>
                <string id="5" name="e"><tail/></string>
                <int64 id="6" name="f"><delta/></int64>
            </template></templates>"#,
        )
        .unwrap();
        let t = store.get(1).unwrap();
        assert_eq!(
            t.fields[0].operator,
            Operator::Constant(Value::Ascii("FIX.4.4".into()))
        );
        assert_eq!(t.fields[1].operator, Operator::Default(Value::UInt32(9)));
        assert_eq!(t.fields[2].operator, Operator::Copy(Value::Null));
        assert_eq!(t.fields[3].operator, Operator::Increment(Value::UInt32(5)));
        assert_eq!(
            t.fields[4].operator,
            Operator::Tail {
                initial: Value::Null,
                base: Value::Ascii(String::new())
            }
        );
        assert_eq!(t.fields[5].operator, Operator::Delta(Value::Null));
    }

    #[test]
    fn constant_without_value_is_rejected() {
        let err = load_str(
            r#"<templates><template id="1">
                <uInt32 id="1" name="a"><constant/></uInt32>
            </template></templates>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("constant"), "{err}");
    }

    #[test]
    fn increment_on_string_is_rejected() {
        let err = load_str(
            r#"<templates><template id="1">
                <string id="1" name="a"><increment/></string>
            </template></templates>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("increment"), "{err}");
    }

    #[test]
    fn duplicate_field_name_is_rejected() {
        let err = load_str(
            r#"<templates><template id="1">
                <uInt32 id="1" name="a"/>
                <uInt32 id="2" name="a"/>
            </template></templates>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate field name"), "{err}");
    }

    #[test]
    fn duplicate_template_id_is_rejected() {
        let err = load_str(
            r#"<templates>
                <template id="1"><uInt32 id="1" name="a"/></template>
                <template id="1"><uInt32 id="1" name="b"/></template>
            </templates>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate template id"), "{err}");
    }

    #[test]
    fn unknown_field_tag_is_rejected() {
        let err = load_str(
            r#"<templates><template id="1"><float id="1" name="a"/></template></templates>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("float"), "{err}");
    }

    #[test]
    fn sequence_and_group_are_rejected() {
        for tag in ["sequence", "group"] {
            let xml = format!(
                r#"<templates><template id="1"><{tag} id="1" name="a"/></template></templates>"#
            );
            let err = load_str(&xml).unwrap_err();
            assert!(err.to_string().contains("not supported"), "{err}");
        }
    }

    #[test]
    fn unicode_charset_maps_to_unicode_type() {
        let store = load_str(
            r#"<templates><template id="1">
                <string id="1" name="a" charset="unicode"/>
                <string id="2" name="b" charset="ascii"/>
            </template></templates>"#,
        )
        .unwrap();
        let t = store.get(1).unwrap();
        assert_eq!(t.fields[0].ty, FieldType::Unicode);
        assert_eq!(t.fields[1].ty, FieldType::Ascii);
    }

    #[test]
    fn missing_id_or_name_is_rejected() {
        assert!(load_str(
            r#"<templates><template id="1"><uInt32 name="a"/></template></templates>"#
        )
        .is_err());
        assert!(load_str(
            r#"<templates><template id="1"><uInt32 id="1"/></template></templates>"#
        )
        .is_err());
        assert!(load_str(r#"<templates><template><uInt32 id="1" name="a"/></template></templates>"#).is_err());
    }

    #[test]
    fn typed_operator_values_convert() {
        let store = load_str(
            r#"<templates><template id="1">
                <int32 id="1" name="a"><copy value="-5"/></int32>
                <decimal id="2" name="b"><default value="123.45"/></decimal>
                <byteVector id="3" name="c"><constant value="deadbeef"/></byteVector>
            </template></templates>"#,
        )
        .unwrap();
        let t = store.get(1).unwrap();
        assert_eq!(t.fields[0].operator, Operator::Copy(Value::Int32(-5)));
        assert_eq!(
            t.fields[1].operator,
            Operator::Default(Value::Decimal {
                exponent: -2,
                mantissa: 12345
            })
        );
        assert_eq!(
            t.fields[2].operator,
            Operator::Constant(Value::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]))
        );
    }

    #[test]
    fn bad_operator_value_is_rejected() {
        let err = load_str(
            r#"<templates><template id="1">
                <uInt32 id="1" name="a"><copy value="notanumber"/></uInt32>
            </template></templates>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot parse"), "{err}");
    }

    #[test]
    fn decimal_literals_parse_without_floats() {
        assert_eq!(parse_decimal("57"), Some((0, 57)));
        assert_eq!(parse_decimal("123.45"), Some((-2, 12345)));
        assert_eq!(parse_decimal("-0.001"), Some((-3, -1)));
        assert_eq!(parse_decimal(".5"), Some((-1, 5)));
        assert_eq!(parse_decimal("1e5"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn hex_literals_parse() {
        assert_eq!(parse_hex("00ff"), Some(vec![0x00, 0xFF]));
        assert_eq!(parse_hex(""), Some(vec![]));
        assert_eq!(parse_hex("abc"), None);
        assert_eq!(parse_hex("zz"), None);
    }

    #[test]
    fn two_templates_load_independently() {
        let store = load_str(
            r#"<templates>
                <template id="1"><uInt32 id="34" name="seq"/></template>
                <template id="2"><string id="35" name="type"><copy/></string></template>
            </templates>"#,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().pmap_bits(), 0);
        assert_eq!(store.get(2).unwrap().pmap_bits(), 1);
    }
}
