//! Objects of classes known only through their streamer info.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RootError};
use crate::objects::{Named, Object};
use crate::rbuffer::RBuffer;
use crate::streamer::{etype, stl, ElementBase, StreamerElement, StreamerInfo};

/// One decoded member value.
#[derive(Debug)]
pub enum Value {
    /// `bool`.
    Bool(bool),
    /// `char`.
    I8(i8),
    /// `short`.
    I16(i16),
    /// `int`.
    I32(i32),
    /// `long`, `Long64_t`.
    I64(i64),
    /// `unsigned char`.
    U8(u8),
    /// `unsigned short`.
    U16(u16),
    /// `unsigned int`, `UInt_t` bit fields.
    U32(u32),
    /// `unsigned long`, `ULong64_t`.
    U64(u64),
    /// `float`, `Float16_t`.
    F32(f32),
    /// `double`, `Double32_t`.
    F64(f64),
    /// `TString`, `std::string`, `char*`.
    Str(String),
    /// Fixed or variable-length arrays and STL sequences.
    Array(Vec<Value>),
    /// An embedded object or base class.
    Object(Box<dyn Object>),
    /// An object pointer.
    Ref(Option<Arc<dyn Object>>),
}

impl Value {
    /// Integer members, widened.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::Bool(v) => i64::from(v),
            Value::I8(v) => i64::from(v),
            Value::I16(v) => i64::from(v),
            Value::I32(v) => i64::from(v),
            Value::I64(v) => v,
            Value::U8(v) => i64::from(v),
            Value::U16(v) => i64::from(v),
            Value::U32(v) => i64::from(v),
            Value::U64(v) => i64::try_from(v).ok()?,
            _ => return None,
        })
    }

    /// Numeric members as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(f64::from(v)),
            Value::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// String members.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Array members.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Embedded objects, and non-null pointers.
    pub fn as_object(&self) -> Option<&dyn Object> {
        match self {
            Value::Object(o) => Some(&**o),
            Value::Ref(Some(o)) => Some(&**o),
            _ => None,
        }
    }
}

/// An instance decoded member by member from its class's streamer info.
pub struct GenericObject {
    info: Arc<StreamerInfo>,
    version: i16,
    members: Vec<(String, Value)>,
}

impl GenericObject {
    /// Empty instance of the class described by `info`.
    pub fn new(info: Arc<StreamerInfo>) -> Self {
        Self { info, version: 0, members: Vec::new() }
    }

    /// Streamer info used for the last decode.
    pub fn info(&self) -> &StreamerInfo {
        &self.info
    }

    /// Class version found in the stream.
    pub fn version(&self) -> i16 {
        self.version
    }

    /// Decoded members, bases included, in streaming order.
    pub fn members(&self) -> &[(String, Value)] {
        &self.members
    }

    /// Member `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn read_member(&self, r: &mut RBuffer<'_>, elem: &StreamerElement) -> Result<Value> {
        let base = elem.elem();
        match elem {
            StreamerElement::Base { .. } => Ok(Value::Object(read_embedded(r, base.name())?)),
            StreamerElement::BasicType(_) => read_basic(r, base),
            StreamerElement::BasicPointer { count, .. } => {
                let n = self
                    .get(&count.name)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        RootError::Consistency(format!(
                            "{}::{}: counter {:?} not decoded before the array",
                            self.info.name(),
                            base.name(),
                            count.name
                        ))
                    })?;
                let n = usize::try_from(n).map_err(|_| {
                    RootError::Format(format!("{}: negative array length {}", base.name(), n))
                })?;
                // is-array flag
                let _ = r.read_i8()?;
                let t = base.etype() - etype::OFFSET_P;
                let mut out = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    out.push(read_scalar(r, t, base)?);
                }
                Ok(Value::Array(out))
            }
            StreamerElement::String(_) | StreamerElement::StlString { .. } => {
                Ok(Value::Str(r.read_string()?))
            }
            StreamerElement::Object(_) | StreamerElement::ObjectAny(_) => {
                Ok(Value::Object(read_embedded(r, base.type_name())?))
            }
            StreamerElement::ObjectPointer(_) | StreamerElement::ObjectAnyPointer(_) => {
                Ok(Value::Ref(r.read_object_any()?))
            }
            StreamerElement::Stl { vtype, ctype, .. } => read_stl(r, base, *vtype, *ctype),
            StreamerElement::Loop { .. } | StreamerElement::Artificial(_) => {
                Err(RootError::NotImplemented(format!(
                    "{}::{}: {} members",
                    self.info.name(),
                    base.name(),
                    elem.class_name()
                )))
            }
        }
    }
}

/// Decode an embedded instance of `class`, through the registry when it has
/// a decoder and through its streamer info otherwise.
fn read_embedded(r: &mut RBuffer<'_>, class: &str) -> Result<Box<dyn Object>> {
    let mut obj = r.instantiate(class)?;
    r.nested(class, |r| obj.unmarshal(r))?;
    Ok(obj)
}

fn read_basic(r: &mut RBuffer<'_>, elem: &ElementBase) -> Result<Value> {
    let t = elem.etype();
    if t == etype::CHAR_STAR {
        return read_char_star(r);
    }
    if etype::OFFSET_L < t && t < etype::OFFSET_P {
        let n = usize::try_from(elem.array_len()).unwrap_or(0);
        let mut out = Vec::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            out.push(read_scalar(r, t - etype::OFFSET_L, elem)?);
        }
        return Ok(Value::Array(out));
    }
    read_scalar(r, t, elem)
}

fn read_char_star(r: &mut RBuffer<'_>) -> Result<Value> {
    let n = r.read_i32()?;
    if n <= 0 {
        return Ok(Value::Str(String::new()));
    }
    let bytes = r.read_bytes(n as usize)?;
    Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
}

fn read_scalar(r: &mut RBuffer<'_>, t: i32, elem: &ElementBase) -> Result<Value> {
    Ok(match t {
        etype::BOOL => Value::Bool(r.read_bool()?),
        etype::CHAR | etype::LEGACY_CHAR => Value::I8(r.read_i8()?),
        etype::SHORT => Value::I16(r.read_i16()?),
        etype::INT | etype::COUNTER => Value::I32(r.read_i32()?),
        etype::LONG | etype::LONG64 => Value::I64(r.read_i64()?),
        etype::UCHAR => Value::U8(r.read_u8()?),
        etype::USHORT => Value::U16(r.read_u16()?),
        etype::UINT | etype::BITS => Value::U32(r.read_u32()?),
        etype::ULONG | etype::ULONG64 => Value::U64(r.read_u64()?),
        etype::FLOAT => Value::F32(r.read_f32()?),
        etype::DOUBLE => Value::F64(r.read_f64()?),
        etype::CHAR_STAR => read_char_star(r)?,
        etype::DOUBLE32 => {
            let (xmin, _, factor) = elem.range();
            if factor > 0.0 {
                Value::F64(xmin + f64::from(r.read_u32()?) / factor)
            } else {
                Value::F64(f64::from(r.read_f32()?))
            }
        }
        etype::FLOAT16 => {
            let (xmin, _, factor) = elem.range();
            if factor > 0.0 {
                Value::F32((xmin + f64::from(r.read_u32()?) / factor) as f32)
            } else {
                return Err(RootError::NotImplemented(format!(
                    "{}: Float16_t without a range",
                    elem.name()
                )));
            }
        }
        other => {
            return Err(RootError::NotImplemented(format!(
                "{}: basic type code {}",
                elem.name(),
                other
            )))
        }
    })
}

fn read_stl(r: &mut RBuffer<'_>, elem: &ElementBase, vtype: i32, ctype: i32) -> Result<Value> {
    if vtype != stl::VECTOR {
        return Err(RootError::NotImplemented(format!(
            "{}: STL container kind {} ({})",
            elem.name(),
            vtype,
            elem.type_name()
        )));
    }
    let strings = ctype == etype::STL_STRING || is_string_vector(elem.type_name());
    let basic = (etype::CHAR..=etype::FLOAT16).contains(&ctype) && ctype != etype::CHAR_STAR;
    if !strings && !basic {
        return Err(RootError::NotImplemented(format!(
            "{}: vector of {} (type code {})",
            elem.name(),
            elem.type_name(),
            ctype
        )));
    }

    let v = r.read_version(elem.type_name())?;
    let n = r.read_i32()?;
    let n = usize::try_from(n)
        .map_err(|_| RootError::Format(format!("{}: negative vector length {}", elem.name(), n)))?;
    let mut out = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        out.push(if strings { Value::Str(r.read_string()?) } else { read_scalar(r, ctype, elem)? });
    }
    r.check_byte_count(&v, elem.type_name())?;
    Ok(Value::Array(out))
}

fn is_string_vector(type_name: &str) -> bool {
    let inner = type_name
        .trim_start_matches("std::")
        .strip_prefix("vector<")
        .and_then(|s| s.strip_suffix('>'))
        .map(str::trim);
    matches!(inner, Some("string" | "std::string" | "TString"))
}

impl fmt::Debug for GenericObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericObject")
            .field("class", &self.info.name())
            .field("version", &self.version)
            .field("members", &self.members)
            .finish()
    }
}

impl Object for GenericObject {
    fn class(&self) -> &str {
        self.info.name()
    }

    fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let class = self.info.name().to_string();
        let v = r.read_version(&class)?;
        self.version = v.version;

        // Prefer the layout matching the streamed version.
        if i32::from(v.version) != self.info.class_version() {
            if let Some(si) = r.context().and_then(|ctx| ctx.streamer_info(&class, v.version.into())) {
                self.info = si;
            }
        }

        let info = Arc::clone(&self.info);
        self.members.clear();
        self.members.reserve(info.elements().len());
        for elem in info.elements() {
            let value = self
                .read_member(r, elem)
                .map_err(|e| r.poison(e).context(format!("{}::{}", class, elem.name())))?;
            self.members.push((elem.name().to_string(), value));
        }
        r.check_byte_count(&v, &class)
    }

    crate::objects::object_any!();

    fn as_named(&self) -> Option<&dyn Named> {
        self.info
            .elements()
            .iter()
            .zip(&self.members)
            .filter(|(elem, _)| matches!(elem, StreamerElement::Base { .. }))
            .find_map(|(_, (_, value))| match value {
                Value::Object(obj) => obj.as_named(),
                _ => None,
            })
    }
}
