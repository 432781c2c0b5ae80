//! Codecs built from type descriptors: containers, shapes and aliases.
use std::sync::Arc;

use crate::{
    buffer::{ReadBuffer, WriteBuffer},
    ext::UsizeExt,
};

use super::{Codec, DecodeError, EncodeError, ObjectShape, Value, decode_frame};

/// A user-defined scalar deriving from a base scalar.
#[derive(Debug)]
pub(crate) struct ScalarAliasCodec {
    base: Arc<dyn Codec>,
}

impl ScalarAliasCodec {
    pub(crate) fn new(base: Arc<dyn Codec>) -> Self {
        Self { base }
    }
}

impl Codec for ScalarAliasCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        self.base.encode(buf, value)
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        self.base.decode(buf)
    }
}

/// Tuple payload: `i32 count`, then per element `i32 reserved` plus a
/// length-prefixed sub-frame.
fn encode_elements(
    buf: &mut WriteBuffer,
    codecs: &[Arc<dyn Codec>],
    values: &[Value],
) -> Result<(), EncodeError> {
    if values.len() != codecs.len() {
        return Err(EncodeError::Arity { expected: codecs.len(), got: values.len() });
    }
    let frame = buf.begin_len_prefix();
    buf.write_i32(values.len().to_i32());
    for (codec, value) in codecs.iter().zip(values) {
        buf.write_i32(0);
        codec.encode(buf, value)?;
    }
    buf.end_len_prefix(frame);
    Ok(())
}

fn decode_elements(
    buf: &mut ReadBuffer,
    codecs: &[Arc<dyn Codec>],
) -> Result<Vec<Value>, DecodeError> {
    let count = buf.read_i32()?;
    if count as usize != codecs.len() {
        return Err(DecodeError::Malformed("element count does not match the shape".into()));
    }
    let mut values = Vec::with_capacity(codecs.len());
    for codec in codecs {
        buf.discard(4)?;
        values.push(decode_frame(codec.as_ref(), buf)?);
    }
    Ok(values)
}

#[derive(Debug)]
pub(crate) struct TupleCodec {
    elements: Vec<Arc<dyn Codec>>,
}

impl TupleCodec {
    pub(crate) fn new(elements: Vec<Arc<dyn Codec>>) -> Self {
        Self { elements }
    }
}

impl Codec for TupleCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let values = match value {
            Value::Tuple(values) => values,
            Value::NamedTuple { values, .. } => values,
            other => return Err(EncodeError::mismatch("Tuple", other)),
        };
        encode_elements(buf, &self.elements, values)
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::Tuple(decode_elements(buf, &self.elements)?))
    }
}

#[derive(Debug)]
pub(crate) struct NamedTupleCodec {
    names: Arc<[String]>,
    elements: Vec<Arc<dyn Codec>>,
}

impl NamedTupleCodec {
    pub(crate) fn new(names: Arc<[String]>, elements: Vec<Arc<dyn Codec>>) -> Self {
        Self { names, elements }
    }
}

impl Codec for NamedTupleCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let values = match value {
            Value::Tuple(values) => values,
            Value::NamedTuple { values, .. } => values,
            other => return Err(EncodeError::mismatch("NamedTuple", other)),
        };
        encode_elements(buf, &self.elements, values)
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::NamedTuple {
            names: self.names.clone(),
            values: decode_elements(buf, &self.elements)?,
        })
    }
}

/// Array payload: `i32 ndims | i32 flags | i32 reserved`, then for one
/// dimension `i32 upper | i32 lower` and the length-prefixed elements.
/// Zero dimensions is the empty array.
#[derive(Debug)]
pub(crate) struct ArrayCodec {
    element: Arc<dyn Codec>,
}

impl ArrayCodec {
    pub(crate) fn new(element: Arc<dyn Codec>) -> Self {
        Self { element }
    }
}

fn decode_dimensions(buf: &mut ReadBuffer, element: &dyn Codec) -> Result<Vec<Value>, DecodeError> {
    let ndims = buf.read_i32()?;
    let _flags = buf.read_i32()?;
    let _reserved = buf.read_i32()?;
    if ndims == 0 {
        return Ok(Vec::new());
    }
    if ndims != 1 {
        return Err(DecodeError::Malformed("multidimensional arrays are not supported".into()));
    }
    let upper = buf.read_i32()?;
    let lower = buf.read_i32()?;
    let count = (upper - lower + 1).max(0) as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode_frame(element, buf)?);
    }
    Ok(values)
}

fn encode_dimensions(
    buf: &mut WriteBuffer,
    element: &dyn Codec,
    values: &[Value],
) -> Result<(), EncodeError> {
    let frame = buf.begin_len_prefix();
    if values.is_empty() {
        buf.write_i32(0);
        buf.write_i32(0);
        buf.write_i32(0);
    } else {
        buf.write_i32(1);
        buf.write_i32(0);
        buf.write_i32(0);
        buf.write_i32(values.len().to_i32());
        buf.write_i32(1);
        for value in values {
            element.encode(buf, value)?;
        }
    }
    buf.end_len_prefix(frame);
    Ok(())
}

impl Codec for ArrayCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Array(values) = value else {
            return Err(EncodeError::mismatch("Array", value));
        };
        encode_dimensions(buf, self.element.as_ref(), values)
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::Array(decode_dimensions(buf, self.element.as_ref())?))
    }
}

/// Sets share the array payload but only occur in output.
#[derive(Debug)]
pub(crate) struct SetCodec {
    element: Arc<dyn Codec>,
}

impl SetCodec {
    pub(crate) fn new(element: Arc<dyn Codec>) -> Self {
        Self { element }
    }
}

impl Codec for SetCodec {
    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NotSupported("a set"))
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::Set(decode_dimensions(buf, self.element.as_ref())?))
    }
}

/// Object shapes only occur in output.
#[derive(Debug)]
pub(crate) struct ObjectCodec {
    shape: Arc<ObjectShape>,
    elements: Vec<Arc<dyn Codec>>,
}

impl ObjectCodec {
    pub(crate) fn new(shape: Arc<ObjectShape>, elements: Vec<Arc<dyn Codec>>) -> Self {
        Self { shape, elements }
    }
}

impl Codec for ObjectCodec {
    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NotSupported("an object"))
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::Object {
            shape: self.shape.clone(),
            values: decode_elements(buf, &self.elements)?,
        })
    }
}

/// Enumeration member, a string constrained on input.
#[derive(Debug)]
pub(crate) struct EnumCodec {
    members: Arc<[String]>,
}

impl EnumCodec {
    pub(crate) fn new(members: Arc<[String]>) -> Self {
        Self { members }
    }
}

impl Codec for EnumCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let member = match value {
            Value::Enum(member) => member,
            Value::Str(member) => member,
            other => return Err(EncodeError::mismatch("Enum", other)),
        };
        if !self.members.iter().any(|m| m == member) {
            return Err(EncodeError::UnknownEnumMember(member.clone()));
        }
        buf.write_string(member);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        let bytes = buf.read_bytes(buf.remaining())?;
        match String::from_utf8(bytes.into()) {
            Ok(member) => Ok(Value::Enum(member)),
            Err(_) => Err(DecodeError::Malformed("enum member is not valid utf8".into())),
        }
    }
}
