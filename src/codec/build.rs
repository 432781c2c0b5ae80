//! Type-descriptor interpretation.
//!
//! A descriptor blob is a sequence of self-delimited descriptors, each
//! `u8 kind | uuid id | payload`. References between descriptors are
//! ids: a reference must name a built-in scalar or a descriptor seen
//! earlier in the blob or in a previous blob of the same connection.
use bytes::Bytes;
use std::sync::Arc;

use crate::{buffer::ReadBuffer, protocol::ProtocolError};

use super::{
    Codec, ObjectShape, Registry, ShapeField,
    composite::{
        ArrayCodec, EnumCodec, NamedTupleCodec, ObjectCodec, ScalarAliasCodec, SetCodec,
        TupleCodec,
    },
};

const KIND_SET: u8 = 0;
const KIND_SHAPE: u8 = 1;
const KIND_BASE_SCALAR: u8 = 2;
const KIND_SCALAR: u8 = 3;
const KIND_TUPLE: u8 = 4;
const KIND_NAMED_TUPLE: u8 = 5;
const KIND_ARRAY: u8 = 6;
const KIND_ENUM: u8 = 7;

pub(super) fn build(
    registry: &mut Registry,
    descriptor: Bytes,
) -> Result<Arc<dyn Codec>, ProtocolError> {
    let mut buf = ReadBuffer::new(descriptor);
    let mut last = None;

    while !buf.is_empty() {
        let kind = buf.read_u8()?;
        let id = buf.read_uuid()?;

        let codec: Arc<dyn Codec> = match kind {
            KIND_SET => {
                let element = registry.lookup(buf.read_uuid()?)?;
                Arc::new(SetCodec::new(element))
            }
            KIND_SHAPE => {
                let count = buf.read_u16()?;
                let mut fields = Vec::with_capacity(count as usize);
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let flags = buf.read_u8()?;
                    let name = buf.read_string()?;
                    elements.push(registry.lookup(buf.read_uuid()?)?);
                    fields.push(ShapeField { name, flags });
                }
                Arc::new(ObjectCodec::new(Arc::new(ObjectShape { fields }), elements))
            }
            KIND_BASE_SCALAR => registry.lookup(id)?,
            KIND_SCALAR => {
                let base = registry.lookup(buf.read_uuid()?)?;
                Arc::new(ScalarAliasCodec::new(base))
            }
            KIND_TUPLE => {
                let count = buf.read_u16()?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(registry.lookup(buf.read_uuid()?)?);
                }
                Arc::new(TupleCodec::new(elements))
            }
            KIND_NAMED_TUPLE => {
                let count = buf.read_u16()?;
                let mut names = Vec::with_capacity(count as usize);
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    names.push(buf.read_string()?);
                    elements.push(registry.lookup(buf.read_uuid()?)?);
                }
                Arc::new(NamedTupleCodec::new(names.into(), elements))
            }
            KIND_ARRAY => {
                let element = registry.lookup(buf.read_uuid()?)?;
                let ndims = buf.read_i16()?;
                if ndims != 1 {
                    return Err(ProtocolError::malformed("array descriptor with unsupported dimensions"));
                }
                Arc::new(ArrayCodec::new(element))
            }
            KIND_ENUM => {
                let count = buf.read_u16()?;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    members.push(buf.read_string()?);
                }
                Arc::new(EnumCodec::new(members.into()))
            }
            _ => return Err(ProtocolError::malformed("unknown type descriptor kind")),
        };

        registry.insert(id, codec.clone());
        last = Some(codec);
    }

    last.ok_or_else(|| ProtocolError::malformed("empty type descriptor"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        buffer::WriteBuffer,
        codec::{Value, decode_frame, scalar},
    };
    use uuid::Uuid;

    fn desc(kind: u8, id: Uuid, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn str_payload(s: &str) -> Vec<u8> {
        let mut out = (s.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn tuple_of_base_scalars() {
        let tuple_id = Uuid::from_u128(0xaaaa);
        let mut blob = vec![];
        blob.extend(desc(KIND_BASE_SCALAR, scalar::STD_INT32, &[]));
        blob.extend(desc(KIND_BASE_SCALAR, scalar::STD_STR, &[]));
        let mut payload = 2u16.to_be_bytes().to_vec();
        payload.extend_from_slice(scalar::STD_INT32.as_bytes());
        payload.extend_from_slice(scalar::STD_STR.as_bytes());
        blob.extend(desc(KIND_TUPLE, tuple_id, &payload));

        let mut registry = Registry::new();
        let codec = registry.build_codec(blob.into()).unwrap();
        assert!(registry.contains(&tuple_id));

        let value = Value::Tuple(vec![Value::Int32(7), Value::Str("ok".into())]);
        let mut out = WriteBuffer::new();
        codec.encode(&mut out, &value).unwrap();
        let mut read = crate::buffer::ReadBuffer::new(out.unwrap());
        assert_eq!(decode_frame(codec.as_ref(), &mut read).unwrap(), value);
    }

    #[test]
    fn object_shape_decodes() {
        let shape_id = Uuid::from_u128(0xbbbb);
        let mut payload = 2u16.to_be_bytes().to_vec();
        payload.push(0);
        payload.extend(str_payload("id"));
        payload.extend_from_slice(scalar::STD_INT64.as_bytes());
        payload.push(0);
        payload.extend(str_payload("name"));
        payload.extend_from_slice(scalar::STD_STR.as_bytes());
        let blob = desc(KIND_SHAPE, shape_id, &payload);

        let mut registry = Registry::new();
        let codec = registry.build_codec(blob.into()).unwrap();

        // count 2 | [reserved, frame] per field
        let mut row = 2i32.to_be_bytes().to_vec();
        row.extend_from_slice(&0i32.to_be_bytes());
        row.extend_from_slice(&8i32.to_be_bytes());
        row.extend_from_slice(&42i64.to_be_bytes());
        row.extend_from_slice(&0i32.to_be_bytes());
        row.extend_from_slice(&2i32.to_be_bytes());
        row.extend_from_slice(b"Ix");

        let mut read = crate::buffer::ReadBuffer::new(row.into());
        let Value::Object { shape, values } = codec.decode(&mut read).unwrap() else {
            panic!("expected object");
        };
        assert_eq!(shape.fields[0].name, "id");
        assert_eq!(shape.fields[1].name, "name");
        assert_eq!(values, [Value::Int64(42), Value::Str("Ix".into())]);
    }

    #[test]
    fn unknown_reference_is_a_protocol_error() {
        let set_id = Uuid::from_u128(0xcccc);
        let missing = Uuid::from_u128(0xdddd);
        let blob = desc(KIND_SET, set_id, missing.as_bytes());

        let mut registry = Registry::new();
        let err = registry.build_codec(blob.into()).unwrap_err();
        assert!(err.to_string().contains("unknown type descriptor"));
        assert!(!registry.contains(&set_id));
    }

    #[test]
    fn registry_is_monotonic_across_builds() {
        let enum_id = Uuid::from_u128(0xeeee);
        let mut payload = 2u16.to_be_bytes().to_vec();
        payload.extend(str_payload("red"));
        payload.extend(str_payload("blue"));
        let blob = desc(KIND_ENUM, enum_id, &payload);

        let mut registry = Registry::new();
        registry.build_codec(Bytes::from(blob.clone())).unwrap();
        let before = registry.len();
        // a later describe round mentioning the same id changes nothing
        registry.build_codec(Bytes::from(blob)).unwrap();
        assert_eq!(registry.len(), before);

        let codec = registry.get(&enum_id).unwrap();
        let mut out = WriteBuffer::new();
        codec.encode(&mut out, &Value::Enum("red".into())).unwrap();
        assert!(codec.encode(&mut out, &Value::Enum("green".into())).is_err());
    }

    #[test]
    fn array_and_set_payloads() {
        let array_id = Uuid::from_u128(0x1111);
        let mut payload = scalar::STD_INT32.as_bytes().to_vec();
        payload.extend_from_slice(&1i16.to_be_bytes());
        let blob = desc(KIND_ARRAY, array_id, &payload);

        let mut registry = Registry::new();
        let codec = registry.build_codec(blob.into()).unwrap();

        let value = Value::Array(vec![Value::Int32(1), Value::Int32(-1)]);
        let mut out = WriteBuffer::new();
        codec.encode(&mut out, &value).unwrap();
        let mut read = crate::buffer::ReadBuffer::new(out.unwrap());
        assert_eq!(decode_frame(codec.as_ref(), &mut read).unwrap(), value);

        let empty = Value::Array(vec![]);
        let mut out = WriteBuffer::new();
        codec.encode(&mut out, &empty).unwrap();
        let mut read = crate::buffer::ReadBuffer::new(out.unwrap());
        assert_eq!(decode_frame(codec.as_ref(), &mut read).unwrap(), empty);
    }
}
