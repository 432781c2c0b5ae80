//! Base scalar codecs, pre-registered under their well-known type ids.
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    buffer::{ReadBuffer, WriteBuffer},
    ext::UsizeExt,
};

use super::{BigInt, Codec, DecodeError, Decimal, EncodeError, Value};

const fn std_type(tail: u8) -> Uuid {
    Uuid::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, tail])
}

pub(crate) const NULL_ID: Uuid = Uuid::nil();
pub(crate) const STD_UUID: Uuid = std_type(0x00);
pub(crate) const STD_STR: Uuid = std_type(0x01);
pub(crate) const STD_BYTES: Uuid = std_type(0x02);
pub(crate) const STD_INT16: Uuid = std_type(0x03);
pub(crate) const STD_INT32: Uuid = std_type(0x04);
pub(crate) const STD_INT64: Uuid = std_type(0x05);
pub(crate) const STD_FLOAT32: Uuid = std_type(0x06);
pub(crate) const STD_FLOAT64: Uuid = std_type(0x07);
pub(crate) const STD_DECIMAL: Uuid = std_type(0x08);
pub(crate) const STD_BOOL: Uuid = std_type(0x09);
pub(crate) const STD_DATETIME: Uuid = std_type(0x0a);
pub(crate) const CAL_LOCAL_DATETIME: Uuid = std_type(0x0b);
pub(crate) const CAL_LOCAL_DATE: Uuid = std_type(0x0c);
pub(crate) const CAL_LOCAL_TIME: Uuid = std_type(0x0d);
pub(crate) const STD_DURATION: Uuid = std_type(0x0e);
pub(crate) const STD_JSON: Uuid = std_type(0x0f);
pub(crate) const STD_BIGINT: Uuid = std_type(0x10);

/// Resolve a well-known type id to its built-in codec.
pub(crate) fn known_codec(id: &Uuid) -> Option<Arc<dyn Codec>> {
    let codec: Arc<dyn Codec> = match *id {
        NULL_ID => Arc::new(NullCodec),
        STD_UUID => Arc::new(UuidCodec),
        STD_STR => Arc::new(StrCodec),
        STD_BYTES => Arc::new(BytesCodec),
        STD_INT16 => Arc::new(Int16Codec),
        STD_INT32 => Arc::new(Int32Codec),
        STD_INT64 => Arc::new(Int64Codec),
        STD_FLOAT32 => Arc::new(Float32Codec),
        STD_FLOAT64 => Arc::new(Float64Codec),
        STD_DECIMAL => Arc::new(DecimalCodec),
        STD_BOOL => Arc::new(BoolCodec),
        STD_DATETIME => Arc::new(DatetimeCodec),
        CAL_LOCAL_DATETIME => Arc::new(LocalDatetimeCodec),
        CAL_LOCAL_DATE => Arc::new(LocalDateCodec),
        CAL_LOCAL_TIME => Arc::new(LocalTimeCodec),
        STD_DURATION => Arc::new(DurationCodec),
        STD_JSON => Arc::new(JsonCodec),
        STD_BIGINT => Arc::new(BigIntCodec),
        _ => return None,
    };
    Some(codec)
}

/// Codec of the all-zero type id: no input, no output.
#[derive(Debug)]
pub(crate) struct NullCodec;

impl Codec for NullCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        match value {
            // an empty argument block
            Value::Nothing => {
                buf.write_i32(0);
                Ok(())
            }
            Value::Tuple(values) if values.is_empty() => {
                buf.write_i32(0);
                Ok(())
            }
            other => Err(EncodeError::mismatch("no arguments", other)),
        }
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        match buf.is_empty() {
            true => Ok(Value::Nothing),
            false => Err(DecodeError::Malformed("null codec with non-empty payload".into())),
        }
    }
}

macro_rules! fixed_scalar {
    ($(
        $(#[$doc:meta])*
        struct $name:ident, $variant:ident($ty:ty), $write:ident, $read:ident;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub(crate) struct $name;

        impl Codec for $name {
            fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
                let Value::$variant(value) = value else {
                    return Err(EncodeError::mismatch(stringify!($variant), value));
                };
                buf.write_i32(size_of::<$ty>() as i32);
                buf.$write(*value);
                Ok(())
            }

            fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
                Ok(Value::$variant(buf.$read()?))
            }
        }
    )*};
}

fixed_scalar! {
    struct Int16Codec, Int16(i16), write_i16, read_i16;
    struct Int32Codec, Int32(i32), write_i32, read_i32;
    /// Decodes to a native `i64`, full width preserved.
    struct Int64Codec, Int64(i64), write_i64, read_i64;
    struct Float32Codec, Float32(f32), write_f32, read_f32;
    struct Float64Codec, Float64(f64), write_f64, read_f64;
}

#[derive(Debug)]
pub(crate) struct BoolCodec;

impl Codec for BoolCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Bool(value) = value else {
            return Err(EncodeError::mismatch("Bool", value));
        };
        buf.write_i32(1);
        buf.write_u8(*value as u8);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        match buf.read_u8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            _ => Err(DecodeError::Malformed("invalid bool byte".into())),
        }
    }
}

#[derive(Debug)]
pub(crate) struct StrCodec;

impl Codec for StrCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Str(value) = value else {
            return Err(EncodeError::mismatch("Str", value));
        };
        buf.write_string(value);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        let bytes = buf.read_bytes(buf.remaining())?;
        match String::from_utf8(bytes.into()) {
            Ok(s) => Ok(Value::Str(s)),
            Err(_) => Err(DecodeError::Malformed("string is not valid utf8".into())),
        }
    }
}

#[derive(Debug)]
pub(crate) struct BytesCodec;

impl Codec for BytesCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Bytes(value) = value else {
            return Err(EncodeError::mismatch("Bytes", value));
        };
        buf.write_len_prefixed_bytes(value);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::Bytes(buf.read_bytes(buf.remaining())?))
    }
}

#[derive(Debug)]
pub(crate) struct UuidCodec;

impl Codec for UuidCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Uuid(value) = value else {
            return Err(EncodeError::mismatch("Uuid", value));
        };
        buf.write_i32(16);
        buf.write_bytes(value.as_bytes());
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        Ok(Value::Uuid(buf.read_uuid()?))
    }
}

/// JSON travels as a one-byte format version followed by the document.
#[derive(Debug)]
pub(crate) struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Json(value) = value else {
            return Err(EncodeError::mismatch("Json", value));
        };
        buf.write_i32(1 + value.len().to_i32());
        buf.write_u8(1);
        buf.write_bytes(value.as_bytes());
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        if buf.read_u8()? != 1 {
            return Err(DecodeError::Malformed("unknown json format version".into()));
        }
        let bytes = buf.read_bytes(buf.remaining())?;
        match String::from_utf8(bytes.into()) {
            Ok(s) => Ok(Value::Json(s)),
            Err(_) => Err(DecodeError::Malformed("json is not valid utf8".into())),
        }
    }
}

macro_rules! temporal_scalar {
    ($(
        $(#[$doc:meta])*
        struct $name:ident, $variant:ident { $field:ident: $ty:ty }, $write:ident, $read:ident;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub(crate) struct $name;

        impl Codec for $name {
            fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
                let Value::$variant { $field } = value else {
                    return Err(EncodeError::mismatch(stringify!($variant), value));
                };
                buf.write_i32(size_of::<$ty>() as i32);
                buf.$write(*$field);
                Ok(())
            }

            fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
                Ok(Value::$variant { $field: buf.$read()? })
            }
        }
    )*};
}

temporal_scalar! {
    struct DatetimeCodec, Datetime { micros: i64 }, write_i64, read_i64;
    struct LocalDatetimeCodec, LocalDatetime { micros: i64 }, write_i64, read_i64;
    struct LocalDateCodec, LocalDate { days: i32 }, write_i32, read_i32;
    struct LocalTimeCodec, LocalTime { micros: i64 }, write_i64, read_i64;
}

/// Durations carry day and month components on the wire, both required
/// to be zero for this scalar.
#[derive(Debug)]
pub(crate) struct DurationCodec;

impl Codec for DurationCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Duration { micros } = value else {
            return Err(EncodeError::mismatch("Duration", value));
        };
        buf.write_i32(16);
        buf.write_i64(*micros);
        buf.write_i32(0);
        buf.write_i32(0);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        let micros = buf.read_i64()?;
        let days = buf.read_i32()?;
        let months = buf.read_i32()?;
        if days != 0 || months != 0 {
            return Err(DecodeError::Malformed(
                "duration with non-zero days or months".into(),
            ));
        }
        Ok(Value::Duration { micros })
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;

fn read_numeric(buf: &mut ReadBuffer) -> Result<(bool, i16, u16, Vec<u16>), DecodeError> {
    let ndigits = buf.read_u16()?;
    let weight = buf.read_i16()?;
    let negative = match buf.read_u16()? {
        NUMERIC_POS => false,
        NUMERIC_NEG => true,
        _ => return Err(DecodeError::Malformed("invalid numeric sign".into())),
    };
    let scale = buf.read_u16()?;
    let mut digits = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let digit = buf.read_u16()?;
        if digit > 9999 {
            return Err(DecodeError::Malformed("numeric digit out of range".into()));
        }
        digits.push(digit);
    }
    Ok((negative, weight, scale, digits))
}

fn write_numeric(buf: &mut WriteBuffer, negative: bool, weight: i16, scale: u16, digits: &[u16]) {
    buf.write_i32(8 + 2 * digits.len().to_i32());
    buf.write_u16(digits.len().to_u16());
    buf.write_i16(weight);
    buf.write_u16(if negative { NUMERIC_NEG } else { NUMERIC_POS });
    buf.write_u16(scale);
    for &digit in digits {
        buf.write_u16(digit);
    }
}

#[derive(Debug)]
pub(crate) struct BigIntCodec;

impl Codec for BigIntCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::BigInt(value) = value else {
            return Err(EncodeError::mismatch("BigInt", value));
        };
        write_numeric(buf, value.negative, value.weight, 0, &value.digits);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        let (negative, weight, scale, digits) = read_numeric(buf)?;
        if scale != 0 {
            return Err(DecodeError::Malformed("bigint with non-zero scale".into()));
        }
        Ok(Value::BigInt(BigInt { negative, weight, digits }))
    }
}

#[derive(Debug)]
pub(crate) struct DecimalCodec;

impl Codec for DecimalCodec {
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Decimal(value) = value else {
            return Err(EncodeError::mismatch("Decimal", value));
        };
        write_numeric(buf, value.negative, value.weight, value.scale, &value.digits);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuffer) -> Result<Value, DecodeError> {
        let (negative, weight, scale, digits) = read_numeric(buf)?;
        Ok(Value::Decimal(Decimal { negative, weight, scale, digits }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::decode_frame;
    use bytes::Bytes;

    fn roundtrip(codec: &dyn Codec, value: Value) -> Value {
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        let mut read = ReadBuffer::new(buf.unwrap());
        decode_frame(codec, &mut read).unwrap()
    }

    #[test]
    fn int32_wire_bytes() {
        let mut buf = WriteBuffer::new();
        Int32Codec.encode(&mut buf, &Value::Int32(-123456)).unwrap();
        let bytes = buf.unwrap();
        assert_eq!(&bytes[..], &[0x00, 0x00, 0x00, 0x04, 0xff, 0xfe, 0x1d, 0xc0]);

        let mut read = ReadBuffer::new(bytes);
        assert_eq!(decode_frame(&Int32Codec, &mut read).unwrap(), Value::Int32(-123456));
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(roundtrip(&Int16Codec, Value::Int16(-2)), Value::Int16(-2));
        assert_eq!(
            roundtrip(&Int64Codec, Value::Int64(i64::MAX)),
            Value::Int64(i64::MAX),
        );
        assert_eq!(
            roundtrip(&Float64Codec, Value::Float64(1.5)),
            Value::Float64(1.5),
        );
        assert_eq!(roundtrip(&BoolCodec, Value::Bool(true)), Value::Bool(true));
        assert_eq!(
            roundtrip(&StrCodec, Value::Str("héllo".into())),
            Value::Str("héllo".into()),
        );
        assert_eq!(
            roundtrip(&BytesCodec, Value::Bytes(Bytes::from_static(b"\x00\x01"))),
            Value::Bytes(Bytes::from_static(b"\x00\x01")),
        );
        let id = uuid::Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        assert_eq!(roundtrip(&UuidCodec, Value::Uuid(id)), Value::Uuid(id));
        assert_eq!(
            roundtrip(&JsonCodec, Value::Json("{\"a\":1}".into())),
            Value::Json("{\"a\":1}".into()),
        );
        assert_eq!(
            roundtrip(&DurationCodec, Value::Duration { micros: -5 }),
            Value::Duration { micros: -5 },
        );
        let big = Value::BigInt(BigInt { negative: true, weight: 1, digits: vec![1, 2345] });
        assert_eq!(roundtrip(&BigIntCodec, big.clone()), big);
        let dec = Value::Decimal(Decimal {
            negative: false,
            weight: 0,
            scale: 2,
            digits: vec![3, 1400],
        });
        assert_eq!(roundtrip(&DecimalCodec, dec.clone()), dec);
    }

    #[test]
    fn duration_rejects_calendar_components() {
        let mut bytes = 7i64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        let mut read = ReadBuffer::new(bytes.into());
        assert!(DurationCodec.decode(&mut read).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut buf = WriteBuffer::new();
        assert!(Int32Codec.encode(&mut buf, &Value::Str("4".into())).is_err());
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn known_ids_resolve() {
        assert!(known_codec(&STD_INT32).is_some());
        assert!(known_codec(&STD_BIGINT).is_some());
        assert!(known_codec(&NULL_ID).is_some());
        assert!(known_codec(&uuid::Uuid::from_u128(42)).is_none());
    }
}
