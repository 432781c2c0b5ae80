use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

/// A dynamically typed value produced or consumed by a [`Codec`][super::Codec].
///
/// Temporal values carry the wire representation (microsecond and day
/// counts against the 2000-01-01 epoch) rather than mapping into an
/// external date-time library. `Int64` is carried natively.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value, decoded from an empty payload.
    Nothing,
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Str(String),
    Bytes(Bytes),
    Uuid(Uuid),
    /// JSON document, carried as its text.
    Json(String),
    /// Microseconds since 2000-01-01T00:00 UTC.
    Datetime { micros: i64 },
    /// Wall-clock date and time, microseconds since 2000-01-01T00:00.
    LocalDatetime { micros: i64 },
    /// Days since 2000-01-01.
    LocalDate { days: i32 },
    /// Microseconds since midnight.
    LocalTime { micros: i64 },
    /// A span of time in microseconds. The wire format also carries day
    /// and month components which must be zero.
    Duration { micros: i64 },
    BigInt(BigInt),
    Decimal(Decimal),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    NamedTuple { names: Arc<[String]>, values: Vec<Value> },
    Object { shape: Arc<ObjectShape>, values: Vec<Value> },
    Enum(String),
}

impl Value {
    /// Name of the variant, for error reporting.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Json(_) => "json",
            Self::Datetime { .. } => "datetime",
            Self::LocalDatetime { .. } => "local_datetime",
            Self::LocalDate { .. } => "local_date",
            Self::LocalTime { .. } => "local_time",
            Self::Duration { .. } => "duration",
            Self::BigInt(_) => "bigint",
            Self::Decimal(_) => "decimal",
            Self::Array(_) => "array",
            Self::Set(_) => "set",
            Self::Tuple(_) => "tuple",
            Self::NamedTuple { .. } => "named tuple",
            Self::Object { .. } => "object",
            Self::Enum(_) => "enum",
        }
    }
}

/// Arbitrary precision integer in its wire form: base-10000 digits,
/// most significant first, `weight` giving the exponent of the first
/// digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInt {
    pub negative: bool,
    pub weight: i16,
    pub digits: Vec<u16>,
}

/// Arbitrary precision decimal, a [`BigInt`] with a decimal scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub negative: bool,
    pub weight: i16,
    pub scale: u16,
    pub digits: Vec<u16>,
}

/// Field layout of a decoded object, shared by every row of a result.
#[derive(Debug, PartialEq, Eq)]
pub struct ObjectShape {
    pub fields: Vec<ShapeField>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ShapeField {
    pub name: String,
    pub flags: u8,
}
