//! Argument codec: typed values to and from type-tagged transport strings.
//!
//! Every argument travels as a JSON text whose shape is fixed by its static
//! [`ArgType`]. Both directions match exhaustively on the type, so a value is
//! either encoded exactly or rejected; nothing is coerced.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use dynjob_core::CodecError;

use crate::cancellation::CancellationToken;

/// Static type of a job method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    DateTime,
    Uuid,
    Json,
    List(Box<ArgType>),
    Optional(Box<ArgType>),
    /// Slot filled with the executing job's cancellation token.
    Cancellation,
    /// Host type without a transport encoding.
    Opaque(String),
}

impl ArgType {
    pub fn list(inner: ArgType) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn optional(inner: ArgType) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Self::Opaque(name.into())
    }

    /// Canonical name stored in descriptor signatures.
    pub fn name(&self) -> String {
        match self {
            ArgType::Bool => "bool".to_string(),
            ArgType::Int => "i64".to_string(),
            ArgType::Float => "f64".to_string(),
            ArgType::String => "string".to_string(),
            ArgType::Bytes => "bytes".to_string(),
            ArgType::DateTime => "datetime".to_string(),
            ArgType::Uuid => "uuid".to_string(),
            ArgType::Json => "json".to_string(),
            ArgType::List(inner) => format!("list<{}>", inner.name()),
            ArgType::Optional(inner) => format!("option<{}>", inner.name()),
            ArgType::Cancellation => "cancellation".to_string(),
            ArgType::Opaque(name) => format!("opaque<{name}>"),
        }
    }

    /// Parse a canonical name back into a type.
    pub fn parse(name: &str) -> Result<Self, CodecError> {
        let name = name.trim();
        let ty = match name {
            "bool" => ArgType::Bool,
            "i64" => ArgType::Int,
            "f64" => ArgType::Float,
            "string" => ArgType::String,
            "bytes" => ArgType::Bytes,
            "datetime" => ArgType::DateTime,
            "uuid" => ArgType::Uuid,
            "json" => ArgType::Json,
            "cancellation" => ArgType::Cancellation,
            _ => {
                if let Some(inner) = generic_arg(name, "list") {
                    ArgType::list(ArgType::parse(inner)?)
                } else if let Some(inner) = generic_arg(name, "option") {
                    ArgType::optional(ArgType::parse(inner)?)
                } else if let Some(inner) = generic_arg(name, "opaque") {
                    ArgType::opaque(inner)
                } else {
                    return Err(CodecError::unsupported(name));
                }
            }
        };
        Ok(ty)
    }

    /// Reject types that have no unambiguous encoding.
    ///
    /// `option<option<T>>` and `option<json>` cannot tell `None` from an inner
    /// null; cancellation slots are only meaningful as top-level parameters.
    pub fn ensure_supported(&self) -> Result<(), CodecError> {
        self.check(false)
    }

    fn check(&self, nested: bool) -> Result<(), CodecError> {
        match self {
            ArgType::Opaque(_) => Err(CodecError::unsupported(self.name())),
            ArgType::Cancellation if nested => Err(CodecError::unsupported(self.name())),
            ArgType::Optional(inner) => match inner.as_ref() {
                ArgType::Optional(_) | ArgType::Json => Err(CodecError::unsupported(self.name())),
                other => other.check(true),
            },
            ArgType::List(inner) => inner.check(true),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Display for ArgType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name())
    }
}

fn generic_arg<'a>(name: &'a str, head: &str) -> Option<&'a str> {
    name.strip_prefix(head)?
        .strip_prefix('<')?
        .strip_suffix('>')
}

/// A concrete argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    Json(JsonValue),
    List(Vec<ArgValue>),
    Optional(Option<Box<ArgValue>>),
    /// Unbound cancellation slot, as captured at the call site and after decoding.
    Cancellation,
    /// Cancellation slot bound to the executing job's token.
    Token(CancellationToken),
}

impl ArgValue {
    fn kind(&self) -> &'static str {
        match self {
            ArgValue::Bool(_) => "bool",
            ArgValue::Int(_) => "i64",
            ArgValue::Float(_) => "f64",
            ArgValue::String(_) => "string",
            ArgValue::Bytes(_) => "bytes",
            ArgValue::DateTime(_) => "datetime",
            ArgValue::Uuid(_) => "uuid",
            ArgValue::Json(_) => "json",
            ArgValue::List(_) => "list",
            ArgValue::Optional(_) => "option",
            ArgValue::Cancellation | ArgValue::Token(_) => "cancellation",
        }
    }
}

/// Encode `value` as the transport text for `ty`.
pub fn encode(value: &ArgValue, ty: &ArgType) -> Result<String, CodecError> {
    ty.ensure_supported()?;
    let json = to_json(value, ty)?;
    serde_json::to_string(&json).map_err(|e| CodecError::malformed(e.to_string()))
}

/// Decode transport text produced by [`encode`] for the same `ty`.
pub fn decode(encoded: &str, ty: &ArgType) -> Result<ArgValue, CodecError> {
    ty.ensure_supported()?;
    let json: JsonValue =
        serde_json::from_str(encoded).map_err(|e| CodecError::malformed(e.to_string()))?;
    from_json(json, ty)
}

fn to_json(value: &ArgValue, ty: &ArgType) -> Result<JsonValue, CodecError> {
    let json = match (ty, value) {
        (ArgType::Bool, ArgValue::Bool(b)) => JsonValue::Bool(*b),
        (ArgType::Int, ArgValue::Int(i)) => JsonValue::from(*i),
        (ArgType::Float, ArgValue::Float(f)) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or(CodecError::NonFinite)?,
        (ArgType::String, ArgValue::String(s)) => JsonValue::String(s.clone()),
        (ArgType::Bytes, ArgValue::Bytes(bytes)) => {
            JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect())
        }
        (ArgType::DateTime, ArgValue::DateTime(at)) => {
            JsonValue::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        (ArgType::Uuid, ArgValue::Uuid(id)) => JsonValue::String(id.to_string()),
        (ArgType::Json, ArgValue::Json(v)) => v.clone(),
        (ArgType::List(inner), ArgValue::List(items)) => JsonValue::Array(
            items
                .iter()
                .map(|item| to_json(item, inner))
                .collect::<Result<_, _>>()?,
        ),
        (ArgType::Optional(_), ArgValue::Optional(None)) => JsonValue::Null,
        (ArgType::Optional(inner), ArgValue::Optional(Some(v))) => to_json(v, inner)?,
        (ArgType::Cancellation, ArgValue::Cancellation | ArgValue::Token(_)) => JsonValue::Null,
        (ArgType::Opaque(_), _) => return Err(CodecError::unsupported(ty.name())),
        (ty, value) => return Err(CodecError::mismatch(ty.name(), value.kind())),
    };
    Ok(json)
}

fn from_json(json: JsonValue, ty: &ArgType) -> Result<ArgValue, CodecError> {
    let mismatch = |json: &JsonValue| CodecError::mismatch(ty.name(), json_kind(json));

    let value = match ty {
        ArgType::Bool => ArgValue::Bool(json.as_bool().ok_or_else(|| mismatch(&json))?),
        ArgType::Int => ArgValue::Int(json.as_i64().ok_or_else(|| mismatch(&json))?),
        ArgType::Float => ArgValue::Float(json.as_f64().ok_or_else(|| mismatch(&json))?),
        ArgType::String => match json {
            JsonValue::String(s) => ArgValue::String(s),
            other => return Err(mismatch(&other)),
        },
        ArgType::Bytes => {
            let items = json.as_array().ok_or_else(|| mismatch(&json))?;
            let bytes = items
                .iter()
                .map(|b| {
                    b.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| CodecError::malformed(format!("invalid byte: {b}")))
                })
                .collect::<Result<Vec<u8>, _>>()?;
            ArgValue::Bytes(bytes)
        }
        ArgType::DateTime => {
            let text = json.as_str().ok_or_else(|| mismatch(&json))?;
            let at = DateTime::parse_from_rfc3339(text)
                .map_err(|e| CodecError::malformed(format!("datetime: {e}")))?;
            ArgValue::DateTime(at.with_timezone(&Utc))
        }
        ArgType::Uuid => {
            let text = json.as_str().ok_or_else(|| mismatch(&json))?;
            let id = Uuid::parse_str(text)
                .map_err(|e| CodecError::malformed(format!("uuid: {e}")))?;
            ArgValue::Uuid(id)
        }
        ArgType::Json => ArgValue::Json(json),
        ArgType::List(inner) => match json {
            JsonValue::Array(items) => ArgValue::List(
                items
                    .into_iter()
                    .map(|item| from_json(item, inner))
                    .collect::<Result<_, _>>()?,
            ),
            other => return Err(mismatch(&other)),
        },
        ArgType::Optional(inner) => match json {
            JsonValue::Null => ArgValue::Optional(None),
            other => ArgValue::Optional(Some(Box::new(from_json(other, inner)?))),
        },
        ArgType::Cancellation => match json {
            JsonValue::Null => ArgValue::Cancellation,
            other => return Err(mismatch(&other)),
        },
        ArgType::Opaque(_) => return Err(CodecError::unsupported(ty.name())),
    };
    Ok(value)
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Raw byte payload argument (`bytes`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytes(pub Vec<u8>);

/// A Rust type usable as a job argument at the call site.
pub trait JobArg {
    /// Static parameter type recorded in the descriptor.
    fn arg_type() -> ArgType;

    fn into_arg(self) -> ArgValue;
}

/// A Rust type a handler can read back out of decoded arguments.
pub trait FromArg: Sized {
    fn from_arg(value: ArgValue) -> Result<Self, CodecError>;
}

macro_rules! impl_scalar_arg {
    ($t:ty, $variant:ident, $ty:expr) => {
        impl JobArg for $t {
            fn arg_type() -> ArgType {
                $ty
            }

            fn into_arg(self) -> ArgValue {
                ArgValue::$variant(self)
            }
        }

        impl FromArg for $t {
            fn from_arg(value: ArgValue) -> Result<Self, CodecError> {
                match value {
                    ArgValue::$variant(v) => Ok(v),
                    other => Err(CodecError::mismatch($ty.name(), other.kind())),
                }
            }
        }
    };
}

impl_scalar_arg!(bool, Bool, ArgType::Bool);
impl_scalar_arg!(i64, Int, ArgType::Int);
impl_scalar_arg!(f64, Float, ArgType::Float);
impl_scalar_arg!(String, String, ArgType::String);
impl_scalar_arg!(DateTime<Utc>, DateTime, ArgType::DateTime);
impl_scalar_arg!(Uuid, Uuid, ArgType::Uuid);
impl_scalar_arg!(JsonValue, Json, ArgType::Json);

impl JobArg for i32 {
    fn arg_type() -> ArgType {
        ArgType::Int
    }

    fn into_arg(self) -> ArgValue {
        ArgValue::Int(i64::from(self))
    }
}

impl FromArg for i32 {
    fn from_arg(value: ArgValue) -> Result<Self, CodecError> {
        let wide = i64::from_arg(value)?;
        i32::try_from(wide).map_err(|_| CodecError::malformed(format!("{wide} out of range for i32")))
    }
}

impl JobArg for &str {
    fn arg_type() -> ArgType {
        ArgType::String
    }

    fn into_arg(self) -> ArgValue {
        ArgValue::String(self.to_string())
    }
}

impl JobArg for Bytes {
    fn arg_type() -> ArgType {
        ArgType::Bytes
    }

    fn into_arg(self) -> ArgValue {
        ArgValue::Bytes(self.0)
    }
}

impl FromArg for Bytes {
    fn from_arg(value: ArgValue) -> Result<Self, CodecError> {
        match value {
            ArgValue::Bytes(b) => Ok(Bytes(b)),
            other => Err(CodecError::mismatch("bytes", other.kind())),
        }
    }
}

impl JobArg for CancellationToken {
    fn arg_type() -> ArgType {
        ArgType::Cancellation
    }

    fn into_arg(self) -> ArgValue {
        ArgValue::Token(self)
    }
}

impl FromArg for CancellationToken {
    fn from_arg(value: ArgValue) -> Result<Self, CodecError> {
        match value {
            ArgValue::Token(token) => Ok(token),
            ArgValue::Cancellation => Err(CodecError::malformed(
                "cancellation slot is not bound to a token",
            )),
            other => Err(CodecError::mismatch("cancellation", other.kind())),
        }
    }
}

impl<T: JobArg> JobArg for Vec<T> {
    fn arg_type() -> ArgType {
        ArgType::list(T::arg_type())
    }

    fn into_arg(self) -> ArgValue {
        ArgValue::List(self.into_iter().map(JobArg::into_arg).collect())
    }
}

impl<T: FromArg> FromArg for Vec<T> {
    fn from_arg(value: ArgValue) -> Result<Self, CodecError> {
        match value {
            ArgValue::List(items) => items.into_iter().map(T::from_arg).collect(),
            other => Err(CodecError::mismatch("list", other.kind())),
        }
    }
}

impl<T: JobArg> JobArg for Option<T> {
    fn arg_type() -> ArgType {
        ArgType::optional(T::arg_type())
    }

    fn into_arg(self) -> ArgValue {
        ArgValue::Optional(self.map(|v| Box::new(v.into_arg())))
    }
}

impl<T: FromArg> FromArg for Option<T> {
    fn from_arg(value: ArgValue) -> Result<Self, CodecError> {
        match value {
            ArgValue::Optional(None) => Ok(None),
            ArgValue::Optional(Some(inner)) => T::from_arg(*inner).map(Some),
            other => Err(CodecError::mismatch("option", other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round_trip(value: ArgValue, ty: ArgType) -> ArgValue {
        let encoded = encode(&value, &ty).unwrap();
        decode(&encoded, &ty).unwrap()
    }

    #[test]
    fn type_names_parse_back() {
        let types = [
            ArgType::Bool,
            ArgType::Int,
            ArgType::Float,
            ArgType::String,
            ArgType::Bytes,
            ArgType::DateTime,
            ArgType::Uuid,
            ArgType::Json,
            ArgType::Cancellation,
            ArgType::list(ArgType::optional(ArgType::Uuid)),
            ArgType::opaque("DbConnection"),
        ];

        for ty in types {
            assert_eq!(ArgType::parse(&ty.name()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_type_name_is_unsupported() {
        assert!(matches!(
            ArgType::parse("HttpContext"),
            Err(CodecError::UnsupportedType(_))
        ));
    }

    #[test]
    fn strings_encode_as_json_text() {
        let encoded = encode(&"a@b.com".into_arg(), &ArgType::String).unwrap();
        assert_eq!(encoded, "\"a@b.com\"");
    }

    #[test]
    fn datetime_keeps_subsecond_precision() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(
            round_trip(ArgValue::DateTime(at), ArgType::DateTime),
            ArgValue::DateTime(at)
        );
    }

    #[test]
    fn nested_containers_round_trip() {
        let value = vec![Some(1_i64), None, Some(-7)].into_arg();
        let ty = <Vec<Option<i64>>>::arg_type();
        assert_eq!(round_trip(value.clone(), ty), value);
    }

    #[test]
    fn bytes_round_trip() {
        let value = Bytes(vec![0, 127, 255]).into_arg();
        assert_eq!(round_trip(value.clone(), ArgType::Bytes), value);
    }

    #[test]
    fn opaque_types_are_rejected() {
        let err = encode(&ArgValue::Int(1), &ArgType::opaque("Socket")).unwrap_err();
        assert_eq!(err, CodecError::UnsupportedType("opaque<Socket>".to_string()));
    }

    #[test]
    fn ambiguous_optionals_are_rejected() {
        let ty = ArgType::optional(ArgType::optional(ArgType::Int));
        assert!(matches!(
            encode(&ArgValue::Optional(None), &ty),
            Err(CodecError::UnsupportedType(_))
        ));
        assert!(ArgType::optional(ArgType::Json).ensure_supported().is_err());
        assert!(ArgType::list(ArgType::Cancellation).ensure_supported().is_err());
    }

    #[test]
    fn value_type_mismatch_is_not_coerced() {
        let err = encode(&ArgValue::String("3".into()), &ArgType::Int).unwrap_err();
        assert_eq!(err, CodecError::mismatch("i64", "string"));

        let err = decode("3.5", &ArgType::Int).unwrap_err();
        assert_eq!(err, CodecError::mismatch("i64", "number"));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        assert_eq!(
            encode(&ArgValue::Float(f64::NAN), &ArgType::Float),
            Err(CodecError::NonFinite)
        );
    }

    #[test]
    fn malformed_text_is_reported() {
        assert!(matches!(
            decode("{not json", &ArgType::Json),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode("\"not-a-uuid\"", &ArgType::Uuid),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn cancellation_slot_encodes_as_null() {
        assert_eq!(encode(&ArgValue::Cancellation, &ArgType::Cancellation).unwrap(), "null");
        assert_eq!(decode("null", &ArgType::Cancellation).unwrap(), ArgValue::Cancellation);
    }

    #[test]
    fn narrow_integers_check_range() {
        assert_eq!(i32::from_arg(ArgValue::Int(3)).unwrap(), 3);
        assert!(i32::from_arg(ArgValue::Int(i64::MAX)).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::collection::{btree_map, vec};
        use proptest::prelude::*;

        fn json_value() -> impl Strategy<Value = JsonValue> {
            let leaf = prop_oneof![
                Just(JsonValue::Null),
                any::<bool>().prop_map(JsonValue::Bool),
                any::<i64>().prop_map(JsonValue::from),
                any::<f64>().prop_filter_map("finite", |f| {
                    serde_json::Number::from_f64(f).map(JsonValue::Number)
                }),
                ".*".prop_map(JsonValue::String),
            ];
            leaf.prop_recursive(3, 32, 6, |inner| {
                prop_oneof![
                    vec(inner.clone(), 0..6).prop_map(JsonValue::Array),
                    btree_map(".*", inner, 0..6)
                        .prop_map(|fields| JsonValue::Object(fields.into_iter().collect())),
                ]
            })
        }

        /// Instants from 0001-01-01 to 9999-12-31 with nanosecond precision.
        fn datetime() -> impl Strategy<Value = DateTime<Utc>> {
            (-62_135_596_800_i64..=253_402_300_799_i64, 0_u32..1_000_000_000)
                .prop_filter_map("representable", |(secs, nanos)| {
                    DateTime::from_timestamp(secs, nanos)
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: any string survives encode/decode unchanged.
            #[test]
            fn strings_round_trip(s in ".*") {
                let value = ArgValue::String(s);
                prop_assert_eq!(round_trip(value.clone(), ArgType::String), value);
            }

            /// Property: integers survive across the full i64 range.
            #[test]
            fn ints_round_trip(i in any::<i64>()) {
                prop_assert_eq!(round_trip(ArgValue::Int(i), ArgType::Int), ArgValue::Int(i));
            }

            /// Property: finite floats survive bit-for-bit.
            #[test]
            fn finite_floats_round_trip(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
                match round_trip(ArgValue::Float(f), ArgType::Float) {
                    ArgValue::Float(back) => prop_assert_eq!(back, f),
                    other => prop_assert!(false, "unexpected value {:?}", other),
                }
            }

            /// Property: both booleans survive.
            #[test]
            fn bools_round_trip(b in any::<bool>()) {
                prop_assert_eq!(round_trip(ArgValue::Bool(b), ArgType::Bool), ArgValue::Bool(b));
            }

            /// Property: any 128-bit uuid survives.
            #[test]
            fn uuids_round_trip(bits in any::<u128>()) {
                let value = ArgValue::Uuid(Uuid::from_u128(bits));
                prop_assert_eq!(round_trip(value.clone(), ArgType::Uuid), value);
            }

            /// Property: instants survive to the nanosecond.
            #[test]
            fn datetimes_round_trip(at in datetime()) {
                let value = ArgValue::DateTime(at);
                prop_assert_eq!(round_trip(value.clone(), ArgType::DateTime), value);
            }

            /// Property: every byte value survives, including empty payloads.
            #[test]
            fn any_bytes_round_trip(bytes in vec(any::<u8>(), 0..64)) {
                let value = Bytes(bytes.clone()).into_arg();
                prop_assert_eq!(round_trip(value, ArgType::Bytes), ArgValue::Bytes(bytes));
            }

            /// Property: arbitrary JSON documents survive structurally.
            #[test]
            fn json_round_trips(doc in json_value()) {
                let value = ArgValue::Json(doc);
                prop_assert_eq!(round_trip(value.clone(), ArgType::Json), value);
            }

            /// Property: optional lists of strings survive, including empty and absent.
            #[test]
            fn optional_lists_round_trip(items in proptest::option::of(proptest::collection::vec("[a-z@.]{0,12}", 0..5))) {
                let value = items.into_arg();
                let ty = <Option<Vec<String>>>::arg_type();
                prop_assert_eq!(round_trip(value.clone(), ty), value);
            }
        }
    }
}
