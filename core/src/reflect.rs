//! Type introspection surface: the `Value` surrogate tree every schema-typed
//! value is converted to/from, and the `Reflect` trait (normally implemented
//! via `#[derive(Reflect)]` from `structsync-derive`) that performs the
//! conversion without runtime reflection.
//!
//! Design Note §9 calls for "reflection → tagged variants + codegen". `Value`
//! is the tagged variant; the derive macro is the codegen. The dynamic escape
//! hatch is `Value::Custom`, used only by user-registered custom kinds (§3)
//! and by map keys/values in genuinely schemaless containers.

use crate::error::SchemaError;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The dynamic surrogate every `Reflect` type round-trips through.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Pointer/interface indirection (§4.4): `None` is a nil pointee.
    Option(Option<Box<Value>>),
    /// Fixed-length, index-keyed (an array in the schema sense).
    Array(Vec<Value>),
    /// Variable-length sequence (a slice in the schema sense).
    Slice(Vec<Value>),
    Map(MapValue),
    Struct(StructValue),
    Custom(CustomValue),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) | Value::U64(_) | Value::F64(_) => "number",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Option(_) => "option",
            Value::Array(_) => "array",
            Value::Slice(_) => "slice",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Custom(c) => c.0.kind(),
        }
    }

    /// The reduction used for map-key/move-detection identity (§3, §4.4).
    /// Complex values fall back to a structural hash, exactly as a
    /// user-supplied `canonicalKey()` would for a compound key type.
    pub fn canonical_key(&self) -> CanonicalKey {
        match self {
            Value::Null => CanonicalKey::Bytes(Vec::new()),
            Value::Bool(b) => CanonicalKey::Bool(*b),
            Value::I64(i) => CanonicalKey::I64(*i),
            Value::U64(u) => CanonicalKey::U64(*u),
            Value::F64(f) => CanonicalKey::Bytes(f.to_bits().to_be_bytes().to_vec()),
            Value::Str(s) => CanonicalKey::Str(s.clone()),
            Value::Bytes(b) => CanonicalKey::Bytes(b.clone()),
            other => CanonicalKey::Bytes(blake3::hash(&other.structural_bytes()).as_bytes().to_vec()),
        }
    }

    /// Returns true if `self` can stand in for a hash table key, i.e. it has
    /// no unordered interior (§4.4 step 5: "hashable ≡ no slice/map/func").
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::Slice(_) | Value::Map(_) | Value::Custom(_) => false,
            Value::Array(items) => items.iter().all(Value::is_hashable),
            Value::Option(Some(inner)) => inner.is_hashable(),
            Value::Struct(s) => s.fields.iter().all(|(_, v)| v.is_hashable()),
            _ => true,
        }
    }

    /// A deterministic byte encoding used for structural hashing
    /// (move/copy detection and compound canonical keys). Not a stable wire
    /// format; only required to be internally consistent.
    pub fn structural_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_structural_bytes(&mut out);
        out
    }

    fn write_structural_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(0),
            Value::Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            Value::I64(i) => {
                out.push(2);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::U64(u) => {
                out.push(3);
                out.extend_from_slice(&u.to_be_bytes());
            }
            Value::F64(f) => {
                out.push(4);
                out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Str(s) => {
                out.push(5);
                out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(6);
                out.extend_from_slice(&(b.len() as u64).to_be_bytes());
                out.extend_from_slice(b);
            }
            Value::Option(o) => {
                out.push(7);
                match o {
                    None => out.push(0),
                    Some(v) => {
                        out.push(1);
                        v.write_structural_bytes(out);
                    }
                }
            }
            Value::Array(items) | Value::Slice(items) => {
                out.push(if matches!(self, Value::Array(_)) { 8 } else { 9 });
                out.extend_from_slice(&(items.len() as u64).to_be_bytes());
                for item in items {
                    item.write_structural_bytes(out);
                }
            }
            Value::Map(m) => {
                out.push(10);
                let mut sorted: Vec<_> = m.entries.iter().collect();
                sorted.sort_by_key(|(k, _)| k.canonical_key());
                out.extend_from_slice(&(sorted.len() as u64).to_be_bytes());
                for (k, v) in sorted {
                    k.write_structural_bytes(out);
                    v.write_structural_bytes(out);
                }
            }
            Value::Struct(s) => {
                out.push(11);
                out.extend_from_slice(s.type_name.as_bytes());
                for (idx, v) in &s.fields {
                    out.extend_from_slice(&(*idx as u64).to_be_bytes());
                    v.write_structural_bytes(out);
                }
            }
            Value::Custom(c) => {
                out.push(12);
                out.extend_from_slice(c.0.kind().as_bytes());
                out.extend_from_slice(&c.0.structural_bytes());
            }
        }
    }

    pub fn into_struct(self, expected: &'static str) -> Result<StructValue, SchemaError> {
        match self {
            Value::Struct(s) if s.type_name == expected => Ok(s),
            Value::Struct(s) => Err(SchemaError::TypeMismatch {
                expected,
                found: s.type_name,
            }),
            other => Err(SchemaError::TypeMismatch {
                expected,
                found: other.kind_name(),
            }),
        }
    }
}

/// Canonical reduction of a `Value` used for identity comparisons (§3, GLOSSARY).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalKey {
    Bool(bool),
    I64(i64),
    U64(u64),
    Str(String),
    Bytes(Vec<u8>),
}

/// A map value. Bookkeeping (diff/merge/apply) addresses entries by
/// `canonical_key()`; the original key is always retained alongside so apply
/// can address the real underlying map (§3 "Map patch details").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapValue {
    pub entries: Vec<(Value, Value)>,
}

impl MapValue {
    pub fn get(&self, key: &CanonicalKey) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| &k.canonical_key() == key)
            .map(|(_, v)| v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    pub type_name: &'static str,
    /// `(schema field index, field value)`, in schema-declared order.
    pub fields: Vec<(usize, Value)>,
}

impl StructValue {
    pub fn field(&self, idx: usize) -> Option<&Value> {
        self.fields.iter().find(|(i, _)| *i == idx).map(|(_, v)| v)
    }
}

/// A user-registered custom leaf (§3 `custom{kind, payload}`).
///
/// Implemented by types that opt out of structural diff/equal/copy, e.g. the
/// RGA [`crate::text::Text`] CRDT, whose merge semantics cannot be expressed
/// as ordinary struct/slice/map recursion.
pub trait CustomData: fmt::Debug + Send + Sync {
    fn kind(&self) -> &'static str;
    fn clone_box(&self) -> Box<dyn CustomData>;
    fn eq_box(&self, other: &dyn CustomData) -> bool;
    fn structural_bytes(&self) -> Vec<u8>;
    fn as_any(&self) -> &dyn Any;
}

pub struct CustomValue(pub Box<dyn CustomData>);

impl Clone for CustomValue {
    fn clone(&self) -> Self {
        CustomValue(self.0.clone_box())
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_box(other.0.as_ref())
    }
}

/// Per-field schema attributes (§3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldFlags {
    pub ignore: bool,
    pub readonly: bool,
    pub atomic: bool,
    pub key: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldSchema {
    pub name: &'static str,
    pub wire_name: &'static str,
    pub flags: FieldFlags,
}

/// The statically generated metadata for a `Reflect` struct type.
#[derive(Debug)]
pub struct TypeSchema {
    pub type_name: &'static str,
    pub fields: &'static [FieldSchema],
}

impl TypeSchema {
    /// Index of the single field tagged `key`, used for keyed-slice
    /// alignment (§2 component 2, §4.4 "keyed-slice diffing").
    pub fn key_field(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.flags.key)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name || f.wire_name == name)
    }
}

/// Implemented by every schema-typed value, normally via
/// `#[derive(Reflect)]`. Blanket impls below cover the primitive and
/// container cases the derive macro delegates to for each field.
pub trait Reflect: Clone + 'static {
    fn type_name() -> &'static str;
    /// `None` for non-struct (primitive/container) types, which have no
    /// field metadata of their own.
    fn schema() -> Option<&'static TypeSchema> {
        None
    }
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, SchemaError>;
}

macro_rules! reflect_int {
    ($t:ty, $variant:ident, $name:literal) => {
        impl Reflect for $t {
            fn type_name() -> &'static str {
                $name
            }
            fn to_value(&self) -> Value {
                Value::$variant(*self as _)
            }
            fn from_value(value: Value) -> Result<Self, SchemaError> {
                match value {
                    Value::$variant(v) => Ok(v as $t),
                    Value::I64(v) => Ok(v as $t),
                    Value::U64(v) => Ok(v as $t),
                    other => Err(SchemaError::TypeMismatch {
                        expected: $name,
                        found: other.kind_name(),
                    }),
                }
            }
        }
    };
}

reflect_int!(i8, I64, "i8");
reflect_int!(i16, I64, "i16");
reflect_int!(i32, I64, "i32");
reflect_int!(i64, I64, "i64");
reflect_int!(isize, I64, "isize");
reflect_int!(u8, U64, "u8");
reflect_int!(u16, U64, "u16");
reflect_int!(u32, U64, "u32");
reflect_int!(u64, U64, "u64");
reflect_int!(usize, U64, "usize");

impl Reflect for bool {
    fn type_name() -> &'static str {
        "bool"
    }
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(SchemaError::TypeMismatch {
                expected: "bool",
                found: other.kind_name(),
            }),
        }
    }
}

macro_rules! reflect_float {
    ($t:ty, $name:literal) => {
        impl Reflect for $t {
            fn type_name() -> &'static str {
                $name
            }
            fn to_value(&self) -> Value {
                Value::F64(*self as f64)
            }
            fn from_value(value: Value) -> Result<Self, SchemaError> {
                match value {
                    Value::F64(f) => Ok(f as $t),
                    other => Err(SchemaError::TypeMismatch {
                        expected: $name,
                        found: other.kind_name(),
                    }),
                }
            }
        }
    };
}

reflect_float!(f32, "f32");
reflect_float!(f64, "f64");

impl Reflect for String {
    fn type_name() -> &'static str {
        "string"
    }
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(SchemaError::TypeMismatch {
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }
}

impl<T: Reflect> Reflect for Option<T> {
    fn type_name() -> &'static str {
        "option"
    }
    fn to_value(&self) -> Value {
        Value::Option(self.as_ref().map(|v| Box::new(v.to_value())))
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Option(Some(v)) => Ok(Some(T::from_value(*v)?)),
            Value::Option(None) => Ok(None),
            Value::Null => Ok(None),
            other => Ok(Some(T::from_value(other)?)),
        }
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn type_name() -> &'static str {
        "slice"
    }
    fn to_value(&self) -> Value {
        Value::Slice(self.iter().map(Reflect::to_value).collect())
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Slice(items) | Value::Array(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => Err(SchemaError::TypeMismatch {
                expected: "slice",
                found: other.kind_name(),
            }),
        }
    }
}

impl<T: Reflect> Reflect for Box<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }
    fn to_value(&self) -> Value {
        with_cycle_guard(self.as_ref() as *const T as usize, TypeId::of::<T>(), || {
            self.as_ref().to_value()
        })
        .unwrap_or(Value::Null)
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        Ok(Box::new(T::from_value(value)?))
    }
}

impl<K, V> Reflect for HashMap<K, V>
where
    K: Reflect + Eq + std::hash::Hash,
    V: Reflect,
{
    fn type_name() -> &'static str {
        "map"
    }
    fn to_value(&self) -> Value {
        Value::Map(MapValue {
            entries: self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect(),
        })
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Map(m) => m
                .entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(SchemaError::TypeMismatch {
                expected: "map",
                found: other.kind_name(),
            }),
        }
    }
}

impl<K, V> Reflect for BTreeMap<K, V>
where
    K: Reflect + Ord,
    V: Reflect,
{
    fn type_name() -> &'static str {
        "map"
    }
    fn to_value(&self) -> Value {
        Value::Map(MapValue {
            entries: self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect(),
        })
    }
    fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Map(m) => m
                .entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(SchemaError::TypeMismatch {
                expected: "map",
                found: other.kind_name(),
            }),
        }
    }
}

thread_local! {
    static CYCLE_GUARD: RefCell<Vec<(usize, TypeId)>> = RefCell::new(Vec::new());
}

/// Detects a pointer identity already on the stack before recursing into it,
/// per Design Note §9: "use a visited set keyed by (address, address,
/// type-id)". Returns `None` (folded to a `Value::Null` leaf by the caller)
/// when a cycle is detected instead of overflowing the stack.
fn with_cycle_guard<R>(addr: usize, type_id: TypeId, f: impl FnOnce() -> R) -> Option<R> {
    let seen = CYCLE_GUARD.with(|g| g.borrow().contains(&(addr, type_id)));
    if seen {
        tracing::warn!(addr, ?type_id, "cycle detected during to_value(), truncating");
        return None;
    }
    CYCLE_GUARD.with(|g| g.borrow_mut().push((addr, type_id)));
    let r = f();
    CYCLE_GUARD.with(|g| {
        g.borrow_mut().pop();
    });
    Some(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        assert_eq!(42i64.to_value().kind_name(), "number");
        assert_eq!(i64::from_value(Value::I64(7)).unwrap(), 7);
        assert_eq!(String::from_value(Value::Str("hi".into())).unwrap(), "hi");
    }

    #[test]
    fn option_none_round_trip() {
        let v: Option<i64> = None;
        let encoded = v.to_value();
        assert_eq!(Option::<i64>::from_value(encoded).unwrap(), None);
    }

    #[test]
    fn canonical_key_floats_are_bit_equal() {
        let a = Value::F64(0.1 + 0.2);
        let b = Value::F64(0.3);
        assert_ne!(a.canonical_key(), b.canonical_key());
        assert_eq!(Value::F64(1.5).canonical_key(), Value::F64(1.5).canonical_key());
    }

    #[test]
    fn hashability_follows_interior_containers() {
        assert!(Value::I64(1).is_hashable());
        assert!(!Value::Slice(vec![]).is_hashable());
        assert!(!Value::Map(MapValue::default()).is_hashable());
    }
}
