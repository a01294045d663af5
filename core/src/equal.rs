//! Deep structural equality (spec §2 component 3, §4.3).
//!
//! Operates on the already-materialized [`Value`] tree, so the cycle
//! concerns §4.3 describes for a live pointer graph do not arise here (a
//! `Value` tree is finite by construction, see `reflect.rs`'s cycle guard at
//! the `to_value()` boundary instead); this module still honours
//! `ignore`/`ignorePath` filtering and custom per-type equality hooks.

use crate::path::PathBuf;
use crate::reflect::{StructValue, Value};
use crate::registry::lookup_schema;

#[derive(Clone, Default)]
pub struct EqualOptions {
    /// Path prefixes to skip entirely, matching `Differ`'s `ignorePath`
    /// option (§4.4).
    pub ignore_paths: Vec<PathBuf>,
}

impl EqualOptions {
    fn is_ignored(&self, path: &PathBuf) -> bool {
        self.ignore_paths.iter().any(|p| p.is_prefix_of(path))
    }
}

/// Returns `true` iff `a` and `b` are equal on every subtree not excluded by
/// `ignore`/`ignorePath` (§3 invariants, §4.3).
pub fn deep_equal(a: &Value, b: &Value, opts: &EqualOptions) -> bool {
    equal_at(a, b, &PathBuf::root(), opts)
}

fn equal_at(a: &Value, b: &Value, path: &PathBuf, opts: &EqualOptions) -> bool {
    if opts.is_ignored(path) {
        return true;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::I64(x), Value::I64(y)) => x == y,
        (Value::U64(x), Value::U64(y)) => x == y,
        // Floats compared bit-for-bit, per §4.3 "floats by bit-equal comparison".
        (Value::F64(x), Value::F64(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => x.as_bytes() == y.as_bytes(),
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Option(None), Value::Option(None)) => true,
        (Value::Option(Some(x)), Value::Option(Some(y))) => equal_at(x, y, path, opts),
        (Value::Option(_), Value::Option(_)) => false,
        (Value::Array(x), Value::Array(y)) | (Value::Slice(x), Value::Slice(y)) => {
            x.len() == y.len()
                && x.iter().zip(y).enumerate().all(|(i, (xi, yi))| {
                    equal_at(xi, yi, &path.child(crate::path::Segment::Index(i)), opts)
                })
        }
        (Value::Map(x), Value::Map(y)) => map_equal(x, y, path, opts),
        (Value::Struct(x), Value::Struct(y)) => struct_equal(x, y, path, opts),
        (Value::Custom(x), Value::Custom(y)) => x == y,
        _ => false,
    }
}

fn struct_equal(x: &StructValue, y: &StructValue, path: &PathBuf, opts: &EqualOptions) -> bool {
    if x.type_name != y.type_name {
        return false;
    }
    let schema = lookup_schema(x.type_name);
    for (idx, xv) in &x.fields {
        if let Some(schema) = schema {
            if schema.fields.get(*idx).map(|f| f.flags.ignore).unwrap_or(false) {
                continue;
            }
        }
        let Some(yv) = y.field(*idx) else { return false };
        let field_path = match schema.and_then(|s| s.fields.get(*idx)) {
            Some(f) => path.child(crate::path::Segment::Key(f.wire_name.to_string())),
            None => path.child(crate::path::Segment::Key(idx.to_string())),
        };
        if !equal_at(xv, yv, &field_path, opts) {
            return false;
        }
    }
    true
}

fn map_equal(
    x: &crate::reflect::MapValue,
    y: &crate::reflect::MapValue,
    path: &PathBuf,
    opts: &EqualOptions,
) -> bool {
    if x.entries.len() != y.entries.len() {
        return false;
    }
    for (k, xv) in &x.entries {
        let canon = k.canonical_key();
        let Some(yv) = y.get(&canon) else { return false };
        let key_path = path.child(crate::path::Segment::Key(format!("{:?}", canon)));
        if !equal_at(xv, yv, &key_path, opts) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::Reflect;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::I64),
            ".*".prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(Value::Slice)
        })
    }

    proptest! {
        // §3 "equal is reflexive": every value equals itself.
        #[test]
        fn equal_is_reflexive(v in arb_value()) {
            prop_assert!(deep_equal(&v, &v, &EqualOptions::default()));
        }
    }

    #[test]
    fn primitives() {
        let opts = EqualOptions::default();
        assert!(deep_equal(&1i64.to_value(), &1i64.to_value(), &opts));
        assert!(!deep_equal(&1i64.to_value(), &2i64.to_value(), &opts));
    }

    #[test]
    fn nan_is_bit_equal_to_itself() {
        let opts = EqualOptions::default();
        let nan = Value::F64(f64::NAN);
        assert!(deep_equal(&nan, &nan, &opts));
    }

    #[test]
    fn slices_compare_elementwise() {
        let opts = EqualOptions::default();
        let a = Value::Slice(vec![Value::I64(1), Value::I64(2)]);
        let b = Value::Slice(vec![Value::I64(1), Value::I64(2)]);
        let c = Value::Slice(vec![Value::I64(1), Value::I64(3)]);
        assert!(deep_equal(&a, &b, &opts));
        assert!(!deep_equal(&a, &c, &opts));
    }

    #[test]
    fn ignore_path_skips_subtree() {
        let a = Value::Slice(vec![Value::I64(1)]);
        let b = Value::Slice(vec![Value::I64(2)]);
        let opts = EqualOptions {
            ignore_paths: vec![crate::path::PathBuf::parse("/0").unwrap()],
        };
        assert!(deep_equal(&a, &b, &opts));
    }
}
