//! Deep copy (spec §2 component 3, §4.3). Rust's ownership model already
//! gives every `Value` tree structural `Clone`; this module exists for the
//! behavior `Clone` alone doesn't provide: `ignore`-field/`ignorePath`
//! stripping, and dispatch to a type's custom copy hook before falling back
//! to plain structural cloning (satisfied by `Value::Custom`'s `clone_box`,
//! since a custom type's `CustomData` impl *is* its custom copy hook).

use crate::path::PathBuf;
use crate::reflect::{StructValue, Value};
use crate::registry::lookup_schema;

#[derive(Clone, Default)]
pub struct CopyOptions {
    pub ignore_paths: Vec<PathBuf>,
}

impl CopyOptions {
    fn is_ignored(&self, path: &PathBuf) -> bool {
        self.ignore_paths.iter().any(|p| p.is_prefix_of(path))
    }
}

/// Produces a structural copy of `value`, omitting `ignore`-flagged fields
/// and anything under an `ignorePath` prefix (§4.3).
pub fn deep_copy(value: &Value, opts: &CopyOptions) -> Value {
    copy_at(value, &PathBuf::root(), opts)
}

fn copy_at(value: &Value, path: &PathBuf, opts: &CopyOptions) -> Value {
    if opts.is_ignored(path) {
        return Value::Null;
    }
    match value {
        Value::Option(Some(inner)) => Value::Option(Some(Box::new(copy_at(inner, path, opts)))),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| copy_at(v, &path.child(crate::path::Segment::Index(i)), opts))
                .collect(),
        ),
        Value::Slice(items) => Value::Slice(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| copy_at(v, &path.child(crate::path::Segment::Index(i)), opts))
                .collect(),
        ),
        Value::Map(m) => Value::Map(crate::reflect::MapValue {
            entries: m
                .entries
                .iter()
                .map(|(k, v)| {
                    let key_path = path.child(crate::path::Segment::Key(format!("{:?}", k.canonical_key())));
                    (k.clone(), copy_at(v, &key_path, opts))
                })
                .collect(),
        }),
        Value::Struct(s) => Value::Struct(copy_struct(s, path, opts)),
        // Leaves, including Custom (whose own clone_box is its copy hook).
        other => other.clone(),
    }
}

fn copy_struct(s: &StructValue, path: &PathBuf, opts: &CopyOptions) -> StructValue {
    let schema = lookup_schema(s.type_name);
    let fields = s
        .fields
        .iter()
        .filter(|(idx, _)| {
            !schema
                .and_then(|s| s.fields.get(*idx))
                .map(|f| f.flags.ignore)
                .unwrap_or(false)
        })
        .map(|(idx, v)| {
            let field_path = match schema.and_then(|s| s.fields.get(*idx)) {
                Some(f) => path.child(crate::path::Segment::Key(f.wire_name.to_string())),
                None => path.child(crate::path::Segment::Key(idx.to_string())),
            };
            (*idx, copy_at(v, &field_path, opts))
        })
        .collect();
    StructValue {
        type_name: s.type_name,
        fields,
    }
}
