//! Wire formats (spec §6): the canonical `{"k": kind, "d": data}` envelope
//! used for transmission between replicas, plus a lossy projection onto
//! RFC 6902 JSON Patch for interop with tooling that only understands the
//! standard format.
//!
//! Grounded on teacher's `wire.rs`-style terse-tagged serde_json envelopes,
//! and on the RFC 6902 shape from `other_examples`'
//! `a5fce4c7_idubrov-json-patch` and `cb30387c_zs-dima-tonic-rest`.

use crate::patch::{MapPatch, NodeKind, Patch, SliceOp};
use crate::path::{PathBuf, Segment};
use crate::reflect::{CanonicalKey, CustomData, CustomValue, MapValue, StructValue, Value};
use serde_json::json;
use std::any::Any;
use std::fmt;

fn leak_str(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

/// Placeholder [`CustomData`] for a custom leaf decoded off the wire without
/// a registered factory for its kind: carries the kind tag and raw bytes so
/// the value survives a read-don't-interpret round trip, but cannot be
/// merged or diffed meaningfully (§6 "decode without a schema").
#[derive(Clone, Debug, PartialEq)]
pub struct RawCustom {
    pub kind: String,
    pub bytes: Vec<u8>,
}

impl fmt::Display for RawCustom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raw custom `{}` ({} bytes)", self.kind, self.bytes.len())
    }
}

impl CustomData for RawCustom {
    fn kind(&self) -> &'static str {
        "raw"
    }
    fn clone_box(&self) -> Box<dyn CustomData> {
        Box::new(self.clone())
    }
    fn eq_box(&self, other: &dyn CustomData) -> bool {
        other.as_any().downcast_ref::<RawCustom>().map(|o| o == self).unwrap_or(false)
    }
    fn structural_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => json!({"k": "null"}),
        Value::Bool(b) => json!({"k": "bool", "d": b}),
        Value::I64(i) => json!({"k": "i64", "d": i}),
        Value::U64(u) => json!({"k": "u64", "d": u}),
        Value::F64(f) => json!({"k": "f64", "d": f}),
        Value::Str(s) => json!({"k": "str", "d": s}),
        Value::Bytes(b) => json!({"k": "bytes", "d": b}),
        Value::Option(o) => json!({"k": "option", "d": o.as_deref().map(value_to_json)}),
        Value::Array(items) => json!({"k": "array", "d": items.iter().map(value_to_json).collect::<Vec<_>>()}),
        Value::Slice(items) => json!({"k": "slice", "d": items.iter().map(value_to_json).collect::<Vec<_>>()}),
        Value::Map(m) => json!({
            "k": "map",
            "d": m.entries.iter().map(|(k, v)| json!({"k": value_to_json(k), "v": value_to_json(v)})).collect::<Vec<_>>(),
        }),
        Value::Struct(s) => json!({
            "k": "struct",
            "d": {
                "type": s.type_name,
                "fields": s.fields.iter().map(|(i, v)| json!({"i": i, "v": value_to_json(v)})).collect::<Vec<_>>(),
            },
        }),
        Value::Custom(c) => json!({
            "k": "custom",
            "d": {"kind": c.0.kind(), "bytes": c.0.structural_bytes()},
        }),
    }
}

pub fn json_to_value(j: &serde_json::Value) -> Value {
    let kind = j.get("k").and_then(|v| v.as_str()).unwrap_or("null");
    let data = j.get("d");
    match kind {
        "bool" => Value::Bool(data.and_then(|d| d.as_bool()).unwrap_or(false)),
        "i64" => Value::I64(data.and_then(|d| d.as_i64()).unwrap_or(0)),
        "u64" => Value::U64(data.and_then(|d| d.as_u64()).unwrap_or(0)),
        "f64" => Value::F64(data.and_then(|d| d.as_f64()).unwrap_or(0.0)),
        "str" => Value::Str(data.and_then(|d| d.as_str()).unwrap_or("").to_string()),
        "bytes" => Value::Bytes(
            data.and_then(|d| d.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u8)).collect())
                .unwrap_or_default(),
        ),
        "option" => Value::Option(match data {
            Some(serde_json::Value::Null) | None => None,
            Some(inner) => Some(Box::new(json_to_value(inner))),
        }),
        "array" => Value::Array(
            data.and_then(|d| d.as_array())
                .map(|arr| arr.iter().map(json_to_value).collect())
                .unwrap_or_default(),
        ),
        "slice" => Value::Slice(
            data.and_then(|d| d.as_array())
                .map(|arr| arr.iter().map(json_to_value).collect())
                .unwrap_or_default(),
        ),
        "map" => Value::Map(MapValue {
            entries: data
                .and_then(|d| d.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|e| Some((json_to_value(e.get("k")?), json_to_value(e.get("v")?))))
                        .collect()
                })
                .unwrap_or_default(),
        }),
        "struct" => {
            let type_name = data.and_then(|d| d.get("type")).and_then(|t| t.as_str()).unwrap_or("").to_string();
            let fields = data
                .and_then(|d| d.get("fields"))
                .and_then(|f| f.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|e| {
                            let i = e.get("i")?.as_u64()? as usize;
                            Some((i, json_to_value(e.get("v")?)))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Value::Struct(StructValue {
                type_name: leak_str(type_name),
                fields,
            })
        }
        "custom" => {
            let kind = data.and_then(|d| d.get("kind")).and_then(|k| k.as_str()).unwrap_or("").to_string();
            let bytes = data
                .and_then(|d| d.get("bytes"))
                .and_then(|b| b.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u8)).collect())
                .unwrap_or_default();
            Value::Custom(CustomValue(Box::new(RawCustom { kind, bytes })))
        }
        _ => Value::Null,
    }
}

fn canonical_key_to_json(k: &CanonicalKey) -> serde_json::Value {
    match k {
        CanonicalKey::Bool(b) => json!({"k": "bool", "d": b}),
        CanonicalKey::I64(i) => json!({"k": "i64", "d": i}),
        CanonicalKey::U64(u) => json!({"k": "u64", "d": u}),
        CanonicalKey::Str(s) => json!({"k": "str", "d": s}),
        CanonicalKey::Bytes(b) => json!({"k": "bytes", "d": b}),
    }
}

/// Serializes a patch tree into the canonical `{k, d}` envelope (§6).
pub fn patch_to_json(patch: &Patch) -> serde_json::Value {
    let mut obj = match &patch.kind {
        NodeKind::Value { old, new } => json!({
            "k": "value",
            "d": {"old": old.as_ref().map(value_to_json), "new": new.as_ref().map(value_to_json)},
        }),
        NodeKind::Test { expected } => json!({"k": "test", "d": value_to_json(expected)}),
        NodeKind::Copy { from, old } => json!({"k": "copy", "d": {"from": from.to_string(), "old": value_to_json(old)}}),
        NodeKind::Move { from, old } => json!({"k": "move", "d": {"from": from.to_string(), "old": value_to_json(old)}}),
        NodeKind::Log { message } => json!({"k": "log", "d": message}),
        NodeKind::Ptr(inner) => json!({"k": "ptr", "d": patch_to_json(inner)}),
        NodeKind::Interface(inner) => json!({"k": "interface", "d": patch_to_json(inner)}),
        NodeKind::ReadOnly(inner) => json!({"k": "readOnly", "d": patch_to_json(inner)}),
        NodeKind::Struct { type_name, fields } => json!({
            "k": "struct",
            "d": {
                "type": type_name,
                "fields": fields.iter().map(|(i, p)| json!({"i": i, "p": patch_to_json(p)})).collect::<Vec<_>>(),
            },
        }),
        NodeKind::Array(items) => json!({
            "k": "array",
            "d": items.iter().map(|(i, p)| json!({"i": i, "p": patch_to_json(p)})).collect::<Vec<_>>(),
        }),
        NodeKind::Map(m) => json!({"k": "map", "d": map_patch_to_json(m)}),
        NodeKind::Slice(ops) => json!({"k": "slice", "d": ops.iter().map(slice_op_to_json).collect::<Vec<_>>()}),
        NodeKind::Custom { kind, payload } => json!({"k": "custom", "d": {"kind": kind, "payload": value_to_json(payload)}}),
    };
    if patch.cond.if_cond.is_some() || patch.cond.unless.is_some() || patch.cond.local.is_some() {
        obj["c"] = json!(true);
    }
    obj
}

fn map_patch_to_json(m: &MapPatch) -> serde_json::Value {
    json!({
        "a": m.added.iter().map(|(k, v)| json!({"k": value_to_json(k), "v": value_to_json(v)})).collect::<Vec<_>>(),
        "r": m.removed.iter().map(|(k, v)| json!({"k": value_to_json(k), "v": value_to_json(v)})).collect::<Vec<_>>(),
        "m": m.modified.iter().map(|(k, p)| json!({"k": canonical_key_to_json(k), "p": patch_to_json(p)})).collect::<Vec<_>>(),
        "o": m.original_keys.iter().map(|(k, v)| json!({"k": canonical_key_to_json(k), "v": value_to_json(v)})).collect::<Vec<_>>(),
    })
}

fn slice_op_to_json(op: &SliceOp) -> serde_json::Value {
    match op {
        SliceOp::Keep(i) => json!({"op": "keep", "i": i}),
        SliceOp::Insert(v) => json!({"op": "insert", "v": value_to_json(v)}),
        SliceOp::Delete(i, v) => json!({"op": "delete", "i": i, "v": value_to_json(v)}),
        SliceOp::Update(i, p) => json!({"op": "update", "i": i, "p": patch_to_json(p)}),
        SliceOp::Move(i) => json!({"op": "move", "i": i}),
        SliceOp::Copy(i) => json!({"op": "copy", "i": i}),
    }
}

/// Lossy projection onto RFC 6902 (§6, §15): `log`, `readOnly`, and
/// `custom` nodes have no standard-JSON-Patch equivalent and are dropped;
/// everything else maps onto `add`/`remove`/`replace`/`test`/`move`/`copy`.
pub fn to_json_patch(patch: &Patch) -> Vec<serde_json::Value> {
    let mut ops = Vec::new();
    collect_json_patch_ops(patch, &PathBuf::root(), &mut ops);
    ops
}

fn collect_json_patch_ops(patch: &Patch, path: &PathBuf, ops: &mut Vec<serde_json::Value>) {
    let p = path.normalize();
    match &patch.kind {
        NodeKind::Value { old, new } => match (old, new) {
            (None, Some(v)) => ops.push(json!({"op": "add", "path": p, "value": value_to_json(v)})),
            (Some(_), None) => ops.push(json!({"op": "remove", "path": p})),
            (Some(_), Some(v)) => ops.push(json!({"op": "replace", "path": p, "value": value_to_json(v)})),
            (None, None) => {}
        },
        NodeKind::Test { expected } => ops.push(json!({"op": "test", "path": p, "value": value_to_json(expected)})),
        NodeKind::Copy { from, .. } => ops.push(json!({"op": "copy", "from": from.normalize(), "path": p})),
        NodeKind::Move { from, .. } => ops.push(json!({"op": "move", "from": from.normalize(), "path": p})),
        NodeKind::Ptr(inner) | NodeKind::Interface(inner) => collect_json_patch_ops(inner, path, ops),
        NodeKind::ReadOnly(_) | NodeKind::Log { .. } | NodeKind::Custom { .. } => {}
        NodeKind::Struct { type_name, fields } => {
            for (idx, inner) in fields {
                let seg = match crate::registry::lookup_schema(type_name).and_then(|s| s.fields.get(*idx)) {
                    Some(f) => Segment::Key(f.wire_name.to_string()),
                    None => Segment::Key(idx.to_string()),
                };
                collect_json_patch_ops(inner, &path.child(seg), ops);
            }
        }
        NodeKind::Array(items) => {
            for (idx, inner) in items {
                collect_json_patch_ops(inner, &path.child(Segment::Index(*idx)), ops);
            }
        }
        NodeKind::Map(m) => {
            for (k, v) in &m.removed {
                ops.push(json!({"op": "remove", "path": path.child(Segment::Key(map_key_string(k))).normalize()}));
            }
            for (canon, inner) in &m.modified {
                let orig = m.original_keys.iter().find(|(c, _)| c == canon).map(|(_, v)| v);
                let key = orig.map(map_key_string).unwrap_or_default();
                collect_json_patch_ops(inner, &path.child(Segment::Key(key)), ops);
            }
            for (k, v) in &m.added {
                ops.push(json!({
                    "op": "add",
                    "path": path.child(Segment::Key(map_key_string(k))).normalize(),
                    "value": value_to_json(v),
                }));
            }
        }
        NodeKind::Slice(slice_ops) => {
            for op in slice_ops {
                match op {
                    SliceOp::Keep(_) => {}
                    SliceOp::Insert(v) => ops.push(json!({
                        "op": "add",
                        "path": path.child(Segment::Append).normalize(),
                        "value": value_to_json(v),
                    })),
                    SliceOp::Delete(i, _) => ops.push(json!({
                        "op": "remove",
                        "path": path.child(Segment::Index(*i)).normalize(),
                    })),
                    SliceOp::Update(i, inner) => collect_json_patch_ops(inner, &path.child(Segment::Index(*i)), ops),
                    SliceOp::Move(i) => ops.push(json!({
                        "op": "move",
                        "from": path.child(Segment::Index(*i)).normalize(),
                        "path": path.child(Segment::Append).normalize(),
                    })),
                    SliceOp::Copy(i) => ops.push(json!({
                        "op": "copy",
                        "from": path.child(Segment::Index(*i)).normalize(),
                        "path": path.child(Segment::Append).normalize(),
                    })),
                }
            }
        }
    }
}

fn map_key_string(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        other => format!("{:?}", other.canonical_key()),
    }
}
