//! The structural differ (spec §2 component 1, §4.4): walks two `Value`
//! trees of matching shape and produces the smallest [`Patch`] that turns
//! the first into the second, honoring `ignore`/`ignorePath`, the `atomic`
//! and `readonly` field flags, custom per-type diff hooks, and keyed-slice
//! alignment. A changed `readonly` field is still observed (wrapped in
//! `NodeKind::ReadOnly`) so callers can see what changed; enforcement that
//! apply is a no-op lives in `patch.rs`.
//!
//! Grounded on teacher's `crdt.rs` merge-dispatch-by-shape style for the
//! recursive-descent-over-a-sum-type structure, and on `myers.rs` (this
//! crate) for the slice algorithm's core alignment step.

use crate::condition::Condition;
use crate::equal::{deep_equal, EqualOptions};
use crate::myers::{self, Edit};
use crate::patch::{MapPatch, NodeKind, Patch, SliceOp};
use crate::reflect::{CanonicalKey, StructValue, Value};
use crate::registry::{custom_hook, lookup_schema};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Default)]
pub struct DiffOptions {
    pub ignore_paths: Vec<crate::path::PathBuf>,
    /// Enables structural-hash move detection on non-keyed slices (§4.4
    /// step 5). Keyed-slice alignment (via a schema `key` field) always
    /// runs regardless of this flag.
    pub detect_moves: bool,
}

impl DiffOptions {
    fn is_ignored(&self, path: &crate::path::PathBuf) -> bool {
        self.ignore_paths.iter().any(|p| p.is_prefix_of(path))
    }

    fn equal_opts(&self) -> EqualOptions {
        EqualOptions {
            ignore_paths: self.ignore_paths.clone(),
        }
    }
}

/// Computes the patch turning `old` into `new`, or `None` if they're equal
/// under `opts` (§4.4 entry point).
pub fn diff(old: &Value, new: &Value, opts: &DiffOptions) -> Option<Patch> {
    diff_at(old, new, &crate::path::PathBuf::root(), opts)
}

fn diff_at(old: &Value, new: &Value, path: &crate::path::PathBuf, opts: &DiffOptions) -> Option<Patch> {
    if opts.is_ignored(path) {
        return None;
    }
    if deep_equal(old, new, &opts.equal_opts()) {
        return None;
    }

    if let (Value::Custom(a), Value::Custom(b)) = (old, new) {
        if a.0.kind() == b.0.kind() {
            if let Some(hooks) = custom_hook(a.0.kind()) {
                if (hooks.diff)(a.0.as_ref(), b.0.as_ref()) {
                    return None;
                }
            }
            return Some(Patch::new(NodeKind::Custom {
                kind: b.0.kind(),
                payload: new.clone(),
            }));
        }
    }

    match (old, new) {
        (Value::Option(a), Value::Option(b)) => diff_option(a.as_deref(), b.as_deref(), path, opts),
        (Value::Struct(a), Value::Struct(b)) if a.type_name == b.type_name => {
            Some(diff_struct(a, b, path, opts))
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => diff_array(a, b, path, opts),
        (Value::Slice(a), Value::Slice(b)) => Some(diff_slice(a, b, opts)),
        (Value::Map(a), Value::Map(b)) => Some(diff_map(a, b, path, opts)),
        _ => Some(Patch::new(NodeKind::Value {
            old: Some(old.clone()),
            new: Some(new.clone()),
        })),
    }
}

fn diff_option(a: Option<&Value>, b: Option<&Value>, path: &crate::path::PathBuf, opts: &DiffOptions) -> Option<Patch> {
    match (a, b) {
        (None, None) => None,
        (Some(av), Some(bv)) => diff_at(av, bv, path, opts).map(|inner| Patch::new(NodeKind::Ptr(Box::new(inner)))),
        _ => Some(Patch::new(NodeKind::Value {
            old: a.cloned(),
            new: b.cloned(),
        })),
    }
}

fn field_path(path: &crate::path::PathBuf, type_name: &'static str, idx: usize) -> crate::path::PathBuf {
    let seg = match lookup_schema(type_name).and_then(|s| s.fields.get(idx)) {
        Some(f) => crate::path::Segment::Key(f.wire_name.to_string()),
        None => crate::path::Segment::Key(idx.to_string()),
    };
    path.child(seg)
}

fn diff_struct(a: &StructValue, b: &StructValue, path: &crate::path::PathBuf, opts: &DiffOptions) -> Patch {
    let schema = lookup_schema(a.type_name);
    let mut fields = Vec::new();
    for (idx, av) in &a.fields {
        let Some(bv) = b.field(*idx) else { continue };
        let field_flags = schema.and_then(|s| s.fields.get(*idx)).map(|f| f.flags);
        let ignore = field_flags.map(|f| f.ignore).unwrap_or(false);
        let atomic = field_flags.map(|f| f.atomic).unwrap_or(false);
        let readonly = field_flags.map(|f| f.readonly).unwrap_or(false);
        let fpath = field_path(path, a.type_name, *idx);
        if ignore || opts.is_ignored(&fpath) {
            continue;
        }
        if atomic {
            if !deep_equal(av, bv, &opts.equal_opts()) {
                fields.push((
                    *idx,
                    Patch::new(NodeKind::Value {
                        old: Some(av.clone()),
                        new: Some(bv.clone()),
                    }),
                ));
            }
            continue;
        }
        if readonly {
            // Still observed so callers can see what changed, but wrapped so
            // `apply`/`apply_checked`/`apply_resolved` treat it as a no-op
            // (patch.rs's `NodeKind::ReadOnly(_) => Ok(())` arm).
            if let Some(inner) = diff_at(av, bv, &fpath, opts) {
                fields.push((*idx, Patch::new(NodeKind::ReadOnly(Box::new(inner)))));
            }
            continue;
        }
        if let Some(inner) = diff_at(av, bv, &fpath, opts) {
            fields.push((*idx, inner));
        }
    }
    Patch::new(NodeKind::Struct {
        type_name: a.type_name,
        fields,
    })
}

fn diff_array(a: &[Value], b: &[Value], path: &crate::path::PathBuf, opts: &DiffOptions) -> Option<Patch> {
    let mut items = Vec::new();
    for (i, (av, bv)) in a.iter().zip(b).enumerate() {
        let ipath = path.child(crate::path::Segment::Index(i));
        if let Some(inner) = diff_at(av, bv, &ipath, opts) {
            items.push((i, inner));
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(Patch::new(NodeKind::Array(items)))
    }
}

fn key_of(item: &Value) -> Option<CanonicalKey> {
    if let Value::Struct(s) = item {
        let schema = lookup_schema(s.type_name)?;
        let key_idx = schema.key_field()?;
        return s.field(key_idx).map(Value::canonical_key);
    }
    None
}

/// Aligns `old`/`new` slices with Myers (§4.4 step 1), then resolves
/// leftover delete/insert pairs into `Update`/`Move` ops either by a schema
/// `key` field (keyed-slice alignment, always on) or by full structural
/// equality when `opts.detect_moves` is set (§4.4 step 5).
fn diff_slice(old: &[Value], new: &[Value], opts: &DiffOptions) -> Patch {
    let script = myers::diff(old, new, |a, b| deep_equal(a, b, &opts.equal_opts()));

    let delete_idxs: Vec<usize> = script
        .iter()
        .filter_map(|e| if let Edit::Delete(i) = e { Some(*i) } else { None })
        .collect();
    let insert_idxs: Vec<usize> = script
        .iter()
        .filter_map(|e| if let Edit::Insert(i) = e { Some(*i) } else { None })
        .collect();

    let (matched, consumed) = build_matches(old, new, &delete_idxs, &insert_idxs, opts);

    let mut ops = Vec::with_capacity(script.len());
    for edit in &script {
        match edit {
            Edit::Keep(oi, _) => ops.push(SliceOp::Keep(*oi)),
            Edit::Delete(oi) => {
                if !consumed.contains(oi) {
                    ops.push(SliceOp::Delete(*oi, old[*oi].clone()));
                }
            }
            Edit::Insert(ni) => {
                if let Some((oi, patch)) = matched.get(ni) {
                    match patch {
                        Some(p) => ops.push(SliceOp::Update(*oi, Box::new(p.clone()))),
                        None => ops.push(SliceOp::Move(*oi)),
                    }
                } else {
                    ops.push(SliceOp::Insert(new[*ni].clone()));
                }
            }
        }
    }
    Patch::new(NodeKind::Slice(ops))
}

fn build_matches(
    old: &[Value],
    new: &[Value],
    delete_idxs: &[usize],
    insert_idxs: &[usize],
    opts: &DiffOptions,
) -> (HashMap<usize, (usize, Option<Patch>)>, HashSet<usize>) {
    let mut matched: HashMap<usize, (usize, Option<Patch>)> = HashMap::new();
    let mut consumed: HashSet<usize> = HashSet::new();

    let mut by_key: HashMap<CanonicalKey, Vec<usize>> = HashMap::new();
    for &oi in delete_idxs {
        if let Some(k) = key_of(&old[oi]) {
            by_key.entry(k).or_default().push(oi);
        }
    }
    let mut remaining_inserts = Vec::new();
    for &ni in insert_idxs {
        if let Some(k) = key_of(&new[ni]) {
            if let Some(bucket) = by_key.get_mut(&k) {
                if let Some(oi) = bucket.pop() {
                    consumed.insert(oi);
                    let patch = diff_at(&old[oi], &new[ni], &crate::path::PathBuf::root(), opts);
                    matched.insert(ni, (oi, patch));
                    continue;
                }
            }
        }
        remaining_inserts.push(ni);
    }

    if opts.detect_moves {
        let mut by_hash: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
        for &oi in delete_idxs {
            if !consumed.contains(&oi) {
                by_hash.entry(old[oi].structural_bytes()).or_default().push(oi);
            }
        }
        for ni in remaining_inserts {
            let hash = new[ni].structural_bytes();
            if let Some(bucket) = by_hash.get_mut(&hash) {
                if let Some(oi) = bucket.pop() {
                    consumed.insert(oi);
                    matched.insert(ni, (oi, None));
                }
            }
        }
    }

    (matched, consumed)
}

/// Map diff (§4.4 step 6): entries present only in `old` are removed, only
/// in `new` are added, present in both but unequal are recursively diffed
/// and addressed by canonical key (§3 "Map patch details").
fn diff_map(
    old: &crate::reflect::MapValue,
    new: &crate::reflect::MapValue,
    path: &crate::path::PathBuf,
    opts: &DiffOptions,
) -> Patch {
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut original_keys = Vec::new();

    let mut new_by_canon: HashMap<CanonicalKey, (&Value, &Value)> = HashMap::new();
    for (k, v) in &new.entries {
        new_by_canon.insert(k.canonical_key(), (k, v));
    }

    for (ok, ov) in &old.entries {
        let canon = ok.canonical_key();
        match new_by_canon.remove(&canon) {
            None => removed.push((ok.clone(), ov.clone())),
            Some((_, nv)) => {
                let key_path = path.child(crate::path::Segment::Key(key_segment_string(ok)));
                if let Some(inner) = diff_at(ov, nv, &key_path, opts) {
                    original_keys.push((canon.clone(), ok.clone()));
                    modified.push((canon, inner));
                }
            }
        }
    }

    let mut added: Vec<(Value, Value)> = new_by_canon.into_values().map(|(k, v)| (k.clone(), v.clone())).collect();
    added.sort_by_key(|(k, _)| k.canonical_key());

    Patch::new(NodeKind::Map(MapPatch {
        added,
        removed,
        modified,
        original_keys,
    }))
}

fn key_segment_string(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        other => format!("{:?}", other.canonical_key()),
    }
}

/// Wraps a plain [`Patch`] with an `if`/`unless` gate built from a parsed
/// condition expression (§4.6), for callers that want to attach conditions
/// without going through the [`crate::builder::Builder`] cursor.
pub fn guarded(patch: Patch, if_expr: Option<&str>, unless_expr: Option<&str>) -> crate::error::Result<Patch> {
    let if_cond: Option<Condition> = if_expr.map(crate::condition::parse).transpose()?;
    let unless_cond: Option<Condition> = unless_expr.map(crate::condition::parse).transpose()?;
    Ok(patch.with_conditions(crate::patch::Conditions {
        local: None,
        if_cond,
        unless: unless_cond,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldFlags, FieldSchema, TypeSchema};
    use proptest::prelude::*;

    proptest! {
        // §4.4 "diff is the smallest patch turning old into new": applying
        // the diff to `old` always reconstructs `new`, for arbitrary scalar
        // leaves (the structural recursion cases are covered by the keyed-
        // slice and map unit tests above).
        #[test]
        fn diff_then_apply_reconstructs_new(old in any::<i64>(), new in any::<i64>()) {
            let a = Value::I64(old);
            let b = Value::I64(new);
            let mut root = a.clone();
            if let Some(patch) = diff(&a, &b, &DiffOptions::default()) {
                crate::patch::apply(&patch, &mut root).unwrap();
            }
            prop_assert_eq!(root, b);
        }

        // §4.4 "equal values produce no patch", generalized beyond the
        // single literal case already covered by `equal_values_produce_no_patch`.
        #[test]
        fn equal_i64_never_diffs(n in any::<i64>()) {
            prop_assert!(diff(&Value::I64(n), &Value::I64(n), &DiffOptions::default()).is_none());
        }
    }

    #[test]
    fn primitive_replace() {
        let p = diff(&Value::I64(1), &Value::I64(2), &DiffOptions::default()).unwrap();
        assert!(matches!(
            p.kind,
            NodeKind::Value {
                old: Some(Value::I64(1)),
                new: Some(Value::I64(2))
            }
        ));
    }

    #[test]
    fn equal_values_produce_no_patch() {
        assert!(diff(&Value::I64(1), &Value::I64(1), &DiffOptions::default()).is_none());
    }

    #[test]
    fn slice_append_is_a_single_insert() {
        let a = Value::Slice(vec![Value::I64(1), Value::I64(2)]);
        let b = Value::Slice(vec![Value::I64(1), Value::I64(2), Value::I64(3)]);
        let p = diff(&a, &b, &DiffOptions::default()).unwrap();
        match p.kind {
            NodeKind::Slice(ops) => {
                assert_eq!(ops.len(), 3);
                assert!(matches!(ops[2], SliceOp::Insert(Value::I64(3))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn readonly_field_change_is_wrapped_and_ignored_field_is_skipped() {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema {
                name: "id",
                wire_name: "id",
                flags: FieldFlags::default(),
            },
            FieldSchema {
                name: "etag",
                wire_name: "etag",
                flags: FieldFlags {
                    ignore: false,
                    readonly: true,
                    atomic: false,
                    key: false,
                },
            },
            FieldSchema {
                name: "scratch",
                wire_name: "scratch",
                flags: FieldFlags {
                    ignore: true,
                    readonly: false,
                    atomic: false,
                    key: false,
                },
            },
        ];
        static SCHEMA: TypeSchema = TypeSchema {
            type_name: "differ::tests::Doc",
            fields: FIELDS,
        };
        crate::registry::register_schema(&SCHEMA);

        let doc = |id: i64, etag: i64, scratch: i64| {
            Value::Struct(StructValue {
                type_name: "differ::tests::Doc",
                fields: vec![(0, Value::I64(id)), (1, Value::I64(etag)), (2, Value::I64(scratch))],
            })
        };
        let a = doc(1, 10, 100);
        let b = doc(1, 11, 200);
        let p = diff(&a, &b, &DiffOptions::default()).unwrap();
        match p.kind {
            NodeKind::Struct { fields, .. } => {
                assert_eq!(fields.len(), 1, "the ignored field must not appear at all");
                let (idx, inner) = &fields[0];
                assert_eq!(*idx, 1, "only the readonly field changed");
                assert!(matches!(inner.kind, NodeKind::ReadOnly(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn keyed_slice_reorder_becomes_moves() {
        static FIELDS: &[FieldSchema] = &[
            FieldSchema {
                name: "id",
                wire_name: "id",
                flags: FieldFlags {
                    ignore: false,
                    readonly: false,
                    atomic: false,
                    key: true,
                },
            },
            FieldSchema {
                name: "v",
                wire_name: "v",
                flags: FieldFlags::default(),
            },
        ];
        static SCHEMA: TypeSchema = TypeSchema {
            type_name: "differ::tests::Item",
            fields: FIELDS,
        };
        crate::registry::register_schema(&SCHEMA);

        let item = |id: i64, v: i64| {
            Value::Struct(StructValue {
                type_name: "differ::tests::Item",
                fields: vec![(0, Value::I64(id)), (1, Value::I64(v))],
            })
        };
        let a = Value::Slice(vec![item(1, 10), item(2, 20)]);
        let b = Value::Slice(vec![item(2, 20), item(1, 10)]);
        let p = diff(&a, &b, &DiffOptions::default()).unwrap();
        match p.kind {
            NodeKind::Slice(ops) => {
                assert!(ops.iter().any(|op| matches!(op, SliceOp::Move(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
