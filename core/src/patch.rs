//! The patch tree (spec §3, §4.5, §4.7): a tagged union mirroring a
//! document's shape, each node optionally gated by a condition triple, plus
//! the three apply modes, `reverse`, and `walk`.
//!
//! Grounded in shape on teacher's `lens.rs` (`Lens` as a small closed sum type
//! walked structurally) and `acl.rs`'s accumulate-then-return-aggregate-error
//! style for `applyChecked`.

use crate::condition::Condition;
use crate::error::{ApplyErrors, PathError, PreconditionError, SyncError};
use crate::path::{PathBuf, Segment};
use crate::reflect::{CanonicalKey, StructValue, Value};
use crate::registry::lookup_schema;

/// The `(localCond, ifCond, unlessCond)` triple every node may carry (§4.6).
/// `local` gates the node's own effect; `if_cond`/`unless` gate whether the
/// *entire subtree* rooted here is applied at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conditions {
    pub local: Option<Condition>,
    pub if_cond: Option<Condition>,
    pub unless: Option<Condition>,
}

impl Conditions {
    fn gate_passes(&self, root: &Value) -> bool {
        self.if_cond.as_ref().map(|c| c.eval(root)).unwrap_or(true)
            && self.unless.as_ref().map(|c| !c.eval(root)).unwrap_or(true)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub kind: NodeKind,
    pub cond: Conditions,
}

impl Patch {
    pub fn new(kind: NodeKind) -> Self {
        Patch {
            kind,
            cond: Conditions::default(),
        }
    }

    pub fn with_conditions(mut self, cond: Conditions) -> Self {
        self.cond = cond;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Value { old: Option<Value>, new: Option<Value> },
    Test { expected: Value },
    Copy { from: PathBuf, old: Value },
    Move { from: PathBuf, old: Value },
    Log { message: String },
    Ptr(Box<Patch>),
    Interface(Box<Patch>),
    Struct { type_name: &'static str, fields: Vec<(usize, Patch)> },
    Array(Vec<(usize, Patch)>),
    Map(MapPatch),
    Slice(Vec<SliceOp>),
    ReadOnly(Box<Patch>),
    Custom { kind: &'static str, payload: Value },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapPatch {
    pub added: Vec<(Value, Value)>,
    pub removed: Vec<(Value, Value)>,
    pub modified: Vec<(CanonicalKey, Patch)>,
    /// canonical key -> original key, kept so apply can address the real map
    /// even though `modified` is keyed canonically (§3 "Map patch details").
    pub original_keys: Vec<(CanonicalKey, Value)>,
}

impl MapPatch {
    fn original_key(&self, canon: &CanonicalKey) -> Option<&Value> {
        self.original_keys.iter().find(|(k, _)| k == canon).map(|(_, v)| v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SliceOp {
    Keep(usize),
    Insert(Value),
    Delete(usize, Value),
    Update(usize, Box<Patch>),
    Move(usize),
    Copy(usize),
}

fn field_segment(type_name: &'static str, idx: usize) -> Segment {
    match lookup_schema(type_name).and_then(|s| s.fields.get(idx)) {
        Some(f) => Segment::Key(f.wire_name.to_string()),
        None => Segment::Key(idx.to_string()),
    }
}

// ---------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Trusted application: structural effects only, no precondition or
    /// condition evaluation (§4.5 `apply`).
    Plain,
    /// Evaluates `test`/precondition nodes, collecting every violation
    /// instead of stopping at the first (§4.5 `applyChecked`).
    Checked,
    /// Evaluates `if`/`unless` gates and routes `value` conflicts through a
    /// [`Resolver`] (§4.5 `applyResolved`, §5 CRDT merge).
    Resolved,
}

/// Consulted by `applyResolved` (and by the CRDT layer, which applies this
/// way exclusively) whenever a `value` node's local condition is absent or a
/// merge needs a tie-break beyond "last writer wins by HLC" (§5).
pub trait Resolver {
    fn resolve(&mut self, path: &PathBuf, current: Option<&Value>, proposed: &Value) -> Value;
}

/// A resolver that always accepts the incoming value, used when
/// `applyResolved` is called outside the CRDT layer (plain conflict-free
/// application with conditions honored).
pub struct AcceptIncoming;

impl Resolver for AcceptIncoming {
    fn resolve(&mut self, _path: &PathBuf, _current: Option<&Value>, proposed: &Value) -> Value {
        proposed.clone()
    }
}

pub fn apply(patch: &Patch, root: &mut Value) -> Result<(), SyncError> {
    apply_node(patch, root, &PathBuf::root(), ApplyMode::Plain, &mut ApplyErrors::default(), &mut AcceptIncoming, None)
}

pub fn apply_checked(patch: &Patch, root: &mut Value) -> Result<(), SyncError> {
    let mut errors = ApplyErrors::default();
    apply_node(patch, root, &PathBuf::root(), ApplyMode::Checked, &mut errors, &mut AcceptIncoming, None)?;
    if !errors.failures().is_empty() {
        tracing::warn!(count = errors.failures().len(), "apply_checked collected precondition failures");
    }
    errors.into_result().map_err(SyncError::from)
}

pub fn apply_resolved(patch: &Patch, root: &mut Value, resolver: &mut dyn Resolver) -> Result<(), SyncError> {
    let mut errors = ApplyErrors::default();
    apply_node(patch, root, &PathBuf::root(), ApplyMode::Resolved, &mut errors, resolver, None)
}

fn apply_node(
    patch: &Patch,
    root: &mut Value,
    path: &PathBuf,
    mode: ApplyMode,
    errors: &mut ApplyErrors,
    resolver: &mut dyn Resolver,
    staged: Option<&Value>,
) -> Result<(), SyncError> {
    if mode == ApplyMode::Resolved || mode == ApplyMode::Checked {
        let snapshot = root.clone();
        if !patch.cond.gate_passes(&snapshot) {
            return Ok(());
        }
        if let Some(local) = &patch.cond.local {
            if !local.eval(&snapshot) {
                return Ok(());
            }
        }
    }

    match &patch.kind {
        NodeKind::Value { old, new } => {
            let proposed = new.clone().unwrap_or(Value::Null);
            if mode == ApplyMode::Checked {
                if let Some(expected) = old {
                    let current = crate::path::resolve(root, path).ok();
                    let matches = current.map(|v| v.structural_bytes() == expected.structural_bytes()).unwrap_or(false);
                    if !matches {
                        errors.push(PreconditionError::new(path.clone(), "old value mismatch"));
                        return Ok(());
                    }
                }
            }
            let value = if mode == ApplyMode::Resolved {
                let current = crate::path::resolve(root, path).ok().cloned();
                resolver.resolve(path, current.as_ref(), &proposed)
            } else {
                proposed
            };
            crate::path::set(root, path, value).map_err(SyncError::from)
        }
        NodeKind::Test { expected } => {
            let actual = crate::path::resolve(root, path).ok();
            let ok = actual.map(|v| v.structural_bytes() == expected.structural_bytes()).unwrap_or(false);
            if !ok {
                let err = PreconditionError::new(path.clone(), "test precondition failed");
                match mode {
                    ApplyMode::Checked => errors.push(err),
                    _ => return Err(SyncError::from(PathError::NotFound(path.clone()))),
                }
            }
            Ok(())
        }
        NodeKind::Copy { from, .. } => {
            let value = match staged {
                Some(v) => v.clone(),
                None => crate::path::resolve(root, from).map_err(SyncError::from)?.clone(),
            };
            crate::path::set(root, path, value).map_err(SyncError::from)
        }
        NodeKind::Move { from, .. } => {
            let value = match staged {
                Some(v) => v.clone(),
                None => crate::path::resolve(root, from).map_err(SyncError::from)?.clone(),
            };
            crate::path::set(root, path, value).map_err(SyncError::from)?;
            if crate::path::resolve(root, from).is_ok() && !from.is_prefix_of(path) {
                let _ = crate::path::delete(root, from);
            }
            Ok(())
        }
        NodeKind::Log { message } => {
            tracing::debug!(%path, %message, "patch log node");
            Ok(())
        }
        NodeKind::Ptr(inner) | NodeKind::Interface(inner) => {
            apply_node(inner, root, path, mode, errors, resolver, staged)
        }
        NodeKind::ReadOnly(_) => Ok(()),
        NodeKind::Struct { fields, .. } => apply_struct(patch, fields, root, path, mode, errors, resolver),
        NodeKind::Array(items) => {
            for (idx, inner) in items {
                let item_path = path.child(Segment::Index(*idx));
                apply_node(inner, root, &item_path, mode, errors, resolver, None)?;
            }
            Ok(())
        }
        NodeKind::Map(map_patch) => apply_map(map_patch, root, path, mode, errors, resolver),
        NodeKind::Slice(ops) => apply_slice(ops, root, path, mode, errors, resolver),
        NodeKind::Custom { payload, .. } => {
            let value = if mode == ApplyMode::Resolved {
                let current = crate::path::resolve(root, path).ok().cloned();
                resolver.resolve(path, current.as_ref(), payload)
            } else {
                payload.clone()
            };
            crate::path::set(root, path, value).map_err(SyncError::from)
        }
    }
}

/// Struct apply pre-reads the sources of any copy/move field whose `from`
/// falls under this struct's own path (a sibling field), so an A↔B swap
/// observes each other's pre-write value rather than a partially-applied one
/// (§4.5 "dependency-aware struct apply").
fn apply_struct(
    patch: &Patch,
    fields: &[(usize, Patch)],
    root: &mut Value,
    path: &PathBuf,
    mode: ApplyMode,
    errors: &mut ApplyErrors,
    resolver: &mut dyn Resolver,
) -> Result<(), SyncError> {
    let type_name = match &patch.kind {
        NodeKind::Struct { type_name, .. } => *type_name,
        _ => unreachable!(),
    };
    let mut staged: std::collections::HashMap<usize, Value> = std::collections::HashMap::new();
    for (idx, inner) in fields {
        let from = match &inner.kind {
            NodeKind::Copy { from, .. } | NodeKind::Move { from, .. } => Some(from),
            _ => None,
        };
        if let Some(from) = from {
            if path.is_prefix_of(from) && from != path {
                if let Ok(v) = crate::path::resolve(root, from) {
                    staged.insert(*idx, v.clone());
                }
            }
        }
    }
    let mut deferred_deletes = Vec::new();
    for (idx, inner) in fields {
        let field_path = path.child(field_segment(type_name, *idx));
        let snapshot = staged.get(idx);
        apply_node(inner, root, &field_path, mode, errors, resolver, snapshot)?;
        if let NodeKind::Move { from, .. } = &inner.kind {
            if staged.contains_key(idx) {
                deferred_deletes.push(from.clone());
            }
        }
    }
    for from in deferred_deletes {
        if crate::path::resolve(root, &from).is_ok() {
            let _ = crate::path::delete(root, &from);
        }
    }
    Ok(())
}

fn apply_map(
    map_patch: &MapPatch,
    root: &mut Value,
    path: &PathBuf,
    mode: ApplyMode,
    errors: &mut ApplyErrors,
    resolver: &mut dyn Resolver,
) -> Result<(), SyncError> {
    // removed -> modified -> added, matching §3's canonical ordering.
    for (key, _old) in &map_patch.removed {
        let key_path = path.child(Segment::Key(key_as_segment_string(key)));
        if mode == ApplyMode::Checked && crate::path::resolve(root, &key_path).is_err() {
            errors.push(PreconditionError::new(key_path, "key missing for removal"));
            continue;
        }
        let _ = crate::path::delete(root, &key_path);
    }
    for (canon, inner) in &map_patch.modified {
        let original = map_patch.original_key(canon).cloned().unwrap_or(Value::Null);
        let key_path = path.child(Segment::Key(key_as_segment_string(&original)));
        apply_node(inner, root, &key_path, mode, errors, resolver, None)?;
    }
    for (key, value) in &map_patch.added {
        let key_path = path.child(Segment::Key(key_as_segment_string(key)));
        if mode == ApplyMode::Checked && crate::path::resolve(root, &key_path).is_ok() {
            errors.push(PreconditionError::new(key_path, "key already present for insertion"));
            continue;
        }
        crate::path::set(root, &key_path, value.clone()).map_err(SyncError::from)?;
    }
    Ok(())
}

fn key_as_segment_string(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        other => format!("{:?}", other.canonical_key()),
    }
}

fn apply_slice(
    ops: &[SliceOp],
    root: &mut Value,
    path: &PathBuf,
    mode: ApplyMode,
    errors: &mut ApplyErrors,
    resolver: &mut dyn Resolver,
) -> Result<(), SyncError> {
    let old_items = match crate::path::resolve(root, path) {
        Ok(Value::Array(items)) | Ok(Value::Slice(items)) => items.clone(),
        _ => Vec::new(),
    };
    let mut new_items = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            SliceOp::Keep(i) | SliceOp::Move(i) | SliceOp::Copy(i) => {
                if let Some(v) = old_items.get(*i) {
                    new_items.push(v.clone());
                }
            }
            SliceOp::Insert(v) => new_items.push(v.clone()),
            SliceOp::Delete(_, _) => {}
            SliceOp::Update(i, inner) => {
                let mut item = old_items.get(*i).cloned().unwrap_or(Value::Null);
                let item_path = path.child(Segment::Index(*i));
                apply_node(inner, &mut item, &item_path, mode, errors, resolver, None)?;
                new_items.push(item);
            }
        }
    }
    crate::path::set(root, path, Value::Slice(new_items)).map_err(SyncError::from)
}

// ---------------------------------------------------------------------
// reverse
// ---------------------------------------------------------------------

impl Patch {
    /// Produces the inverse patch (§4.7). `reverse(reverse(p))` restores the
    /// original tree (§8 "reverse idempotence"); copy/move reverse by
    /// restoring the destination's pre-patch value rather than reinstating
    /// the paired deletion at the historical source path, since source and
    /// destination need not share a subtree (see DESIGN.md).
    pub fn reverse(&self) -> Patch {
        let kind = match &self.kind {
            NodeKind::Value { old, new } => NodeKind::Value {
                old: new.clone(),
                new: old.clone(),
            },
            NodeKind::Test { expected } => NodeKind::Test { expected: expected.clone() },
            NodeKind::Copy { old, .. } | NodeKind::Move { old, .. } => NodeKind::Value {
                old: None,
                new: Some(old.clone()),
            },
            NodeKind::Log { message } => NodeKind::Log { message: message.clone() },
            NodeKind::Ptr(inner) => NodeKind::Ptr(Box::new(inner.reverse())),
            NodeKind::Interface(inner) => NodeKind::Interface(Box::new(inner.reverse())),
            NodeKind::ReadOnly(inner) => NodeKind::ReadOnly(Box::new(inner.reverse())),
            NodeKind::Struct { type_name, fields } => NodeKind::Struct {
                type_name,
                fields: fields.iter().map(|(i, p)| (*i, p.reverse())).collect(),
            },
            NodeKind::Array(items) => NodeKind::Array(items.iter().map(|(i, p)| (*i, p.reverse())).collect()),
            NodeKind::Map(m) => NodeKind::Map(MapPatch {
                added: m.removed.clone(),
                removed: m.added.clone(),
                modified: m.modified.iter().map(|(k, p)| (k.clone(), p.reverse())).collect(),
                original_keys: m.original_keys.clone(),
            }),
            NodeKind::Slice(ops) => NodeKind::Slice(ops.iter().map(reverse_slice_op).collect()),
            NodeKind::Custom { kind, payload } => NodeKind::Custom {
                kind,
                payload: payload.clone(),
            },
        };
        Patch {
            kind,
            cond: self.cond.clone(),
        }
    }
}

fn reverse_slice_op(op: &SliceOp) -> SliceOp {
    match op {
        SliceOp::Keep(i) => SliceOp::Keep(*i),
        SliceOp::Insert(v) => SliceOp::Delete(0, v.clone()),
        SliceOp::Delete(i, v) => {
            let _ = i;
            SliceOp::Insert(v.clone())
        }
        SliceOp::Update(i, p) => SliceOp::Update(*i, Box::new(p.reverse())),
        SliceOp::Move(i) => SliceOp::Move(*i),
        SliceOp::Copy(i) => SliceOp::Copy(*i),
    }
}

// ---------------------------------------------------------------------
// walk
// ---------------------------------------------------------------------

/// Visits every node in the tree with its absolute path, depth-first,
/// parent before children (§4.7 "walk"; §8 "walk surjectivity" — every
/// effect the tree eventually applies is reachable by some call to `visit`).
pub fn walk<'a>(patch: &'a Patch, mut visit: impl FnMut(&PathBuf, &'a Patch)) {
    fn go<'a>(patch: &'a Patch, path: &PathBuf, visit: &mut dyn FnMut(&PathBuf, &'a Patch)) {
        visit(path, patch);
        match &patch.kind {
            NodeKind::Ptr(inner) | NodeKind::Interface(inner) | NodeKind::ReadOnly(inner) => {
                go(inner, path, visit)
            }
            NodeKind::Struct { type_name, fields } => {
                for (idx, inner) in fields {
                    go(inner, &path.child(field_segment(type_name, *idx)), visit)
                }
            }
            NodeKind::Array(items) => {
                for (idx, inner) in items {
                    go(inner, &path.child(Segment::Index(*idx)), visit)
                }
            }
            NodeKind::Map(m) => {
                for (canon, inner) in &m.modified {
                    let original = m.original_key(canon).cloned().unwrap_or(Value::Null);
                    go(inner, &path.child(Segment::Key(key_as_segment_string(&original))), visit)
                }
            }
            NodeKind::Slice(ops) => {
                for op in ops {
                    if let SliceOp::Update(i, inner) = op {
                        go(inner, &path.child(Segment::Index(*i)), visit)
                    }
                }
            }
            _ => {}
        }
    }
    go(patch, &PathBuf::root(), &mut visit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::Reflect;
    use proptest::prelude::*;

    #[test]
    fn value_apply_and_reverse_round_trips() {
        let mut root = 1i64.to_value();
        let p = Patch::new(NodeKind::Value {
            old: Some(Value::I64(1)),
            new: Some(Value::I64(2)),
        });
        apply(&p, &mut root).unwrap();
        assert!(matches!(root, Value::I64(2)));
        apply(&p.reverse(), &mut root).unwrap();
        assert!(matches!(root, Value::I64(1)));
    }

    #[test]
    fn checked_value_rejects_a_stale_old() {
        let mut root = Value::I64(5);
        let p = Patch::new(NodeKind::Value {
            old: Some(Value::I64(1)), // stale: root is actually 5
            new: Some(Value::I64(2)),
        });
        let err = apply_checked(&p, &mut root).unwrap_err();
        match err {
            SyncError::Apply(errs) => assert_eq!(errs.failures().len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(root, Value::I64(5), "the mismatched write must not apply");
    }

    #[test]
    fn checked_value_accepts_a_matching_old() {
        let mut root = Value::I64(1);
        let p = Patch::new(NodeKind::Value {
            old: Some(Value::I64(1)),
            new: Some(Value::I64(2)),
        });
        apply_checked(&p, &mut root).unwrap();
        assert_eq!(root, Value::I64(2));
    }

    #[test]
    fn checked_mode_honors_if_cond_gate() {
        let mut root = Value::I64(-5);
        let p = Patch::new(NodeKind::Value {
            old: None,
            new: Some(Value::I64(100)),
        })
        .with_conditions(Conditions {
            local: None,
            if_cond: Some(crate::condition::parse("/ >= 0").unwrap()),
            unless: None,
        });
        apply_checked(&p, &mut root).unwrap();
        assert_eq!(root, Value::I64(-5), "the gate should have skipped the edit under Checked too");
    }

    #[test]
    fn checked_map_rejects_delete_of_a_missing_key_and_insert_over_an_existing_one() {
        let mut root = Value::Map(crate::reflect::MapValue { entries: vec![(Value::Str("a".to_string()), Value::I64(1))] });
        let map_patch = MapPatch {
            added: vec![(Value::Str("a".to_string()), Value::I64(2))],
            removed: vec![(Value::Str("missing".to_string()), Value::Null)],
            modified: Vec::new(),
            original_keys: Vec::new(),
        };
        let p = Patch::new(NodeKind::Map(map_patch));
        let err = apply_checked(&p, &mut root).unwrap_err();
        match err {
            SyncError::Apply(errs) => assert_eq!(errs.failures().len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_node_fails_checked_but_collects_error() {
        let root_val = 1i64.to_value();
        let mut root = root_val.clone();
        let p = Patch::new(NodeKind::Test { expected: Value::I64(99) });
        let err = apply_checked(&p, &mut root).unwrap_err();
        match err {
            SyncError::Apply(errs) => assert_eq!(errs.failures().len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn slice_update_and_reverse() {
        let mut root = Value::Slice(vec![Value::I64(1), Value::I64(2)]);
        let ops = vec![
            SliceOp::Keep(0),
            SliceOp::Update(
                1,
                Box::new(Patch::new(NodeKind::Value {
                    old: Some(Value::I64(2)),
                    new: Some(Value::I64(20)),
                })),
            ),
        ];
        let p = Patch::new(NodeKind::Slice(ops));
        apply(&p, &mut root).unwrap();
        match &root {
            Value::Slice(items) => {
                assert!(matches!(items[0], Value::I64(1)));
                assert!(matches!(items[1], Value::I64(20)));
            }
            _ => panic!("expected slice"),
        }
        apply(&p.reverse(), &mut root).unwrap();
        match &root {
            Value::Slice(items) => assert!(matches!(items[1], Value::I64(2))),
            _ => panic!("expected slice"),
        }
    }

    #[test]
    fn walk_visits_nested_nodes() {
        let p = Patch::new(NodeKind::Array(vec![(
            0,
            Patch::new(NodeKind::Value {
                old: None,
                new: Some(Value::I64(1)),
            }),
        )]));
        let mut seen = Vec::new();
        walk(&p, |path, _| seen.push(path.to_string()));
        assert_eq!(seen, vec!["".to_string(), "/0".to_string()]);
    }

    proptest! {
        // §8 "reverse idempotence": reverse(reverse(p)) == p, for any leaf
        // value replacement.
        #[test]
        fn reverse_is_its_own_inverse(old in any::<i64>(), new in any::<i64>()) {
            let p = Patch::new(NodeKind::Value {
                old: Some(Value::I64(old)),
                new: Some(Value::I64(new)),
            });
            prop_assert_eq!(p.reverse().reverse(), p);
        }

        // Applying then reversing a value patch restores the original root,
        // for arbitrary i64 leaves (§8 "round-trip").
        #[test]
        fn apply_then_reverse_restores_root(old in any::<i64>(), new in any::<i64>()) {
            let mut root = Value::I64(old);
            let p = Patch::new(NodeKind::Value {
                old: Some(Value::I64(old)),
                new: Some(Value::I64(new)),
            });
            apply(&p, &mut root).unwrap();
            apply(&p.reverse(), &mut root).unwrap();
            prop_assert_eq!(root, Value::I64(old));
        }
    }
}
