//! Fluent patch-construction cursor (spec §4.8). Navigates a path against a
//! reference document (validating struct field names against the type
//! registry as it goes), stages leaf edits, and assembles them into a nested
//! [`Patch`] tree on `build()`.
//!
//! Grounded on teacher's builder-ish `acl.rs` capability-chain API for the
//! "method returns Self, errors accumulate instead of unwinding" shape.

use crate::error::{SchemaError, SyncError};
use crate::patch::{Conditions, MapPatch, NodeKind, Patch, SliceOp};
use crate::path::{PathBuf, Segment};
use crate::reflect::Value;
use crate::registry::lookup_schema;

pub struct Builder<'a> {
    root: &'a Value,
    stack: Vec<PathBuf>,
    edits: Vec<(PathBuf, NodeKind, Conditions)>,
    pending_cond: Conditions,
    error: Option<SyncError>,
}

impl<'a> Builder<'a> {
    pub fn new(root: &'a Value) -> Self {
        Builder {
            root,
            stack: vec![PathBuf::root()],
            edits: Vec::new(),
            pending_cond: Conditions::default(),
            error: None,
        }
    }

    fn current(&self) -> PathBuf {
        self.stack.last().cloned().unwrap_or_else(PathBuf::root)
    }

    fn fail(&mut self, err: impl Into<SyncError>) {
        if self.error.is_none() {
            self.error = Some(err.into());
        }
    }

    /// Descends into a named struct field, validating it against the
    /// registered schema for the type currently at the cursor.
    pub fn field(mut self, name: &str) -> Self {
        let here = self.current();
        if let Ok(Value::Struct(s)) = crate::path::resolve(self.root, &here) {
            match lookup_schema(s.type_name).and_then(|schema| schema.field_index(name)) {
                Some(_) => {}
                None => self.fail(SchemaError::UnknownField {
                    type_name: s.type_name,
                    field: name.to_string(),
                }),
            }
        }
        let next = here.child(Segment::Key(name.to_string()));
        self.stack.push(next);
        self
    }

    pub fn index(mut self, i: usize) -> Self {
        let next = self.current().child(Segment::Index(i));
        self.stack.push(next);
        self
    }

    pub fn map_key(mut self, key: impl Into<String>) -> Self {
        let next = self.current().child(Segment::Key(key.into()));
        self.stack.push(next);
        self
    }

    /// Returns to the parent of the current cursor position.
    pub fn up(mut self) -> Self {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
        self
    }

    pub fn if_cond(mut self, expr: &str) -> Self {
        match crate::condition::parse(expr) {
            Ok(c) => self.pending_cond.if_cond = Some(c),
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn unless(mut self, expr: &str) -> Self {
        match crate::condition::parse(expr) {
            Ok(c) => self.pending_cond.unless = Some(c),
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn with_condition(mut self, cond: crate::condition::Condition) -> Self {
        self.pending_cond.local = Some(cond);
        self
    }

    fn stage(&mut self, kind: NodeKind) {
        let cond = std::mem::take(&mut self.pending_cond);
        self.edits.push((self.current(), kind, cond));
    }

    pub fn set(mut self, new: Value) -> Self {
        let old = crate::path::resolve(self.root, &self.current()).ok().cloned();
        self.stage(NodeKind::Value { old, new: Some(new) });
        self
    }

    /// Appends `value` to the sequence at the cursor (§3 `-` append token).
    pub fn add(mut self, value: Value) -> Self {
        let next = self.current().child(Segment::Append);
        let cond = std::mem::take(&mut self.pending_cond);
        self.edits.push((
            next,
            NodeKind::Value {
                old: None,
                new: Some(value),
            },
            cond,
        ));
        self
    }

    pub fn delete(mut self) -> Self {
        let old = crate::path::resolve(self.root, &self.current()).ok().cloned().unwrap_or(Value::Null);
        self.stage(NodeKind::Value {
            old: Some(old),
            new: None,
        });
        self
    }

    pub fn copy_from(mut self, from: PathBuf) -> Self {
        let old = crate::path::resolve(self.root, &self.current()).ok().cloned().unwrap_or(Value::Null);
        self.stage(NodeKind::Copy { from, old });
        self
    }

    pub fn move_from(mut self, from: PathBuf) -> Self {
        let old = crate::path::resolve(self.root, &self.current()).ok().cloned().unwrap_or(Value::Null);
        self.stage(NodeKind::Move { from, old });
        self
    }

    pub fn test(mut self, expected: Value) -> Self {
        self.stage(NodeKind::Test { expected });
        self
    }

    pub fn log(mut self, message: impl Into<String>) -> Self {
        self.stage(NodeKind::Log { message: message.into() });
        self
    }

    /// Finalizes the cursor into a patch tree. A chain that ends in only a
    /// condition (`.if_cond(...)`/`.unless(...)`/`.with_condition(...)` with
    /// no `.set`/`.delete`/etc. at that position) would otherwise drop the
    /// condition silently; this allocates a no-op `Value` node to carry it
    /// (§4.8 "allocating an empty node first if necessary").
    pub fn build(mut self) -> (Option<Patch>, Option<SyncError>) {
        if self.pending_cond != Conditions::default() {
            let here = self.current();
            if !self.edits.iter().any(|(p, _, _)| *p == here) {
                let current = crate::path::resolve(self.root, &here).ok().cloned();
                self.stage(NodeKind::Value {
                    old: current.clone(),
                    new: current,
                });
            }
        }
        let patch = materialize(self.root, &PathBuf::root(), &self.edits);
        (patch, self.error)
    }
}

fn materialize(root: &Value, path: &PathBuf, leaves: &[(PathBuf, NodeKind, Conditions)]) -> Option<Patch> {
    if let Some((_, kind, cond)) = leaves.iter().find(|(p, _, _)| p == path) {
        return Some(Patch {
            kind: kind.clone(),
            cond: cond.clone(),
        });
    }

    let mut children: Vec<(Segment, PathBuf)> = Vec::new();
    for (p, _, _) in leaves {
        if path.is_prefix_of(p) && p != path {
            let seg = p.segments()[path.segments().len()].clone();
            if !children.iter().any(|(s, _)| s == &seg) {
                let child_path = path.child(seg.clone());
                children.push((seg, child_path));
            }
        }
    }
    if children.is_empty() {
        return None;
    }

    match crate::path::resolve(root, path) {
        Ok(Value::Struct(s)) => {
            let schema = lookup_schema(s.type_name);
            let mut fields = Vec::new();
            for (seg, child_path) in &children {
                let Some(name) = seg.as_key() else { continue };
                let Some(idx) = schema.and_then(|sc| sc.field_index(name)) else { continue };
                if let Some(p) = materialize(root, child_path, leaves) {
                    fields.push((idx, p));
                }
            }
            Some(Patch::new(NodeKind::Struct {
                type_name: s.type_name,
                fields,
            }))
        }
        Ok(Value::Array(_)) => {
            let mut items = Vec::new();
            for (seg, child_path) in &children {
                if let Some(idx) = seg.as_index() {
                    if let Some(p) = materialize(root, child_path, leaves) {
                        items.push((idx, p));
                    }
                }
            }
            Some(Patch::new(NodeKind::Array(items)))
        }
        Ok(Value::Slice(_)) => {
            let mut ops = Vec::new();
            for (seg, child_path) in &children {
                match seg {
                    Segment::Append => {
                        if let Some(p) = materialize(root, child_path, leaves) {
                            if let NodeKind::Value { new: Some(v), .. } = p.kind {
                                ops.push(SliceOp::Insert(v));
                            }
                        }
                    }
                    Segment::Index(i) => {
                        if let Some(p) = materialize(root, child_path, leaves) {
                            ops.push(SliceOp::Update(*i, Box::new(p)));
                        }
                    }
                    _ => {}
                }
            }
            ops.sort_by_key(|op| match op {
                SliceOp::Update(i, _) => *i,
                SliceOp::Insert(_) => usize::MAX,
                _ => usize::MAX,
            });
            Some(Patch::new(NodeKind::Slice(ops)))
        }
        Ok(Value::Map(_)) | Err(_) => {
            let mut modified = Vec::new();
            let mut original_keys = Vec::new();
            for (seg, child_path) in &children {
                let Some(key) = seg.as_key() else { continue };
                let key_value = Value::Str(key.to_string());
                let canon = key_value.canonical_key();
                if let Some(p) = materialize(root, child_path, leaves) {
                    original_keys.push((canon.clone(), key_value));
                    modified.push((canon, p));
                }
            }
            if modified.is_empty() {
                None
            } else {
                Some(Patch::new(NodeKind::Map(MapPatch {
                    added: Vec::new(),
                    removed: Vec::new(),
                    modified,
                    original_keys,
                })))
            }
        }
        Ok(Value::Option(_)) => {
            let (_, child_path) = children.into_iter().next()?;
            materialize(root, &child_path, leaves).map(|inner| Patch::new(NodeKind::Ptr(Box::new(inner))))
        }
        Ok(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldFlags, FieldSchema, Reflect, StructValue, TypeSchema};

    static FIELDS: &[FieldSchema] = &[
        FieldSchema {
            name: "name",
            wire_name: "name",
            flags: FieldFlags::default(),
        },
        FieldSchema {
            name: "age",
            wire_name: "age",
            flags: FieldFlags::default(),
        },
    ];
    static SCHEMA: TypeSchema = TypeSchema {
        type_name: "builder::tests::Person",
        fields: FIELDS,
    };

    fn person(name: &str, age: i64) -> Value {
        crate::registry::register_schema(&SCHEMA);
        Value::Struct(StructValue {
            type_name: "builder::tests::Person",
            fields: vec![(0, Value::Str(name.to_string())), (1, Value::I64(age))],
        })
    }

    #[test]
    fn builds_single_field_set() {
        let root = person("Ada", 30);
        let (patch, err) = Builder::new(&root).field("age").set(Value::I64(31)).build();
        assert!(err.is_none());
        let patch = patch.unwrap();
        match patch.kind {
            NodeKind::Struct { fields, .. } => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].0, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_field_is_an_error() {
        let root = person("Ada", 30);
        let (_, err) = Builder::new(&root).field("nonexistent").set(Value::I64(1)).build();
        assert!(err.is_some());
    }

    #[test]
    fn standalone_condition_synthesizes_a_carrier_node() {
        let root = person("Ada", 30);
        let (patch, err) = Builder::new(&root).field("age").if_cond("/age < 100").build();
        assert!(err.is_none());
        match patch.unwrap().kind {
            NodeKind::Struct { fields, .. } => {
                assert_eq!(fields.len(), 1, "the bare condition should still allocate a node");
                assert!(fields[0].1.cond.if_cond.is_some());
                assert!(matches!(fields[0].1.kind, NodeKind::Value { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn condition_attaches_to_staged_edit() {
        let root = person("Ada", 30);
        let (patch, _) = Builder::new(&root)
            .field("age")
            .if_cond("/age < 100")
            .set(Value::I64(31))
            .build();
        match patch.unwrap().kind {
            NodeKind::Struct { fields, .. } => assert!(fields[0].1.cond.if_cond.is_some()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
