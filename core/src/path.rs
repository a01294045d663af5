//! JSON-Pointer-style path model (spec §3, §4.1): parsing, escaping, and
//! resolving paths against a [`Value`] tree, including the split of a path
//! into a mutable parent binding plus final segment that `set`/`delete` need.

use crate::error::PathError;
use crate::reflect::{MapValue, Value};
use std::fmt;

/// One segment of a path: a struct field / map key, a sequence index, or the
/// special `-` append token (legal only as the final segment of an `add`
/// target, §3).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
    Append,
}

impl Segment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k.as_str()),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(&escape(k)),
            Segment::Index(i) => write!(f, "{}", i),
            Segment::Append => f.write_str("-"),
        }
    }
}

/// An owned, ordered sequence of [`Segment`]s. The empty path denotes the
/// root (§3).
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PathBuf(pub Vec<Segment>);

impl PathBuf {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, segment: Segment) -> &mut Self {
        self.0.push(segment);
        self
    }

    pub fn child(&self, segment: Segment) -> Self {
        let mut p = self.clone();
        p.push(segment);
        p
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_prefix_of(&self, other: &PathBuf) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    pub fn parent(&self) -> Option<PathBuf> {
        if self.0.is_empty() {
            None
        } else {
            Some(PathBuf(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Parses a JSON-Pointer-style string (`/a/0/b`). The empty string and
    /// `/` both denote the root (§3, §4.1 `normalize`).
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() || s == "/" {
            return Ok(Self::root());
        }
        let s = s.strip_prefix('/').unwrap_or(s);
        let mut segments = Vec::new();
        for raw in s.split('/') {
            segments.push(parse_segment(raw)?);
        }
        Ok(Self(segments))
    }

    /// Coerces `""` to `/` for display purposes (§4.1 `normalize`).
    pub fn normalize(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            self.to_string()
        }
    }
}

fn parse_segment(raw: &str) -> Result<Segment, PathError> {
    if raw == "-" {
        return Ok(Segment::Append);
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = raw.parse::<usize>() {
            return Ok(Segment::Index(i));
        }
    }
    Ok(Segment::Key(unescape(raw)?))
}

impl fmt::Display for PathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        for seg in &self.0 {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PathBuf {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromIterator<Segment> for PathBuf {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        PathBuf(iter.into_iter().collect())
    }
}

/// Escapes `~` → `~0` and `/` → `~1` (§3).
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Inverse of [`escape`].
pub fn unescape(segment: &str) -> Result<String, PathError> {
    if !segment.contains('~') {
        return Ok(segment.to_string());
    }
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(PathError::Unescape(segment.to_string())),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Resolves `path` against `root`, transparently dereferencing
/// `Value::Option` along the way (§4.1).
pub fn resolve<'a>(root: &'a Value, path: &PathBuf) -> Result<&'a Value, PathError> {
    let mut current = root;
    let mut walked = PathBuf::root();
    for seg in &path.0 {
        current = step(current, seg, &walked)?;
        walked.push(seg.clone());
    }
    Ok(current)
}

fn step<'a>(value: &'a Value, seg: &Segment, walked: &PathBuf) -> Result<&'a Value, PathError> {
    let value = deref(value)
        .ok_or_else(|| PathError::NilTraversal(walked.clone()))?;
    match (value, seg) {
        (Value::Struct(s), Segment::Key(k)) => {
            let idx = struct_field_index(s, k)
                .ok_or_else(|| PathError::NotFound(walked.child(seg.clone())))?;
            s.field(idx)
                .ok_or_else(|| PathError::NotFound(walked.child(seg.clone())))
        }
        (Value::Map(m), Segment::Key(k)) => m
            .get(&Value::Str(k.clone()).canonical_key())
            .ok_or_else(|| PathError::NotFound(walked.child(seg.clone()))),
        (Value::Array(items) | Value::Slice(items), Segment::Index(i)) => {
            items.get(*i).ok_or_else(|| PathError::OutOfBounds {
                path: walked.clone(),
                index: *i,
                len: items.len(),
            })
        }
        (Value::Array(_) | Value::Slice(_), Segment::Append) => {
            Err(PathError::DashNotTerminal(walked.child(seg.clone())))
        }
        _ => Err(PathError::NotFound(walked.child(seg.clone()))),
    }
}

/// Looks the field's declared name up via the type-introspection cache
/// (§4.2); falls back to treating the key as a raw numeric schema index so
/// paths remain resolvable even for types registered after this call.
fn struct_field_index(s: &crate::reflect::StructValue, key: &str) -> Option<usize> {
    if let Some(schema) = crate::registry::lookup_schema(s.type_name) {
        return schema.field_index(key);
    }
    key.parse::<usize>().ok()
}

/// Transparently dereferences `Value::Option` (pointer/interface
/// indirection, §4.1). Returns `None` only when the pointee is nil and the
/// caller is not an `add` (handled one level up, where the operation kind is
/// known).
fn deref(value: &Value) -> Option<&Value> {
    match value {
        Value::Option(Some(inner)) => deref(inner),
        Value::Option(None) => None,
        other => Some(other),
    }
}

/// Splits `path` into `(parent, last segment)`, used by any operation that
/// must create or remove a binding rather than mutate an existing one
/// (§4.1 `resolveParent`). The boolean is `true` when the last segment
/// addresses a sequence by index (including `-`).
pub fn resolve_parent(path: &PathBuf) -> Option<(PathBuf, Segment, bool)> {
    let parent = path.parent()?;
    let last = path.last()?.clone();
    let is_index = !matches!(last, Segment::Key(_));
    Some((parent, last, is_index))
}

fn step_mut<'a>(
    value: &'a mut Value,
    seg: &Segment,
    walked: &PathBuf,
) -> Result<&'a mut Value, PathError> {
    let value = deref_mut(value).ok_or_else(|| PathError::NilTraversal(walked.clone()))?;
    match (value, seg) {
        (Value::Struct(s), Segment::Key(k)) => {
            let idx = struct_field_index(s, k)
                .ok_or_else(|| PathError::NotFound(walked.child(seg.clone())))?;
            s.fields
                .iter_mut()
                .find(|(i, _)| *i == idx)
                .map(|(_, v)| v)
                .ok_or_else(|| PathError::NotFound(walked.child(seg.clone())))
        }
        (Value::Map(m), Segment::Key(k)) => {
            let canon = Value::Str(k.clone()).canonical_key();
            m.entries
                .iter_mut()
                .find(|(mk, _)| mk.canonical_key() == canon)
                .map(|(_, v)| v)
                .ok_or_else(|| PathError::NotFound(walked.child(seg.clone())))
        }
        (Value::Array(items) | Value::Slice(items), Segment::Index(i)) => {
            let len = items.len();
            items.get_mut(*i).ok_or(PathError::OutOfBounds {
                path: walked.clone(),
                index: *i,
                len,
            })
        }
        (Value::Array(_) | Value::Slice(_), Segment::Append) => {
            Err(PathError::DashNotTerminal(walked.child(seg.clone())))
        }
        _ => Err(PathError::NotFound(walked.child(seg.clone()))),
    }
}

fn deref_mut(value: &mut Value) -> Option<&mut Value> {
    match value {
        Value::Option(opt) => match opt {
            Some(inner) => deref_mut(inner.as_mut()),
            None => None,
        },
        other => Some(other),
    }
}

/// Mutably resolves `path` against `root`. Used by apply/reverse when a
/// binding already exists and only needs mutation in place.
pub fn resolve_mut<'a>(root: &'a mut Value, path: &PathBuf) -> Result<&'a mut Value, PathError> {
    let mut current = root;
    let mut walked = PathBuf::root();
    for seg in &path.0 {
        current = step_mut(current, seg, &walked)?;
        walked.push(seg.clone());
    }
    Ok(current)
}

/// Binds `value` at `path`, growing a sequence when the final index equals
/// its current length (an append) and rejecting genuinely out-of-bounds
/// indices (§4.1 `set`).
pub fn set(root: &mut Value, path: &PathBuf, value: Value) -> Result<(), PathError> {
    let Some((parent_path, last, _)) = resolve_parent(path) else {
        *root = value;
        return Ok(());
    };
    let parent = resolve_mut(root, &parent_path)?;
    let parent = deref_mut(parent).ok_or_else(|| PathError::NilTraversal(parent_path.clone()))?;
    match (parent, &last) {
        (Value::Struct(s), Segment::Key(k)) => {
            let idx = struct_field_index(s, k)
                .ok_or_else(|| PathError::NotFound(path.clone()))?;
            if let Some(slot) = s.fields.iter_mut().find(|(i, _)| *i == idx) {
                slot.1 = value;
            } else {
                s.fields.push((idx, value));
            }
            Ok(())
        }
        (Value::Map(m), Segment::Key(k)) => {
            let key_value = Value::Str(k.clone());
            let canon = key_value.canonical_key();
            if let Some(slot) = m.entries.iter_mut().find(|(mk, _)| mk.canonical_key() == canon) {
                slot.1 = value;
            } else {
                m.entries.push((key_value, value));
            }
            Ok(())
        }
        (Value::Array(items) | Value::Slice(items), Segment::Index(i)) => {
            if *i < items.len() {
                items[*i] = value;
                Ok(())
            } else if *i == items.len() {
                items.push(value);
                Ok(())
            } else {
                Err(PathError::OutOfBounds {
                    path: path.clone(),
                    index: *i,
                    len: items.len(),
                })
            }
        }
        (Value::Array(items) | Value::Slice(items), Segment::Append) => {
            items.push(value);
            Ok(())
        }
        _ => Err(PathError::NotFound(path.clone())),
    }
}

/// Removes and returns the value bound at `path` (§4.1 `delete`).
pub fn delete(root: &mut Value, path: &PathBuf) -> Result<Value, PathError> {
    let Some((parent_path, last, _)) = resolve_parent(path) else {
        return Ok(std::mem::replace(root, Value::Null));
    };
    let parent = resolve_mut(root, &parent_path)?;
    let parent = deref_mut(parent).ok_or_else(|| PathError::NilTraversal(parent_path.clone()))?;
    match (parent, &last) {
        (Value::Struct(s), Segment::Key(k)) => {
            let idx = struct_field_index(s, k)
                .ok_or_else(|| PathError::NotFound(path.clone()))?;
            let pos = s
                .fields
                .iter()
                .position(|(i, _)| *i == idx)
                .ok_or_else(|| PathError::NotFound(path.clone()))?;
            Ok(s.fields.remove(pos).1)
        }
        (Value::Map(m), Segment::Key(k)) => {
            let canon = Value::Str(k.clone()).canonical_key();
            let pos = m
                .entries
                .iter()
                .position(|(mk, _)| mk.canonical_key() == canon)
                .ok_or_else(|| PathError::NotFound(path.clone()))?;
            Ok(m.entries.remove(pos).1)
        }
        (Value::Array(items) | Value::Slice(items), Segment::Index(i)) => {
            if *i < items.len() {
                Ok(items.remove(*i))
            } else {
                Err(PathError::OutOfBounds {
                    path: path.clone(),
                    index: *i,
                    len: items.len(),
                })
            }
        }
        _ => Err(PathError::NotFound(path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root() {
        assert_eq!(PathBuf::parse("").unwrap(), PathBuf::root());
        assert_eq!(PathBuf::parse("/").unwrap(), PathBuf::root());
    }

    #[test]
    fn parse_segments() {
        let p = PathBuf::parse("/a/0/b~1c/-").unwrap();
        assert_eq!(
            p.0,
            vec![
                Segment::Key("a".into()),
                Segment::Index(0),
                Segment::Key("b/c".into()),
                Segment::Append,
            ]
        );
    }

    #[test]
    fn escape_roundtrip() {
        let raw = "a/b~c";
        let escaped = escape(raw);
        assert_eq!(unescape(&escaped).unwrap(), raw);
    }

    #[test]
    fn display_matches_parse() {
        let p = PathBuf::parse("/a/0/b").unwrap();
        assert_eq!(p.to_string(), "/a/0/b");
    }

    #[test]
    fn set_append_grows_slice() {
        let mut root = Value::Slice(vec![Value::I64(1), Value::I64(2)]);
        set(&mut root, &PathBuf::parse("/-").unwrap(), Value::I64(3)).unwrap();
        assert_eq!(
            root.structural_bytes(),
            Value::Slice(vec![Value::I64(1), Value::I64(2), Value::I64(3)]).structural_bytes()
        );
    }

    #[test]
    fn set_index_replace_and_out_of_bounds() {
        let mut root = Value::Slice(vec![Value::I64(1)]);
        set(&mut root, &PathBuf::parse("/0").unwrap(), Value::I64(9)).unwrap();
        assert!(set(&mut root, &PathBuf::parse("/5").unwrap(), Value::I64(9)).is_err());
    }

    #[test]
    fn delete_map_entry() {
        let mut root = Value::Map(MapValue {
            entries: vec![(Value::Str("a".into()), Value::I64(1))],
        });
        let removed = delete(&mut root, &PathBuf::parse("/a").unwrap()).unwrap();
        assert!(matches!(removed, Value::I64(1)));
        assert!(resolve(&root, &PathBuf::parse("/a").unwrap()).is_err());
    }
}
