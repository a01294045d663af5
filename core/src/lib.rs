//! Structural state synchronization: a diff/patch engine over a
//! path-addressed structural data model, a condition/predicate algebra for
//! gating patches at apply time, a fluent patch-builder cursor, and a CRDT
//! layer (Hybrid Logical Clock + pluggable conflict resolvers + an RGA text
//! type) for values that converge across concurrent writers.
//!
//! Start at [`reflect::Reflect`] for the type-introspection surface every
//! document type implements (normally via `#[derive(Reflect)]` from
//! `structsync-derive`), [`differ::diff`]/[`patch::apply`] for the core
//! diff/patch loop, [`builder::Builder`] for constructing patches by hand,
//! and [`crdt::Crdt`] for the multi-writer wrapper.
mod builder;
mod condition;
mod copy;
mod crdt;
mod differ;
mod equal;
mod error;
mod hlc;
mod myers;
mod patch;
mod path;
mod reflect;
mod registry;
mod text;
mod wire;

pub use builder::Builder;
pub use condition::{parse as parse_condition, Condition, Literal, TypeTag};
pub use copy::{deep_copy, CopyOptions};
pub use crdt::{Crdt, CrdtConfig, Delta, ResolverKind};
pub use differ::{diff, guarded, DiffOptions};
pub use equal::{deep_equal, EqualOptions};
pub use error::{ApplyErrors, PathError, PreconditionError, Result, SchemaError, SyncError};
pub use hlc::{Clock, Timestamp};
pub use myers::Edit;
pub use patch::{
    apply, apply_checked, apply_resolved, walk, AcceptIncoming, ApplyMode, Conditions, MapPatch, NodeKind, Patch,
    Resolver, SliceOp,
};
pub use path::{delete, escape, resolve, resolve_mut, resolve_parent, set, unescape, PathBuf, Segment};
pub use reflect::{
    CanonicalKey, CustomData, CustomValue, FieldFlags, FieldSchema, MapValue, Reflect, StructValue, TypeSchema, Value,
};
pub use registry::{custom_hook, lookup_schema, register_custom_hook, register_schema, CustomHooks};
pub use text::{register_hooks as register_text_hooks, RunId, Text, TextRun};
pub use wire::{json_to_value, patch_to_json, to_json_patch, value_to_json, RawCustom};

/// Re-exports the derive macro so downstream crates only need one
/// dependency (`use structsync::Reflect;` brings in both the trait and its
/// derive).
pub use structsync_derive::Reflect;
