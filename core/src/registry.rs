//! Type introspection cache and custom-hook registry (spec §2 component 2,
//! §5 "readable without synchronization after initialization and guarded by
//! a reader/writer lock for registration"). Grounded on teacher's `registry.rs`
//! (`Arc<BTreeMap<..>>` table plus `parking_lot::RwLock` for the mutable half)
//! generalized from an instance-constructed `Registry::new(packages)` to a
//! process-wide static, since a derive-macro-generated `Reflect::schema()` impl
//! has no registry instance to thread through. The `Lazy` static itself is
//! grounded on `calimero-network-core/crates/client/src/storage.rs`'s
//! `static SESSION_CACHE: once_cell::sync::Lazy<..>`, not on teacher (which
//! never depends on `once_cell`).

use crate::reflect::TypeSchema;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-wide, append-only cache of struct schemas keyed by type name.
/// Populated lazily the first time a `Reflect` struct type's `schema()` is
/// called; never evicts.
static SCHEMA_CACHE: Lazy<RwLock<HashMap<&'static str, &'static TypeSchema>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers (or re-registers, idempotently) a type's schema. Called from
/// derive-macro-generated `Reflect::schema()` impls.
pub fn register_schema(schema: &'static TypeSchema) -> &'static TypeSchema {
    {
        let read = SCHEMA_CACHE.read();
        if let Some(existing) = read.get(schema.type_name) {
            return existing;
        }
    }
    let mut write = SCHEMA_CACHE.write();
    write.entry(schema.type_name).or_insert(schema);
    tracing::debug!(type_name = schema.type_name, "registered schema");
    schema
}

/// Looks up a previously registered schema by type name, used by the path
/// model to resolve a struct field name into a schema index.
pub fn lookup_schema(type_name: &str) -> Option<&'static TypeSchema> {
    SCHEMA_CACHE.read().get(type_name).copied()
}

/// Function-pointer table for a user-registered custom kind (§3 `custom`,
/// §4.4 step 3 "If a custom diff hook is registered... call it"). Plain
/// function pointers are `Copy`, so the registry can hand out owned copies
/// instead of references, sidestepping any lock-lifetime entanglement.
#[derive(Clone, Copy)]
pub struct CustomHooks {
    pub diff: fn(&dyn crate::reflect::CustomData, &dyn crate::reflect::CustomData) -> bool,
    /// State-merge semantics for the CRDT layer's `StateMerge` resolver
    /// (§5); `None` means the type has no commutative merge of its own and
    /// the resolver falls back to last-writer-wins by HLC.
    pub merge: Option<fn(&dyn crate::reflect::CustomData, &dyn crate::reflect::CustomData) -> Box<dyn crate::reflect::CustomData>>,
}

static CUSTOM_HOOKS: Lazy<RwLock<HashMap<&'static str, CustomHooks>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a custom diff hook for a stable kind string. Registration is
/// rare and expected to happen at process startup (§5).
pub fn register_custom_hook(kind: &'static str, hooks: CustomHooks) {
    CUSTOM_HOOKS.write().insert(kind, hooks);
    tracing::debug!(kind, "registered custom hook");
}

pub fn custom_hook(kind: &str) -> Option<CustomHooks> {
    CUSTOM_HOOKS.read().get(kind).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldFlags, FieldSchema};

    static FIELDS: &[FieldSchema] = &[FieldSchema {
        name: "a",
        wire_name: "a",
        flags: FieldFlags {
            ignore: false,
            readonly: false,
            atomic: false,
            key: true,
        },
    }];
    static SCHEMA: TypeSchema = TypeSchema {
        type_name: "registry::tests::Demo",
        fields: FIELDS,
    };

    #[test]
    fn register_and_lookup() {
        register_schema(&SCHEMA);
        let found = lookup_schema("registry::tests::Demo").unwrap();
        assert_eq!(found.key_field(), Some(0));
    }
}
