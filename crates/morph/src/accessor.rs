//! Field accessors and their cache.
//!
//! An accessor is a get or set function bound to one field of one shape.
//! Binding prefers a custom accessor registered on the shape registry
//! (including the boolean `is_<field>` form) and falls back to structural
//! map access by field name. The chosen strategy is cached per
//! `(shape, field, kind)` so no per-call lookup cost remains after warm-up.

use crate::shape::{ShapeRegistry, TypeTag};
use crate::value::{Record, Value};
use dashmap::DashMap;
use std::sync::Arc;

/// Reads a field value from a record.
///
/// `Ok(None)` means the field is absent, which the engine treats as null.
pub type Getter = Arc<dyn Fn(&Record) -> Result<Option<Value>, AccessError> + Send + Sync>;

/// Writes a field value onto a record.
pub type Setter = Arc<dyn Fn(&mut Record, Value) + Send + Sync>;

/// Runtime failure inside a custom accessor.
///
/// Never surfaced to callers; the engine skips the field and keeps mapping.
#[derive(Debug, Clone, thiserror::Error)]
#[error("accessor failed: {0}")]
pub struct AccessError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccessorKey {
    shape: String,
    field: String,
    kind: AccessorKind,
}

enum AccessorSlot {
    Get(Getter),
    Set(Setter),
}

/// Cache of bound accessors, shared across plans.
///
/// Holds only function references and metadata, never domain data.
#[derive(Default)]
pub struct AccessorCache {
    map: DashMap<AccessorKey, AccessorSlot>,
}

impl AccessorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound getter for `shape.field`, binding on first use.
    pub fn getter(
        &self,
        registry: &ShapeRegistry,
        shape: &str,
        field: &str,
        ty: &TypeTag,
    ) -> Getter {
        let key = AccessorKey {
            shape: shape.to_string(),
            field: field.to_string(),
            kind: AccessorKind::Get,
        };
        let slot = self
            .map
            .entry(key)
            .or_insert_with(|| AccessorSlot::Get(bind_getter(registry, shape, field, ty)));
        match slot.value() {
            AccessorSlot::Get(g) => g.clone(),
            // Key kind is Get, so the slot is always Get.
            AccessorSlot::Set(_) => unreachable!(),
        }
    }

    /// Bound setter for `shape.field`, binding on first use.
    pub fn setter(&self, registry: &ShapeRegistry, shape: &str, field: &str) -> Setter {
        let key = AccessorKey {
            shape: shape.to_string(),
            field: field.to_string(),
            kind: AccessorKind::Set,
        };
        let slot = self
            .map
            .entry(key)
            .or_insert_with(|| AccessorSlot::Set(bind_setter(registry, shape, field)));
        match slot.value() {
            AccessorSlot::Set(s) => s.clone(),
            AccessorSlot::Get(_) => unreachable!(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

fn bind_getter(registry: &ShapeRegistry, shape: &str, field: &str, ty: &TypeTag) -> Getter {
    if let Some(custom) = registry.custom_getter(shape, field) {
        return custom;
    }
    if *ty == TypeTag::Bool {
        let probe = format!("is_{}", field);
        if let Some(custom) = registry.custom_getter(shape, &probe) {
            return custom;
        }
    }
    let name = field.to_string();
    Arc::new(move |record: &Record| Ok(record.get(&name).cloned()))
}

fn bind_setter(registry: &ShapeRegistry, shape: &str, field: &str) -> Setter {
    if let Some(custom) = registry.custom_setter(shape, field) {
        return custom;
    }
    let name = field.to_string();
    Arc::new(move |record: &mut Record, value: Value| {
        record.insert(name.clone(), value);
    })
}
