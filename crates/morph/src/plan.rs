//! Mapping plans: resolved field bindings between two shapes.
//!
//! A plan is compiled once per (source, target, direction) identity and
//! cached for the process lifetime. Compilation resolves each target field
//! to its source counterpart, binds accessors, and decides whether the
//! value needs conversion; unresolvable fields are dropped, never fatal.

use crate::accessor::{AccessorCache, Getter, Setter};
use crate::engine::MapError;
use crate::metadata::{FieldDescriptor, extract_descriptors};
use crate::shape::{ShapeRegistry, TypeTag};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Which way a record is being mapped.
///
/// Shape-resolution collaborators hand out directed
/// `(source, target, direction)` triples; the plan cache is keyed by the
/// same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Transfer record into a persistent record.
    ToPersistent,
    /// Persistent record into a transfer record.
    ToTransfer,
}

/// Identity of one cached plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub source: String,
    pub target: String,
    pub direction: Direction,
}

/// One resolved field pairing.
///
/// Holds metadata and function references only; no domain data.
pub struct FieldBinding {
    pub descriptor: FieldDescriptor,
    /// Name of the resolved source field.
    pub source_field: String,
    /// Declared type on the source side.
    pub source_ty: TypeTag,
    pub getter: Getter,
    pub setter: Setter,
    /// False when the value can be assigned as-is.
    pub convert: bool,
}

/// A compiled mapping plan: ordered bindings for one shape pair.
pub struct MappingPlan {
    pub source: String,
    pub target: String,
    pub direction: Direction,
    pub bindings: Vec<FieldBinding>,
}

/// Concurrent plan cache with atomic-if-absent compilation.
///
/// Racing resolutions for one key converge on a single retained plan; the
/// compilation counter makes the at-most-once property observable.
#[derive(Default)]
pub struct PlanCache {
    map: DashMap<PlanKey, Arc<MappingPlan>>,
    compilations: AtomicU64,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached plan for `key`, compiling it on first use.
    pub fn resolve(
        &self,
        registry: &ShapeRegistry,
        accessors: &AccessorCache,
        key: PlanKey,
    ) -> Result<Arc<MappingPlan>, MapError> {
        if let Some(plan) = self.map.get(&key) {
            return Ok(plan.clone());
        }
        // The vacant entry holds its shard locked while we compile, so a
        // racing resolver waits and then observes the finished plan.
        match self.map.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let plan = compile(registry, accessors, entry.key())?;
                self.compilations.fetch_add(1, Ordering::Relaxed);
                Ok(entry.insert(Arc::new(plan)).value().clone())
            }
        }
    }

    /// Number of plans compiled since construction. Not reset by `clear`.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
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

fn compile(
    registry: &ShapeRegistry,
    accessors: &AccessorCache,
    key: &PlanKey,
) -> Result<MappingPlan, MapError> {
    let source_fields = extract_descriptors(registry, &key.source)?;
    let target_fields = extract_descriptors(registry, &key.target)?;

    let mut bindings = Vec::with_capacity(target_fields.len());
    for descriptor in target_fields {
        if descriptor.config.ignore {
            continue;
        }
        let wanted = descriptor
            .config
            .rename
            .as_deref()
            .unwrap_or(&descriptor.name);
        // A source field may also declare this target field as its
        // counterpart, which covers the reverse mapping direction.
        let resolved = source_fields.iter().find(|d| d.name == wanted).or_else(|| {
            source_fields
                .iter()
                .find(|d| d.config.rename.as_deref() == Some(descriptor.name.as_str()))
        });
        let Some(source) = resolved else {
            debug!(
                source = %key.source,
                target = %key.target,
                field = %descriptor.name,
                "no source counterpart, dropping field from plan"
            );
            continue;
        };

        let getter = accessors.getter(registry, &key.source, &source.name, &source.ty);
        let setter = accessors.setter(registry, &key.target, &descriptor.name);
        let convert = descriptor.config.transformer.is_some()
            || descriptor.config.format.is_some()
            || !assignable(&source.ty, &descriptor.ty);

        bindings.push(FieldBinding {
            source_field: source.name.clone(),
            source_ty: source.ty.clone(),
            getter,
            setter,
            convert,
            descriptor,
        });
    }

    Ok(MappingPlan {
        source: key.source.clone(),
        target: key.target.clone(),
        direction: key.direction,
        bindings,
    })
}

/// Tag-level assignability: true when values of `source` never need
/// conversion to land on `target`.
fn assignable(source: &TypeTag, target: &TypeTag) -> bool {
    match (source, target) {
        (_, TypeTag::Any) => true,
        (TypeTag::List(s), TypeTag::List(t)) => assignable(s, t),
        // Set targets always pass through dedup.
        (_, TypeTag::Set(_)) => false,
        (TypeTag::Shape(s), TypeTag::Shape(t)) => s == t,
        (TypeTag::Any, _) => false,
        (s, t) => s == t,
    }
}
