//! Field metadata extraction.
//!
//! Flattens a shape's own and inherited fields into an ordered descriptor
//! list and classifies each field for dispatch. The list is stable across
//! repeat calls on the same shape, which is what makes plan caching safe.

use crate::engine::MapError;
use crate::shape::{FieldConfig, ShapeRegistry, TypeTag};
use indexmap::IndexMap;

/// Extracted metadata for one field of a shape.
///
/// Immutable once extracted; bindings hold these by value.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeTag,
    /// Value (or collection elements) must be mapped recursively.
    pub nested: bool,
    /// Declared type is list- or set-like.
    pub collection: bool,
    pub config: FieldConfig,
}

impl FieldDescriptor {
    /// Shape name used for recursive mapping of this field, if any.
    ///
    /// The explicit `nested_shape` override wins over the declared type;
    /// for collections the element type is consulted.
    pub fn nested_shape(&self) -> Option<&str> {
        if let Some(shape) = self.config.nested_shape.as_deref() {
            return Some(shape);
        }
        match &self.ty {
            TypeTag::Shape(name) => Some(name),
            TypeTag::List(elem) | TypeTag::Set(elem) => match elem.as_ref() {
                TypeTag::Shape(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Flatten `shape`'s inheritance chain into ordered field descriptors.
///
/// Parent fields come first in declaration order; a child field with the
/// same name replaces the parent's definition in place. The chain walk is
/// bounded so a self-extending shape cannot loop.
pub fn extract_descriptors(
    registry: &ShapeRegistry,
    shape: &str,
) -> Result<Vec<FieldDescriptor>, MapError> {
    let mut chain = Vec::new();
    let mut current = Some(shape.to_string());
    while let Some(name) = current {
        if chain.len() > MAX_EXTENDS_CHAIN {
            break;
        }
        let def = registry
            .get(&name)
            .ok_or_else(|| MapError::UnknownShape(name.clone()))?;
        current = def.extends.clone();
        chain.push(def);
    }

    let mut flat: IndexMap<String, FieldDescriptor> = IndexMap::new();
    for def in chain.iter().rev() {
        for field in &def.fields {
            let descriptor = FieldDescriptor {
                name: field.name.clone(),
                nested: classify_nested(&field.ty, &field.config),
                collection: field.ty.is_collection(),
                ty: field.ty.clone(),
                config: field.config.clone(),
            };
            // IndexMap keeps the first-seen position when a child field
            // replaces its parent's definition.
            flat.insert(field.name.clone(), descriptor);
        }
    }

    Ok(flat.into_values().collect())
}

const MAX_EXTENDS_CHAIN: usize = 32;

fn classify_nested(ty: &TypeTag, config: &FieldConfig) -> bool {
    if config.nested_shape.is_some() {
        return true;
    }
    match ty {
        TypeTag::Shape(_) => true,
        TypeTag::List(elem) | TypeTag::Set(elem) => elem.is_shape(),
        _ => false,
    }
}
