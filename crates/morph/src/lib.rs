//! Morph: runtime shape-mapping engine.
//!
//! Morph converts between transfer records (request/response payloads) and
//! persistent records (domain entities) without generated conversion code.
//! Field correspondence is resolved at runtime against registered shapes,
//! compiled into a cached mapping plan, and executed with type coercion,
//! recursive nested mapping, and an order-preserving batch driver.

mod accessor;
mod convert;
mod cycle;
mod engine;
mod metadata;
mod plan;
mod shape;
mod value;

pub use accessor::{AccessError, Getter, Setter};
pub use convert::{Transformer, TransformerRegistry};
pub use engine::{CacheStatistics, Engine, EngineConfig, MapError};
pub use metadata::FieldDescriptor;
pub use plan::{Direction, FieldBinding, MappingPlan, PlanKey};
pub use shape::{
    EnumDef, FieldConfig, FieldDef, NullPolicy, ShapeDef, ShapeFileError, ShapeRegistry, ShapeSet,
    TypeTag,
};
pub use value::{Record, RecordExt, Value};
