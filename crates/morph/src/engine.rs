//! The mapping engine: context object and public entry points.
//!
//! An `Engine` owns every cache (plans, accessors, formatters), the shape
//! registry, and the transformer registry. Construct one per process (or
//! per test) and share it; all caches are concurrent and callers need no
//! locking.
//!
//! Per call, each field binding dispatches to direct assignment, value
//! coercion, or recursive mapping. Batches switch from sequential to
//! parallel execution at a configurable size threshold while preserving
//! input order.

use crate::accessor::AccessorCache;
use crate::convert::{Coercer, FormatterCache, TransformerRegistry};
use crate::cycle::{self, TraversalScope};
use crate::plan::{Direction, FieldBinding, MappingPlan, PlanCache, PlanKey};
use crate::shape::{NullPolicy, ShapeRegistry, TypeTag};
use crate::value::{Record, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Failure modes surfaced to callers.
///
/// Degraded paths (accessor failures, unconvertible values, halted
/// recursion branches) never appear here; they log and keep mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("unknown shape: {0}")]
    UnknownShape(String),

    #[error("required field `{field}` on `{shape}` resolved to null")]
    RequiredFieldMissing { shape: String, field: String },

    #[error("mapping failed: {0}")]
    Failed(String),
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Batch size at which `map_many` switches to parallel execution.
    pub batch_threshold: usize,
    /// Default recursion ceiling for nested fields.
    pub max_depth: usize,
    /// Worker count for parallel batches; `None` uses the global pool.
    pub parallelism: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 1000,
            max_depth: 8,
            parallelism: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = threshold;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = Some(workers);
        self
    }
}

/// Diagnostic cache counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub plans: usize,
    pub accessors: usize,
    pub formatters: usize,
    /// Plans compiled since engine construction; survives `clear_caches`.
    pub plan_compilations: u64,
}

/// The shape-mapping engine.
pub struct Engine {
    registry: Arc<ShapeRegistry>,
    config: EngineConfig,
    plans: PlanCache,
    accessors: AccessorCache,
    formats: FormatterCache,
    transformers: TransformerRegistry,
}

impl Engine {
    pub fn new(registry: Arc<ShapeRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<ShapeRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            plans: PlanCache::new(),
            accessors: AccessorCache::new(),
            formats: FormatterCache::new(),
            transformers: TransformerRegistry::with_builtins(),
        }
    }

    pub fn registry(&self) -> &ShapeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a named transformer for field configs to reference.
    pub fn register_transformer(
        &self,
        id: impl Into<String>,
        f: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) {
        self.transformers.register(id, f);
    }

    /// Map one record from `source_shape` onto a new `target_shape` record.
    pub fn map_one(
        &self,
        source: &Record,
        source_shape: &str,
        target_shape: &str,
        direction: Direction,
    ) -> Result<Record, MapError> {
        let plan = self.resolve(source_shape, target_shape, direction)?;
        guarded(|| {
            let _scope = TraversalScope::enter();
            self.apply_plan(source, &plan, 0)
        })
    }

    /// Map a batch, isolating per-element failures.
    ///
    /// The outer error is reserved for shape resolution; inner results keep
    /// index-for-index correspondence with the input.
    pub fn map_many(
        &self,
        sources: &[Record],
        source_shape: &str,
        target_shape: &str,
        direction: Direction,
    ) -> Result<Vec<Result<Record, MapError>>, MapError> {
        let plan = self.resolve(source_shape, target_shape, direction)?;
        let map_element = |record: &Record| {
            guarded(|| {
                let _scope = TraversalScope::enter();
                self.apply_plan(record, &plan, 0)
            })
        };

        #[cfg(feature = "parallel")]
        if sources.len() >= self.config.batch_threshold {
            use rayon::prelude::*;

            let run = || sources.par_iter().map(map_element).collect::<Vec<_>>();
            let pool = self.config.parallelism.and_then(|workers| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .ok()
            });
            return Ok(match pool {
                Some(pool) => pool.install(run),
                None => run(),
            });
        }

        Ok(sources.iter().map(map_element).collect())
    }

    /// Map a batch, aborting on the first failing element.
    pub fn map_many_strict(
        &self,
        sources: &[Record],
        source_shape: &str,
        target_shape: &str,
        direction: Direction,
    ) -> Result<Vec<Record>, MapError> {
        self.map_many(sources, source_shape, target_shape, direction)?
            .into_iter()
            .collect()
    }

    /// Partial merge: copy only non-null source fields onto `target`.
    ///
    /// Null and absent source fields are skipped outright, so `required`
    /// and null policies do not apply here.
    pub fn update_in_place(
        &self,
        source: &Record,
        target: &mut Record,
        source_shape: &str,
        target_shape: &str,
        direction: Direction,
    ) -> Result<(), MapError> {
        let plan = self.resolve(source_shape, target_shape, direction)?;
        guarded(|| {
            let _scope = TraversalScope::enter();
            for binding in &plan.bindings {
                let value = match (binding.getter)(source) {
                    Ok(Some(value)) if !value.is_null() => value,
                    Ok(_) => continue,
                    Err(error) => {
                        trace!(field = %binding.descriptor.name, %error, "accessor failed, skipping field");
                        continue;
                    }
                };
                if let Some(mapped) = self.map_field(value, binding, &plan, 0)? {
                    (binding.setter)(target, mapped);
                }
            }
            Ok(())
        })
    }

    /// Administrative reset of the plan, accessor, and formatter caches.
    pub fn clear_caches(&self) {
        self.plans.clear();
        self.accessors.clear();
        self.formats.clear();
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        CacheStatistics {
            plans: self.plans.len(),
            accessors: self.accessors.len(),
            formatters: self.formats.len(),
            plan_compilations: self.plans.compilations(),
        }
    }

    fn resolve(
        &self,
        source: &str,
        target: &str,
        direction: Direction,
    ) -> Result<Arc<MappingPlan>, MapError> {
        self.plans.resolve(
            &self.registry,
            &self.accessors,
            PlanKey {
                source: source.to_string(),
                target: target.to_string(),
                direction,
            },
        )
    }

    fn coercer(&self) -> Coercer<'_> {
        Coercer {
            registry: &self.registry,
            transformers: &self.transformers,
            formats: &self.formats,
        }
    }

    fn apply_plan(
        &self,
        source: &Record,
        plan: &MappingPlan,
        depth: usize,
    ) -> Result<Record, MapError> {
        let mut out = Record::new();
        for binding in &plan.bindings {
            let value = match (binding.getter)(source) {
                Ok(value) => value.unwrap_or(Value::Null),
                Err(error) => {
                    trace!(field = %binding.descriptor.name, %error, "accessor failed, skipping field");
                    continue;
                }
            };
            if value.is_null() {
                self.assign_null(&mut out, binding, plan)?;
                continue;
            }
            if let Some(mapped) = self.map_field(value, binding, plan, depth)? {
                (binding.setter)(&mut out, mapped);
            }
        }
        Ok(out)
    }

    fn assign_null(
        &self,
        out: &mut Record,
        binding: &FieldBinding,
        plan: &MappingPlan,
    ) -> Result<(), MapError> {
        let descriptor = &binding.descriptor;
        if descriptor.config.required {
            return Err(MapError::RequiredFieldMissing {
                shape: plan.target.clone(),
                field: descriptor.name.clone(),
            });
        }
        if let Some(default) = &descriptor.config.default {
            let value = self
                .coercer()
                .coerce(default.clone(), &descriptor.ty, &descriptor.config);
            (binding.setter)(out, value);
            return Ok(());
        }
        match descriptor.config.null_policy {
            NullPolicy::Keep => (binding.setter)(out, Value::Null),
            NullPolicy::Omit => {}
            NullPolicy::Empty if descriptor.collection => {
                (binding.setter)(out, Value::Array(Vec::new()))
            }
            NullPolicy::Empty => (binding.setter)(out, Value::Null),
        }
        Ok(())
    }

    /// Dispatch one non-null field value: recurse, convert, or assign.
    ///
    /// `Ok(None)` means the branch was halted (recursion ceiling or record
    /// revisit) and the field is omitted.
    fn map_field(
        &self,
        value: Value,
        binding: &FieldBinding,
        plan: &MappingPlan,
        depth: usize,
    ) -> Result<Option<Value>, MapError> {
        let descriptor = &binding.descriptor;
        if descriptor.nested {
            if descriptor.collection {
                let items = match value {
                    Value::Array(items) => items,
                    other => {
                        debug!(field = %descriptor.name, "collection field value is not an array, passing through");
                        return Ok(Some(other));
                    }
                };
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(obj) => {
                            if let Some(element) = self.map_nested(&obj, binding, plan, depth)? {
                                mapped.push(element);
                            }
                        }
                        other => {
                            debug!(field = %descriptor.name, "collection element is not a record, passing through");
                            mapped.push(other);
                        }
                    }
                }
                if matches!(descriptor.ty, TypeTag::Set(_)) {
                    mapped = dedup(mapped);
                }
                return Ok(Some(Value::Array(mapped)));
            }
            return match value {
                Value::Object(obj) => self.map_nested(&obj, binding, plan, depth),
                other => {
                    debug!(field = %descriptor.name, "nested field value is not a record, passing through");
                    Ok(Some(other))
                }
            };
        }
        if binding.convert {
            return Ok(Some(self.coercer().coerce(
                value,
                &descriptor.ty,
                &descriptor.config,
            )));
        }
        Ok(Some(value))
    }

    fn map_nested(
        &self,
        obj: &Record,
        binding: &FieldBinding,
        plan: &MappingPlan,
        depth: usize,
    ) -> Result<Option<Value>, MapError> {
        let descriptor = &binding.descriptor;
        let next = depth + 1;
        let limit = descriptor.config.max_depth.unwrap_or(self.config.max_depth);
        if next > limit {
            trace!(field = %descriptor.name, limit, "recursion ceiling reached, halting branch");
            return Ok(None);
        }

        let addr = obj as *const Record as usize;
        let Some(_visit) = cycle::try_visit(addr, next) else {
            trace!(field = %descriptor.name, "source record already on the recursion path, halting branch");
            return Ok(None);
        };

        let Some(target_shape) = descriptor.nested_shape() else {
            debug!(field = %descriptor.name, "no nested shape resolvable, passing record through");
            return Ok(Some(Value::Object(obj.clone())));
        };
        let source_shape = match &binding.source_ty {
            TypeTag::Shape(name) => name.as_str(),
            TypeTag::List(elem) | TypeTag::Set(elem) => match elem.as_ref() {
                TypeTag::Shape(name) => name.as_str(),
                _ => target_shape,
            },
            _ => target_shape,
        };

        let nested_plan = self.plans.resolve(
            &self.registry,
            &self.accessors,
            PlanKey {
                source: source_shape.to_string(),
                target: target_shape.to_string(),
                direction: plan.direction,
            },
        )?;
        let mapped = self.apply_plan(obj, &nested_plan, next)?;
        Ok(Some(Value::Object(mapped)))
    }
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Run a mapping step, converting panics from custom accessor or
/// transformer code into the uniform failure signal.
fn guarded<T>(f: impl FnOnce() -> Result<T, MapError>) -> Result<T, MapError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(MapError::Failed(panic_message(&payload))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal failure".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{EnumDef, FieldDef, NullPolicy, ShapeDef};
    use crate::value::RecordExt;
    use chrono::NaiveDate;

    fn customer_registry() -> ShapeRegistry {
        let mut registry = ShapeRegistry::new();
        registry.register(
            ShapeDef::new("CustomerDto")
                .field(FieldDef::new("name", TypeTag::String))
                .field(FieldDef::new("age", TypeTag::String))
                .field(FieldDef::new("created_at", TypeTag::String)),
        );
        registry.register(
            ShapeDef::new("Customer")
                .field(FieldDef::new("full_name", TypeTag::String).renamed_from("name"))
                .field(FieldDef::new("age", TypeTag::Int))
                .field(
                    FieldDef::new("created_at", TypeTag::Date).default_value("2020-01-01"),
                ),
        );
        registry
    }

    fn engine(registry: ShapeRegistry) -> Engine {
        Engine::new(Arc::new(registry))
    }

    #[test]
    fn test_rename_coerce_and_default() {
        let engine = engine(customer_registry());
        let source = Record::new()
            .with("name", "Alice")
            .with("age", "30")
            .with("created_at", Value::Null);

        let mapped = engine
            .map_one(&source, "CustomerDto", "Customer", Direction::ToPersistent)
            .unwrap();

        assert_eq!(mapped.get("full_name").and_then(Value::as_str), Some("Alice"));
        assert_eq!(mapped.get("age").and_then(Value::as_i64), Some(30));
        assert_eq!(
            mapped.get("created_at").and_then(Value::as_date),
            Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
        );
    }

    #[test]
    fn test_required_null_fails_the_element() {
        let mut registry = ShapeRegistry::new();
        registry.register(ShapeDef::new("Dto").field(FieldDef::new("id", TypeTag::String)));
        registry.register(
            ShapeDef::new("Entity").field(FieldDef::new("id", TypeTag::Uuid).required()),
        );
        let engine = engine(registry);

        let result = engine.map_one(
            &Record::new().with("id", Value::Null),
            "Dto",
            "Entity",
            Direction::ToPersistent,
        );
        assert_eq!(
            result,
            Err(MapError::RequiredFieldMissing {
                shape: "Entity".into(),
                field: "id".into(),
            })
        );
    }

    #[test]
    fn test_null_policies() {
        let mut registry = ShapeRegistry::new();
        registry.register(
            ShapeDef::new("Dto")
                .field(FieldDef::new("kept", TypeTag::String))
                .field(FieldDef::new("omitted", TypeTag::String))
                .field(FieldDef::new("tags", TypeTag::List(Box::new(TypeTag::String)))),
        );
        registry.register(
            ShapeDef::new("Entity")
                .field(FieldDef::new("kept", TypeTag::String))
                .field(FieldDef::new("omitted", TypeTag::String).null_policy(NullPolicy::Omit))
                .field(
                    FieldDef::new("tags", TypeTag::List(Box::new(TypeTag::String)))
                        .null_policy(NullPolicy::Empty),
                ),
        );
        let engine = engine(registry);

        let source = Record::new()
            .with("kept", Value::Null)
            .with("omitted", Value::Null)
            .with("tags", Value::Null);
        let mapped = engine
            .map_one(&source, "Dto", "Entity", Direction::ToPersistent)
            .unwrap();

        assert_eq!(mapped.get("kept"), Some(&Value::Null));
        assert!(!mapped.contains_key("omitted"));
        assert_eq!(mapped.get("tags"), Some(&Value::Array(Vec::new())));
    }

    #[test]
    fn test_nested_record_mapping() {
        let mut registry = ShapeRegistry::new();
        registry.register(
            ShapeDef::new("AddressDto")
                .field(FieldDef::new("street", TypeTag::String))
                .field(FieldDef::new("zip", TypeTag::String)),
        );
        registry.register(
            ShapeDef::new("Address")
                .field(FieldDef::new("street", TypeTag::String))
                .field(FieldDef::new("zip", TypeTag::String)),
        );
        registry.register(
            ShapeDef::new("PersonDto")
                .field(FieldDef::new("name", TypeTag::String))
                .field(FieldDef::new("address", TypeTag::Shape("AddressDto".into()))),
        );
        registry.register(
            ShapeDef::new("Person")
                .field(FieldDef::new("name", TypeTag::String))
                .field(
                    FieldDef::new("address", TypeTag::Shape("AddressDto".into()))
                        .nested_shape("Address"),
                ),
        );
        let engine = engine(registry);

        let source = Record::new().with("name", "Alice").with(
            "address",
            Record::new().with("street", "Main St").with("zip", "12345"),
        );
        let mapped = engine
            .map_one(&source, "PersonDto", "Person", Direction::ToPersistent)
            .unwrap();

        let address = mapped.get("address").and_then(Value::as_object).unwrap();
        assert_eq!(address.get("street").and_then(Value::as_str), Some("Main St"));
    }

    #[test]
    fn test_recursion_ceiling_terminates_self_referential_shapes() {
        let mut registry = ShapeRegistry::new();
        registry.register(
            ShapeDef::new("NodeDto")
                .field(FieldDef::new("label", TypeTag::String))
                .field(FieldDef::new("next", TypeTag::Shape("NodeDto".into()))),
        );
        registry.register(
            ShapeDef::new("Node")
                .field(FieldDef::new("label", TypeTag::String))
                .field(
                    FieldDef::new("next", TypeTag::Shape("NodeDto".into()))
                        .nested_shape("Node")
                        .max_depth(1),
                ),
        );
        let engine = engine(registry);

        // Three levels of nesting, ceiling of one: the tail is dropped.
        let source = Record::new().with("label", "a").with(
            "next",
            Record::new().with("label", "b").with(
                "next",
                Record::new().with("label", "c").with("next", Value::Null),
            ),
        );
        let mapped = engine
            .map_one(&source, "NodeDto", "Node", Direction::ToPersistent)
            .unwrap();

        let level1 = mapped.get("next").and_then(Value::as_object).unwrap();
        assert_eq!(level1.get("label").and_then(Value::as_str), Some("b"));
        assert!(!level1.contains_key("next"));
    }

    #[test]
    fn test_sibling_nested_fields_both_map() {
        let mut registry = ShapeRegistry::new();
        registry.register(
            ShapeDef::new("AddressDto").field(FieldDef::new("street", TypeTag::String)),
        );
        registry.register(ShapeDef::new("Address").field(FieldDef::new("street", TypeTag::String)));
        registry.register(
            ShapeDef::new("PersonDto")
                .field(FieldDef::new("home", TypeTag::Shape("AddressDto".into())))
                .field(FieldDef::new("work", TypeTag::Shape("AddressDto".into()))),
        );
        registry.register(
            ShapeDef::new("Person")
                .field(
                    FieldDef::new("home", TypeTag::Shape("AddressDto".into()))
                        .nested_shape("Address"),
                )
                .field(
                    FieldDef::new("work", TypeTag::Shape("AddressDto".into()))
                        .nested_shape("Address"),
                ),
        );
        let engine = engine(registry);

        let source = Record::new()
            .with("home", Record::new().with("street", "Main St"))
            .with("work", Record::new().with("street", "Market Sq"));
        let mapped = engine
            .map_one(&source, "PersonDto", "Person", Direction::ToPersistent)
            .unwrap();

        let street = |field: &str| {
            mapped
                .get(field)
                .and_then(Value::as_object)
                .and_then(|o| o.get("street"))
                .and_then(Value::as_str)
        };
        assert_eq!(street("home"), Some("Main St"));
        assert_eq!(street("work"), Some("Market Sq"));
    }

    #[test]
    fn test_collection_of_nested_records() {
        let mut registry = ShapeRegistry::new();
        registry.register(ShapeDef::new("ItemDto").field(FieldDef::new("sku", TypeTag::String)));
        registry.register(ShapeDef::new("Item").field(FieldDef::new("sku", TypeTag::String)));
        registry.register(ShapeDef::new("OrderDto").field(FieldDef::new(
            "items",
            TypeTag::List(Box::new(TypeTag::Shape("ItemDto".into()))),
        )));
        registry.register(ShapeDef::new("Order").field(
            FieldDef::new("items", TypeTag::List(Box::new(TypeTag::Shape("ItemDto".into()))))
                .nested_shape("Item"),
        ));
        let engine = engine(registry);

        let source = Record::new().with(
            "items",
            Value::Array(vec![
                Value::Object(Record::new().with("sku", "a-1")),
                Value::Object(Record::new().with("sku", "b-2")),
            ]),
        );
        let mapped = engine
            .map_one(&source, "OrderDto", "Order", Direction::ToPersistent)
            .unwrap();

        let items = mapped.get("items").and_then(Value::as_array).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].as_object().unwrap().get("sku").and_then(Value::as_str),
            Some("b-2")
        );
    }

    #[test]
    fn test_update_in_place_skips_nulls() {
        let engine = engine(customer_registry());
        let source = Record::new()
            .with("name", "Alice")
            .with("age", Value::Null)
            .with("created_at", Value::Null);
        let mut target = Record::new()
            .with("full_name", "Old Name")
            .with("age", 44i64)
            .with("created_at", NaiveDate::from_ymd_opt(2019, 6, 1).unwrap());

        engine
            .update_in_place(&source, &mut target, "CustomerDto", "Customer", Direction::ToPersistent)
            .unwrap();

        assert_eq!(target.get("full_name").and_then(Value::as_str), Some("Alice"));
        assert_eq!(target.get("age").and_then(Value::as_i64), Some(44));
        assert_eq!(
            target.get("created_at").and_then(Value::as_date),
            Some(NaiveDate::from_ymd_opt(2019, 6, 1).unwrap())
        );
    }

    #[test]
    fn test_map_many_isolates_failures_and_keeps_order() {
        let mut registry = ShapeRegistry::new();
        registry.register(ShapeDef::new("Dto").field(FieldDef::new("n", TypeTag::String)));
        registry.register(
            ShapeDef::new("Entity").field(FieldDef::new("n", TypeTag::Int).required()),
        );
        let engine = engine(registry);

        let sources = vec![
            Record::new().with("n", "1"),
            Record::new().with("n", Value::Null),
            Record::new().with("n", "3"),
        ];
        let results = engine
            .map_many(&sources, "Dto", "Entity", Direction::ToPersistent)
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().unwrap().get("n").and_then(Value::as_i64),
            Some(1)
        );
        assert!(matches!(
            results[1],
            Err(MapError::RequiredFieldMissing { .. })
        ));
        assert_eq!(
            results[2].as_ref().unwrap().get("n").and_then(Value::as_i64),
            Some(3)
        );

        assert!(
            engine
                .map_many_strict(&sources, "Dto", "Entity", Direction::ToPersistent)
                .is_err()
        );
    }

    #[test]
    fn test_failing_accessor_degrades_to_field_skip() {
        let mut registry = ShapeRegistry::new();
        registry.register(
            ShapeDef::new("Dto")
                .field(FieldDef::new("good", TypeTag::String))
                .field(FieldDef::new("bad", TypeTag::String)),
        );
        registry.register(
            ShapeDef::new("Entity")
                .field(FieldDef::new("good", TypeTag::String))
                .field(FieldDef::new("bad", TypeTag::String)),
        );
        registry.register_getter(
            "Dto",
            "bad",
            Arc::new(|_: &Record| Err(crate::accessor::AccessError("store offline".into()))),
        );
        let engine = engine(registry);

        let mapped = engine
            .map_one(
                &Record::new().with("good", "v").with("bad", "w"),
                "Dto",
                "Entity",
                Direction::ToPersistent,
            )
            .unwrap();

        assert_eq!(mapped.get("good").and_then(Value::as_str), Some("v"));
        assert!(!mapped.contains_key("bad"));
    }

    #[test]
    fn test_unknown_shape_fails_the_whole_batch() {
        let engine = engine(customer_registry());
        let result = engine.map_many(&[], "CustomerDto", "Ghost", Direction::ToPersistent);
        assert!(matches!(result, Err(MapError::UnknownShape(_))));
    }

    #[test]
    fn test_clear_caches_and_statistics() {
        let engine = engine(customer_registry());
        let source = Record::new().with("name", "Alice").with("age", "30");

        engine
            .map_one(&source, "CustomerDto", "Customer", Direction::ToPersistent)
            .unwrap();

        let stats = engine.cache_statistics();
        assert_eq!(stats.plans, 1);
        assert!(stats.accessors > 0);
        assert_eq!(stats.plan_compilations, 1);

        engine.clear_caches();
        let stats = engine.cache_statistics();
        assert_eq!(stats.plans, 0);
        assert_eq!(stats.accessors, 0);
        assert_eq!(stats.formatters, 0);
        assert_eq!(stats.plan_compilations, 1);
    }

    #[test]
    fn test_custom_transformer_and_enum() {
        let mut registry = ShapeRegistry::new();
        registry.register_enum(EnumDef::new("Status", ["Active", "Suspended"]));
        registry.register(
            ShapeDef::new("Dto")
                .field(FieldDef::new("code", TypeTag::String))
                .field(FieldDef::new("status", TypeTag::String)),
        );
        registry.register(
            ShapeDef::new("Entity")
                .field(FieldDef::new("code", TypeTag::String).transformer("slug"))
                .field(FieldDef::new("status", TypeTag::Enum("Status".into()))),
        );
        let engine = engine(registry);
        engine.register_transformer("slug", |v| match v {
            Value::String(s) => Value::String(s.replace(' ', "-").to_lowercase()),
            other => other,
        });

        let source = Record::new()
            .with("code", "Big Deal")
            .with("status", "ACTIVE");
        let mapped = engine
            .map_one(&source, "Dto", "Entity", Direction::ToPersistent)
            .unwrap();

        assert_eq!(mapped.get("code").and_then(Value::as_str), Some("big-deal"));
        assert_eq!(mapped.get("status").and_then(Value::as_str), Some("Active"));
    }

    #[test]
    fn test_panicking_transformer_becomes_uniform_failure() {
        let mut registry = ShapeRegistry::new();
        registry.register(ShapeDef::new("Dto").field(FieldDef::new("x", TypeTag::String)));
        registry.register(
            ShapeDef::new("Entity").field(FieldDef::new("x", TypeTag::String).transformer("boom")),
        );
        let engine = engine(registry);
        engine.register_transformer("boom", |_| panic!("transformer exploded"));

        let result = engine.map_one(
            &Record::new().with("x", "v"),
            "Dto",
            "Entity",
            Direction::ToPersistent,
        );
        assert_eq!(
            result,
            Err(MapError::Failed("transformer exploded".into()))
        );
    }
}
