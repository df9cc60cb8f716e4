//! Value coercion across type mismatches.
//!
//! Conversion is applied only when a source value does not already satisfy
//! the target type. Rules are tried in a fixed priority order: named
//! transformer, format pattern, numeric widening/narrowing, string parsing,
//! boolean coercion, container conversion, stringification. A value no rule
//! can handle is passed through unchanged and logged at debug level; a
//! failed coercion never fails a mapping.

use crate::shape::{FieldConfig, ShapeRegistry, TypeTag};
use crate::value::Value;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A named value transformer, applied before any other conversion rule.
pub type Transformer = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Registry of named transformers.
///
/// Ships with `upper`, `lower`, and `trim`; collaborators register their
/// own under any id a field config can reference.
pub struct TransformerRegistry {
    map: DashMap<String, Transformer>,
}

impl TransformerRegistry {
    pub fn with_builtins() -> Self {
        let registry = Self {
            map: DashMap::new(),
        };
        registry.register("upper", |v| map_string(v, |s| s.to_uppercase()));
        registry.register("lower", |v| map_string(v, |s| s.to_lowercase()));
        registry.register("trim", |v| map_string(v, |s| s.trim().to_string()));
        registry
    }

    pub fn register(
        &self,
        id: impl Into<String>,
        f: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) {
        self.map.insert(id.into(), Arc::new(f));
    }

    pub fn get(&self, id: &str) -> Option<Transformer> {
        self.map.get(id).map(|t| t.value().clone())
    }
}

fn map_string(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

/// A pattern compiled for temporal parsing and printing.
///
/// Parsing tolerates a bad pattern (chrono reports it as a parse error);
/// printing validates the pattern once so a bad one degrades instead of
/// panicking inside `Display`.
pub struct FormatSpec {
    pattern: String,
    printable: bool,
}

impl FormatSpec {
    fn new(pattern: &str) -> Self {
        let printable = !StrftimeItems::new(pattern).any(|i| matches!(i, Item::Error));
        Self {
            pattern: pattern.to_string(),
            printable,
        }
    }

    pub fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(text.trim(), &self.pattern).ok()
    }

    pub fn parse_datetime(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_str(text, &self.pattern) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, &self.pattern)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn format_date(&self, date: NaiveDate) -> Option<String> {
        self.print(date.format(&self.pattern))
    }

    pub fn format_datetime(&self, dt: DateTime<Utc>) -> Option<String> {
        self.print(dt.format(&self.pattern))
    }

    /// Strip the pattern's grouping separators from numeric text.
    pub fn strip_grouping(&self, text: &str) -> String {
        text.chars()
            .filter(|c| !(matches!(c, ',' | '_' | ' ') && self.pattern.contains(*c)))
            .collect()
    }

    fn print(&self, formatted: impl std::fmt::Display) -> Option<String> {
        if !self.printable {
            return None;
        }
        let mut out = String::new();
        write!(out, "{}", formatted).ok()?;
        Some(out)
    }
}

/// Cache of compiled format patterns, keyed by the pattern text.
#[derive(Default)]
pub struct FormatterCache {
    map: DashMap<String, Arc<FormatSpec>>,
}

impl FormatterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pattern: &str) -> Arc<FormatSpec> {
        self.map
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(FormatSpec::new(pattern)))
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

/// Conversion context borrowed from the engine for one coercion.
pub(crate) struct Coercer<'a> {
    pub registry: &'a ShapeRegistry,
    pub transformers: &'a TransformerRegistry,
    pub formats: &'a FormatterCache,
}

impl Coercer<'_> {
    /// Coerce `value` toward `target`, degrading to passthrough when no
    /// rule applies.
    pub fn coerce(&self, value: Value, target: &TypeTag, config: &FieldConfig) -> Value {
        let value = self.apply_transformer(value, config);

        if self.satisfies(&value, target) {
            return value;
        }
        if let Some(pattern) = config.format.as_deref() {
            if let Some(out) = self.apply_format(&value, target, pattern) {
                return out;
            }
        }
        if let Some(out) = numeric_coerce(&value, target) {
            return out;
        }
        if let Some(out) = self.parse_text(&value, target) {
            return out;
        }
        if let Some(out) = boolean_coerce(&value, target) {
            return out;
        }
        if let Some(out) = self.container_coerce(&value, target, config) {
            return out;
        }
        if let Some(out) = stringify(&value, target) {
            return out;
        }

        debug!(target = %target, "no conversion rule matched, passing value through");
        value
    }

    /// Whether a value already satisfies the target type (no-op path).
    pub fn satisfies(&self, value: &Value, target: &TypeTag) -> bool {
        match (value, target) {
            (_, TypeTag::Any) => true,
            (Value::Bool(_), TypeTag::Bool) => true,
            (Value::Int(_), TypeTag::Int) => true,
            (Value::Float(_), TypeTag::Float) => true,
            (Value::Decimal(_), TypeTag::Decimal) => true,
            (Value::String(_), TypeTag::String) => true,
            (Value::Uuid(_), TypeTag::Uuid) => true,
            (Value::Date(_), TypeTag::Date) => true,
            (Value::DateTime(_), TypeTag::DateTime) => true,
            (Value::String(s), TypeTag::Enum(name)) => self
                .registry
                .get_enum(name)
                .is_some_and(|def| def.variants.iter().any(|v| v == s)),
            (Value::Array(items), TypeTag::List(elem)) => {
                items.iter().all(|item| self.satisfies(item, elem))
            }
            (Value::Object(_), TypeTag::Shape(_)) => true,
            _ => false,
        }
    }

    fn apply_transformer(&self, value: Value, config: &FieldConfig) -> Value {
        let Some(id) = config.transformer.as_deref() else {
            return value;
        };
        match self.transformers.get(id) {
            Some(transformer) => transformer(value),
            None => {
                debug!(transformer = id, "unknown transformer id, skipping");
                value
            }
        }
    }

    fn apply_format(&self, value: &Value, target: &TypeTag, pattern: &str) -> Option<Value> {
        let spec = self.formats.get(pattern);
        match (value, target) {
            (Value::String(s), TypeTag::Date) => spec.parse_date(s).map(Value::Date),
            (Value::String(s), TypeTag::DateTime) => spec.parse_datetime(s).map(Value::DateTime),
            (Value::String(s), TypeTag::Int) => {
                spec.strip_grouping(s).trim().parse::<i64>().ok().map(Value::Int)
            }
            (Value::String(s), TypeTag::Float) => {
                spec.strip_grouping(s).trim().parse::<f64>().ok().map(Value::Float)
            }
            (Value::String(s), TypeTag::Decimal) => {
                Decimal::from_str(spec.strip_grouping(s).trim())
                    .ok()
                    .map(Value::Decimal)
            }
            (Value::Date(d), TypeTag::String | TypeTag::Any) => {
                spec.format_date(*d).map(Value::String)
            }
            (Value::DateTime(dt), TypeTag::String | TypeTag::Any) => {
                spec.format_datetime(*dt).map(Value::String)
            }
            _ => None,
        }
    }

    fn parse_text(&self, value: &Value, target: &TypeTag) -> Option<Value> {
        let Value::String(s) = value else {
            return None;
        };
        let s = s.trim();
        match target {
            TypeTag::Int => s.parse::<i64>().ok().map(Value::Int),
            TypeTag::Float => s.parse::<f64>().ok().map(Value::Float),
            TypeTag::Decimal => Decimal::from_str(s).ok().map(Value::Decimal),
            TypeTag::Uuid => Uuid::parse_str(s).ok().map(Value::Uuid),
            TypeTag::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Value::Date),
            TypeTag::DateTime => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                })
                .map(Value::DateTime),
            TypeTag::Bool => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Some(Value::Bool(true)),
                "false" | "no" | "0" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            TypeTag::Enum(name) => self
                .registry
                .get_enum(name)
                .and_then(|def| def.canonicalize(s).map(|v| Value::String(v.to_string()))),
            _ => None,
        }
    }

    fn container_coerce(
        &self,
        value: &Value,
        target: &TypeTag,
        config: &FieldConfig,
    ) -> Option<Value> {
        let Value::Array(items) = value else {
            return None;
        };
        match target {
            TypeTag::List(elem) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| self.coerce(item.clone(), elem, config))
                    .collect(),
            )),
            TypeTag::Set(elem) => {
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let coerced = self.coerce(item.clone(), elem, config);
                    if !out.contains(&coerced) {
                        out.push(coerced);
                    }
                }
                Some(Value::Array(out))
            }
            _ => None,
        }
    }
}

fn numeric_coerce(value: &Value, target: &TypeTag) -> Option<Value> {
    match (value, target) {
        (Value::Int(n), TypeTag::Float) => Some(Value::Float(*n as f64)),
        (Value::Int(n), TypeTag::Decimal) => Some(Value::Decimal(Decimal::from(*n))),
        // Narrowing truncates toward zero; out-of-range saturates.
        (Value::Float(f), TypeTag::Int) => Some(Value::Int(*f as i64)),
        (Value::Float(f), TypeTag::Decimal) => Decimal::from_f64(*f).map(Value::Decimal),
        (Value::Decimal(d), TypeTag::Int) => d.trunc().to_i64().map(Value::Int),
        (Value::Decimal(d), TypeTag::Float) => d.to_f64().map(Value::Float),
        _ => None,
    }
}

fn boolean_coerce(value: &Value, target: &TypeTag) -> Option<Value> {
    if *target != TypeTag::Bool {
        return None;
    }
    match value {
        Value::Int(n) => Some(Value::Bool(*n != 0)),
        Value::Float(f) => Some(Value::Bool(*f != 0.0)),
        Value::Decimal(d) => Some(Value::Bool(!d.is_zero())),
        _ => None,
    }
}

fn stringify(value: &Value, target: &TypeTag) -> Option<Value> {
    if *target != TypeTag::String {
        return None;
    }
    let text = match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Uuid(u) => u.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.to_rfc3339(),
        _ => return None,
    };
    Some(Value::String(text))
}
