//! Shape definitions and the shape registry.
//!
//! A shape describes the field layout of one record type at runtime. Shapes
//! are registered by name and may extend a parent shape; the registry is the
//! vocabulary the plan compiler resolves against.
//!
//! Shape sets are plain serde documents and can be side-loaded from TOML,
//! YAML, or JSON, so field configuration stays declarative without tying the
//! engine to any one metadata mechanism.

use crate::accessor::{Getter, Setter};
use crate::value::Value;
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Runtime descriptor for a declared field type.
///
/// Text syntax: `"int"`, `"list<string>"`, `"set<decimal>"`,
/// `"shape:Address"`, `"enum:Status"`, `"list<shape:Address>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    Decimal,
    String,
    Uuid,
    Date,
    DateTime,
    /// Named enum; values are carried as canonical variant strings.
    Enum(String),
    /// Ordered collection; element order is preserved.
    List(Box<TypeTag>),
    /// Unordered collection; elements are deduplicated, order not guaranteed.
    Set(Box<TypeTag>),
    /// Nested complex field, mapped recursively.
    Shape(String),
    Any,
}

impl TypeTag {
    /// Whether values of this type are mapped recursively.
    pub fn is_shape(&self) -> bool {
        matches!(self, TypeTag::Shape(_))
    }

    /// Whether this is a list- or set-like container.
    pub fn is_collection(&self) -> bool {
        matches!(self, TypeTag::List(_) | TypeTag::Set(_))
    }

    /// Element type for containers, `None` otherwise.
    pub fn element(&self) -> Option<&TypeTag> {
        match self {
            TypeTag::List(elem) | TypeTag::Set(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Decimal => write!(f, "decimal"),
            TypeTag::String => write!(f, "string"),
            TypeTag::Uuid => write!(f, "uuid"),
            TypeTag::Date => write!(f, "date"),
            TypeTag::DateTime => write!(f, "datetime"),
            TypeTag::Enum(name) => write!(f, "enum:{}", name),
            TypeTag::List(elem) => write!(f, "list<{}>", elem),
            TypeTag::Set(elem) => write!(f, "set<{}>", elem),
            TypeTag::Shape(name) => write!(f, "shape:{}", name),
            TypeTag::Any => write!(f, "any"),
        }
    }
}

impl FromStr for TypeTag {
    type Err = ShapeFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            return Ok(TypeTag::List(Box::new(inner.parse()?)));
        }
        if let Some(inner) = s.strip_prefix("set<").and_then(|r| r.strip_suffix('>')) {
            return Ok(TypeTag::Set(Box::new(inner.parse()?)));
        }
        if let Some(name) = s.strip_prefix("shape:") {
            return Ok(TypeTag::Shape(name.trim().to_string()));
        }
        if let Some(name) = s.strip_prefix("enum:") {
            return Ok(TypeTag::Enum(name.trim().to_string()));
        }
        match s {
            "bool" => Ok(TypeTag::Bool),
            "int" => Ok(TypeTag::Int),
            "float" => Ok(TypeTag::Float),
            "decimal" => Ok(TypeTag::Decimal),
            "string" => Ok(TypeTag::String),
            "uuid" => Ok(TypeTag::Uuid),
            "date" => Ok(TypeTag::Date),
            "datetime" => Ok(TypeTag::DateTime),
            "any" => Ok(TypeTag::Any),
            other => Err(ShapeFileError::UnknownType(other.to_string())),
        }
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// How a null source value lands on the target field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// Write an explicit null.
    #[default]
    Keep,
    /// Leave the field out of the output record.
    Omit,
    /// Substitute an empty collection (collection-typed targets only).
    Empty,
}

/// Per-field mapping configuration.
///
/// The engine depends only on this struct; how it gets populated (shape
/// files, builder calls, collaborator code) is not its concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Name of the counterpart field in the opposite shape, when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    /// Excluded from mapping entirely.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore: bool,
    /// A null source value fails the element instead of degrading.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Literal substituted when the source value is null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Named transformer applied before any other conversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<String>,
    /// Pattern for parsing textual values into temporal/numeric targets,
    /// or for printing temporal values to text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Explicit shape for nested mapping, overriding the declared type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_shape: Option<String>,
    /// Per-field recursion ceiling, overriding the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "is_default_policy")]
    pub null_policy: NullPolicy,
}

fn is_default_policy(p: &NullPolicy) -> bool {
    *p == NullPolicy::Keep
}

/// One declared field of a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    #[serde(flatten)]
    pub config: FieldConfig,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeTag) -> Self {
        Self {
            name: name.into(),
            ty,
            config: FieldConfig::default(),
        }
    }

    /// Map this field from a differently named source field.
    pub fn renamed_from(mut self, source: impl Into<String>) -> Self {
        self.config.rename = Some(source.into());
        self
    }

    pub fn ignored(mut self) -> Self {
        self.config.ignore = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.config.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.config.default = Some(value.into());
        self
    }

    pub fn transformer(mut self, id: impl Into<String>) -> Self {
        self.config.transformer = Some(id.into());
        self
    }

    pub fn format(mut self, pattern: impl Into<String>) -> Self {
        self.config.format = Some(pattern.into());
        self
    }

    pub fn nested_shape(mut self, shape: impl Into<String>) -> Self {
        self.config.nested_shape = Some(shape.into());
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = Some(depth);
        self
    }

    pub fn null_policy(mut self, policy: NullPolicy) -> Self {
        self.config.null_policy = policy;
        self
    }
}

/// Declaration of one record shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeDef {
    pub name: String,
    /// Parent shape whose fields this shape inherits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl ShapeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }
}

/// A named enum whose values are canonical variant strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDef {
    pub fn new(
        name: impl Into<String>,
        variants: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a value to its canonical variant, case-insensitively.
    pub fn canonicalize(&self, value: &str) -> Option<&str> {
        self.variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(value))
            .map(|v| v.as_str())
    }
}

/// A declarative document holding shapes and enums.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeSet {
    #[serde(default)]
    pub shapes: Vec<ShapeDef>,
    #[serde(default)]
    pub enums: Vec<EnumDef>,
}

impl ShapeSet {
    /// Parse a shape set from bytes, auto-detecting format from a path hint.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, ShapeFileError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());
        Self::from_bytes_format(data, &format)
    }

    /// Parse a shape set from bytes with explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, ShapeFileError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| ShapeFileError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| ShapeFileError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| ShapeFileError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| ShapeFileError::Parse(e.to_string()))
            }
            _ => Err(ShapeFileError::UnsupportedFormat(format.to_string())),
        }
    }

    /// Serialize to bytes in the given format.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, ShapeFileError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| ShapeFileError::Parse(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(|s| s.into_bytes())
                .map_err(|e| ShapeFileError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(|s| s.into_bytes())
                .map_err(|e| ShapeFileError::Parse(e.to_string())),
            _ => Err(ShapeFileError::UnsupportedFormat(format.to_string())),
        }
    }
}

/// Errors related to shape declarations and their documents.
#[derive(Debug, thiserror::Error)]
pub enum ShapeFileError {
    #[error("failed to parse shape set: {0}")]
    Parse(String),

    #[error("unsupported shape set format: {0}")]
    UnsupportedFormat(String),

    #[error("unknown type tag: {0}")]
    UnknownType(String),
}

fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}

/// Registry of shapes, enums, and custom accessors.
///
/// Populated up front, then shared read-only with the engine. Custom
/// accessors registered here win over structural field access at
/// plan-compile time.
#[derive(Clone, Default)]
pub struct ShapeRegistry {
    shapes: IndexMap<String, Arc<ShapeDef>>,
    enums: IndexMap<String, Arc<EnumDef>>,
    getters: IndexMap<(String, String), Getter>,
    setters: IndexMap<(String, String), Setter>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, shape: ShapeDef) {
        self.shapes.insert(shape.name.clone(), Arc::new(shape));
    }

    pub fn register_enum(&mut self, def: EnumDef) {
        self.enums.insert(def.name.clone(), Arc::new(def));
    }

    /// Register every shape and enum from a declarative document.
    pub fn load(&mut self, set: ShapeSet) {
        for shape in set.shapes {
            self.register(shape);
        }
        for def in set.enums {
            self.register_enum(def);
        }
    }

    /// Register a custom getter for `shape.field`.
    ///
    /// Boolean fields may also be registered under the `is_<field>` name;
    /// accessor binding probes that form too.
    pub fn register_getter(
        &mut self,
        shape: impl Into<String>,
        field: impl Into<String>,
        getter: Getter,
    ) {
        self.getters.insert((shape.into(), field.into()), getter);
    }

    /// Register a custom setter for `shape.field`.
    pub fn register_setter(
        &mut self,
        shape: impl Into<String>,
        field: impl Into<String>,
        setter: Setter,
    ) {
        self.setters.insert((shape.into(), field.into()), setter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ShapeDef>> {
        self.shapes.get(name).cloned()
    }

    pub fn get_enum(&self, name: &str) -> Option<Arc<EnumDef>> {
        self.enums.get(name).cloned()
    }

    pub(crate) fn custom_getter(&self, shape: &str, field: &str) -> Option<Getter> {
        self.getters
            .get(&(shape.to_string(), field.to_string()))
            .cloned()
    }

    pub(crate) fn custom_setter(&self, shape: &str, field: &str) -> Option<Setter> {
        self.setters
            .get(&(shape.to_string(), field.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_roundtrip() {
        for text in [
            "bool",
            "int",
            "decimal",
            "uuid",
            "datetime",
            "enum:Status",
            "shape:Address",
            "list<int>",
            "set<string>",
            "list<shape:Address>",
        ] {
            let tag: TypeTag = text.parse().expect("should parse");
            assert_eq!(tag.to_string(), text);
        }
    }

    #[test]
    fn test_type_tag_rejects_unknown() {
        assert!("gremlin".parse::<TypeTag>().is_err());
        assert!("list<gremlin>".parse::<TypeTag>().is_err());
    }

    #[test]
    fn test_shape_builder() {
        let shape = ShapeDef::new("CustomerDto")
            .extends("BaseDto")
            .field(FieldDef::new("full_name", TypeTag::String).renamed_from("name"))
            .field(FieldDef::new("age", TypeTag::Int).required());

        assert_eq!(shape.name, "CustomerDto");
        assert_eq!(shape.extends.as_deref(), Some("BaseDto"));
        assert_eq!(shape.fields.len(), 2);
        assert_eq!(shape.fields[0].config.rename.as_deref(), Some("name"));
        assert!(shape.fields[1].config.required);
    }

    #[test]
    fn test_shape_set_toml() {
        let doc = r#"
            [[shapes]]
            name = "Customer"

            [[shapes.fields]]
            name = "id"
            type = "uuid"
            required = true

            [[shapes.fields]]
            name = "tags"
            type = "list<string>"
            null_policy = "empty"

            [[enums]]
            name = "Status"
            variants = ["Active", "Suspended"]
        "#;

        let set = ShapeSet::from_bytes_format(doc.as_bytes(), "toml").unwrap();
        assert_eq!(set.shapes.len(), 1);
        assert_eq!(set.shapes[0].fields[0].ty, TypeTag::Uuid);
        assert!(set.shapes[0].fields[0].config.required);
        assert_eq!(
            set.shapes[0].fields[1].config.null_policy,
            NullPolicy::Empty
        );
        assert_eq!(set.enums[0].variants.len(), 2);
    }

    #[test]
    fn test_shape_set_yaml_and_json_roundtrip() {
        let set = ShapeSet {
            shapes: vec![
                ShapeDef::new("Order")
                    .field(FieldDef::new("total", TypeTag::Decimal).default_value("0")),
            ],
            enums: vec![EnumDef::new("Status", ["Open", "Closed"])],
        };

        for format in ["json", "yaml", "toml"] {
            let bytes = set.to_bytes(format).unwrap();
            let parsed = ShapeSet::from_bytes_format(&bytes, format).unwrap();
            assert_eq!(parsed.shapes[0].name, "Order");
            assert_eq!(parsed.shapes[0].fields[0].ty, TypeTag::Decimal);
            assert_eq!(parsed.enums[0].name, "Status");
        }
    }

    #[test]
    fn test_format_detection() {
        let set = ShapeSet::default();
        let bytes = set.to_bytes("json").unwrap();
        assert!(ShapeSet::from_bytes(&bytes, Some("shapes.json")).is_ok());
        assert!(matches!(
            ShapeSet::from_bytes_format(&bytes, "ini"),
            Err(ShapeFileError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_enum_canonicalize() {
        let def = EnumDef::new("Status", ["Active", "Suspended"]);
        assert_eq!(def.canonicalize("ACTIVE"), Some("Active"));
        assert_eq!(def.canonicalize("suspended"), Some("Suspended"));
        assert_eq!(def.canonicalize("retired"), None);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ShapeRegistry::new();
        registry.register(ShapeDef::new("Customer"));
        registry.register_enum(EnumDef::new("Status", ["Active"]));

        assert!(registry.get("Customer").is_some());
        assert!(registry.get("Unknown").is_none());
        assert!(registry.get_enum("Status").is_some());
        assert_eq!(registry.len(), 1);
    }
}
