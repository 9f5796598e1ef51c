//! IOSchema definitions and per-kind meta-schema validation.
//!
//! Every [`IOSchema`] is checked against the meta-schema of its declared kind at
//! construction time, including when it is deserialized from a manifest
//! document. A JSON-Schema payload is compiled as a draft-07 schema, which
//! validates it against the draft's own meta-schema.

use crate::{Error, Result};
use indexmap::IndexMap;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

const JSON_SCHEMA_DRAFT7: &str = "http://json-schema.org/draft-07/schema#";

/// Supported schema kinds for input/output contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// Structured schema (JSON Schema).
    JsonSchema,
    /// Protocol-buffer field descriptor.
    Protobuf,
    /// Row schema (Avro).
    Avro,
    /// API description (OpenAPI).
    Openapi,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonSchema => "json_schema",
            Self::Protobuf => "protobuf",
            Self::Avro => "avro",
            Self::Openapi => "openapi",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural type carried by a schema payload, used for compatibility diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Bytes,
    Array,
    Object,
    Any,
}

/// How a candidate field type relates to a baseline field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRelation {
    Same,
    /// The candidate accepts every value of the baseline and more.
    Wider,
    /// The baseline accepts every value of the candidate and more.
    Narrower,
    Unrelated,
}

impl FieldType {
    /// Whether every value of `other` is a value of `self`.
    pub fn accepts(&self, other: FieldType) -> bool {
        *self == other
            || *self == FieldType::Any
            || (*self == FieldType::Number && other == FieldType::Integer)
    }

    pub fn relation_to(&self, baseline: FieldType) -> TypeRelation {
        if *self == baseline {
            TypeRelation::Same
        } else if self.accepts(baseline) {
            TypeRelation::Wider
        } else if baseline.accepts(*self) {
            TypeRelation::Narrower
        } else {
            TypeRelation::Unrelated
        }
    }

    fn from_json_schema(payload: &Value) -> Self {
        match payload.get("type") {
            Some(Value::String(t)) => Self::from_json_type_name(t),
            Some(Value::Array(types)) => {
                let non_null: Vec<&str> = types
                    .iter()
                    .filter_map(|t| t.as_str())
                    .filter(|t| *t != "null")
                    .collect();
                match non_null.as_slice() {
                    [single] => Self::from_json_type_name(single),
                    _ => Self::Any,
                }
            }
            _ if payload.get("properties").is_some() => Self::Object,
            _ => Self::Any,
        }
    }

    fn from_json_type_name(name: &str) -> Self {
        match name {
            "null" => Self::Null,
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "string" => Self::String,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::Any,
        }
    }

    fn from_protobuf(payload: &Value) -> Self {
        if payload.get("repeated").and_then(|r| r.as_bool()) == Some(true) {
            return Self::Array;
        }
        match payload.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "double" | "float" => Self::Number,
            "int32" | "int64" | "uint32" | "uint64" | "sint32" | "sint64" | "fixed32"
            | "fixed64" | "sfixed32" | "sfixed64" => Self::Integer,
            "bool" => Self::Boolean,
            "string" | "enum" => Self::String,
            "bytes" => Self::Bytes,
            "message" | "map" => Self::Object,
            _ => Self::Any,
        }
    }

    fn from_avro(payload: &Value) -> Self {
        match payload.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "null" => Self::Null,
            "boolean" => Self::Boolean,
            "int" | "long" => Self::Integer,
            "float" | "double" => Self::Number,
            "bytes" | "fixed" => Self::Bytes,
            "string" | "enum" => Self::String,
            "record" | "map" => Self::Object,
            "array" => Self::Array,
            _ => Self::Any,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

fn compile_meta(schema: Value) -> std::result::Result<JSONSchema, String> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| e.to_string())
}

static PROTOBUF_META: Lazy<std::result::Result<JSONSchema, String>> = Lazy::new(|| {
    compile_meta(json!({
        "type": "object",
        "required": ["type"],
        "properties": {
            "type": {
                "enum": [
                    "double", "float", "int32", "int64", "uint32", "uint64",
                    "sint32", "sint64", "fixed32", "fixed64", "sfixed32", "sfixed64",
                    "bool", "string", "bytes", "enum", "message", "map"
                ]
            },
            "message": { "type": "string", "minLength": 1 },
            "fields": { "type": "object" },
            "repeated": { "type": "boolean" },
            "syntax": { "enum": ["proto2", "proto3"] }
        },
        "if": { "properties": { "type": { "const": "message" } } },
        "then": { "required": ["message"] }
    }))
});

static AVRO_META: Lazy<std::result::Result<JSONSchema, String>> = Lazy::new(|| {
    compile_meta(json!({
        "type": "object",
        "required": ["type"],
        "properties": {
            "type": {
                "oneOf": [
                    {
                        "enum": [
                            "null", "boolean", "int", "long", "float", "double",
                            "bytes", "string", "record", "enum", "array", "map", "fixed"
                        ]
                    },
                    { "type": "array", "minItems": 1 }
                ]
            },
            "name": { "type": "string", "minLength": 1 },
            "fields": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "type"]
                }
            }
        },
        "if": { "properties": { "type": { "const": "record" } } },
        "then": { "required": ["name", "fields"] }
    }))
});

static OPENAPI_META: Lazy<std::result::Result<JSONSchema, String>> = Lazy::new(|| {
    compile_meta(json!({
        "type": "object",
        "required": ["openapi"],
        "properties": {
            "openapi": { "type": "string", "pattern": "^3\\.[0-9]+(\\.[0-9]+)?$" },
            "schema": { "type": "object" }
        }
    }))
});

fn check_against(
    meta: &Lazy<std::result::Result<JSONSchema, String>>,
    kind: SchemaKind,
    payload: &Value,
) -> Result<()> {
    let compiled = Lazy::force(meta).as_ref().map_err(|e| Error::Schema {
        kind: kind.to_string(),
        message: format!("meta-schema failed to compile: {}", e),
    })?;
    if let Err(errors) = compiled.validate(payload) {
        let msgs: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(Error::Schema {
            kind: kind.to_string(),
            message: msgs.join("; "),
        });
    }
    Ok(())
}

/// Validate (and normalize) a payload for the given kind.
///
/// JSON-Schema payloads without `$schema` get the draft-07 URI injected.
pub fn validate_payload(kind: SchemaKind, mut payload: Value) -> Result<Value> {
    match kind {
        SchemaKind::JsonSchema => {
            let obj = payload.as_object_mut().ok_or_else(|| Error::Schema {
                kind: kind.to_string(),
                message: "JSON Schema must be an object".to_string(),
            })?;
            obj.entry("$schema")
                .or_insert_with(|| Value::String(JSON_SCHEMA_DRAFT7.to_string()));
            JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&payload)
                .map_err(|e| Error::Schema {
                    kind: kind.to_string(),
                    message: e.to_string(),
                })?;
        }
        SchemaKind::Protobuf => check_against(&PROTOBUF_META, kind, &payload)?,
        SchemaKind::Avro => check_against(&AVRO_META, kind, &payload)?,
        SchemaKind::Openapi => {
            check_against(&OPENAPI_META, kind, &payload)?;
            if let Some(inner) = payload.get("schema") {
                JSONSchema::options()
                    .with_draft(Draft::Draft7)
                    .compile(inner)
                    .map_err(|e| Error::Schema {
                        kind: kind.to_string(),
                        message: format!("schema: {}", e),
                    })?;
            }
        }
    }
    Ok(payload)
}

/// Input/output schema definition for capability contracts.
///
/// Frozen once built: there are no setters, and the `with_*` helpers consume
/// the value and re-validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIOSchema")]
pub struct IOSchema {
    schema_type: SchemaKind,
    schema_definition: Value,
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Deserialize)]
struct RawIOSchema {
    schema_type: SchemaKind,
    schema_definition: Value,
    #[serde(default = "default_required")]
    required: bool,
    #[serde(default)]
    description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl TryFrom<RawIOSchema> for IOSchema {
    type Error = Error;

    fn try_from(raw: RawIOSchema) -> Result<Self> {
        let mut schema = IOSchema::new(raw.schema_type, raw.schema_definition)?;
        schema.required = raw.required;
        schema.description = raw.description;
        Ok(schema)
    }
}

impl IOSchema {
    /// Build a required schema, validating the payload against the kind's meta-schema.
    pub fn new(kind: SchemaKind, definition: Value) -> Result<Self> {
        let schema_definition = validate_payload(kind, definition)?;
        Ok(Self {
            schema_type: kind,
            schema_definition,
            required: true,
            description: None,
        })
    }

    /// Shorthand for a JSON-Schema payload.
    pub fn json(definition: Value) -> Result<Self> {
        Self::new(SchemaKind::JsonSchema, definition)
    }

    /// Shorthand for a JSON-Schema payload with just a `type`.
    pub fn json_type(type_name: &str) -> Result<Self> {
        Self::json(json!({ "type": type_name }))
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(&self) -> SchemaKind {
        self.schema_type
    }

    pub fn definition(&self) -> &Value {
        &self.schema_definition
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn field_type(&self) -> FieldType {
        match self.schema_type {
            SchemaKind::JsonSchema => FieldType::from_json_schema(&self.schema_definition),
            SchemaKind::Protobuf => FieldType::from_protobuf(&self.schema_definition),
            SchemaKind::Avro => FieldType::from_avro(&self.schema_definition),
            SchemaKind::Openapi => self
                .schema_definition
                .get("schema")
                .map(FieldType::from_json_schema)
                .unwrap_or(FieldType::Any),
        }
    }

    /// Re-run meta-schema validation on the stored payload.
    pub fn revalidate(&self) -> Result<()> {
        validate_payload(self.schema_type, self.schema_definition.clone()).map(|_| ())
    }
}

/// Anything exposing named inputs and outputs.
pub trait Contract {
    fn inputs(&self) -> &IndexMap<String, IOSchema>;
    fn outputs(&self) -> &IndexMap<String, IOSchema>;
}

/// An ordered set of named inputs and outputs, e.g. the schema a request requires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSet {
    #[serde(default)]
    pub inputs: IndexMap<String, IOSchema>,
    #[serde(default)]
    pub outputs: IndexMap<String, IOSchema>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: impl Into<String>, schema: IOSchema) -> Self {
        self.inputs.insert(name.into(), schema);
        self
    }

    pub fn output(mut self, name: impl Into<String>, schema: IOSchema) -> Self {
        self.outputs.insert(name.into(), schema);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Snapshot the contract of anything implementing [`Contract`].
    pub fn from_contract(contract: &impl Contract) -> Self {
        Self {
            inputs: contract.inputs().clone(),
            outputs: contract.outputs().clone(),
        }
    }
}

impl Contract for SchemaSet {
    fn inputs(&self) -> &IndexMap<String, IOSchema> {
        &self.inputs
    }

    fn outputs(&self) -> &IndexMap<String, IOSchema> {
        &self.outputs
    }
}
