//! Field descriptors: the typed read/write plan supplied by code generation.
//!
//! The normalizer and the reader both walk a [`SelectionSet`]. Descriptors
//! are treated as already validated; nothing here checks them against a
//! schema.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Root record key for queries (and subscriptions).
pub const QUERY_ROOT_KEY: &str = "QUERY_ROOT";
/// Root record key for mutations.
pub const MUTATION_ROOT_KEY: &str = "MUTATION_ROOT";

/// Field holding the concrete object type.
pub const TYPENAME_FIELD: &str = "__typename";

/// Operation variables, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: BTreeMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Truthiness used by `@skip`/`@include`; undefined is false.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::Bool(true)))
    }

    /// Variables as one JSON object; see [`canonical_json`] for a stable form.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

/// Builds the argument placeholder for a variable, `{"kind":"Variable","variableName":..}`.
pub fn variable(name: &str) -> Value {
    let mut map = Map::new();
    map.insert("kind".to_string(), Value::String("Variable".to_string()));
    map.insert("variableName".to_string(), Value::String(name.to_string()));
    Value::Object(map)
}

fn variable_name(value: &Map<String, Value>) -> Option<&str> {
    match (value.get("kind"), value.get("variableName")) {
        (Some(Value::String(kind)), Some(Value::String(name))) if kind == "Variable" => {
            Some(name.as_str())
        }
        _ => None,
    }
}

/// Substitute variable placeholders with their runtime values.
///
/// Undefined variables resolve to `null`.
pub fn resolve_argument(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::Object(map) => match variable_name(map) {
            Some(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            None => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve_argument(v, variables)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_argument(v, variables))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `@skip(if: $var)` / `@include(if: $var)` conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Skip(String),
    Include(String),
}

impl Condition {
    /// True if this condition removes the field under `variables`.
    pub fn skips(&self, variables: &Variables) -> bool {
        match self {
            Condition::Skip(name) => variables.flag(name),
            Condition::Include(name) => !variables.flag(name),
        }
    }
}

/// Shape of a field's value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Leaf value: built-in scalar, enum or custom scalar.
    Scalar,
    /// Composite value with its own selections.
    Object(SelectionSet),
    /// List of the inner kind (lists nest).
    List(Box<FieldKind>),
}

impl FieldKind {
    pub fn list_of(inner: FieldKind) -> Self {
        FieldKind::List(Box::new(inner))
    }
}

/// One selected field.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseField {
    /// Alias if present, otherwise the field name.
    pub response_name: String,
    pub field_name: String,
    /// Raw arguments; may contain variable placeholders.
    pub arguments: Map<String, Value>,
    pub optional: bool,
    pub conditions: Vec<Condition>,
    pub kind: FieldKind,
}

impl ResponseField {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            response_name: name.to_string(),
            field_name: name.to_string(),
            arguments: Map::new(),
            optional: true,
            conditions: Vec::new(),
            kind,
        }
    }

    pub fn scalar(name: &str) -> Self {
        Self::new(name, FieldKind::Scalar)
    }

    pub fn object(name: &str, selections: SelectionSet) -> Self {
        Self::new(name, FieldKind::Object(selections))
    }

    pub fn list(name: &str, inner: FieldKind) -> Self {
        Self::new(name, FieldKind::list_of(inner))
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.response_name = alias.to_string();
        self
    }

    pub fn argument(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.to_string(), value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// True if a `@skip`/`@include` condition removes this field.
    pub fn is_skipped(&self, variables: &Variables) -> bool {
        self.conditions.iter().any(|c| c.skips(variables))
    }

    /// Arguments with variables substituted; sorted by name.
    pub fn resolved_arguments(&self, variables: &Variables) -> Map<String, Value> {
        self.arguments
            .iter()
            .map(|(k, v)| (k.clone(), resolve_argument(v, variables)))
            .collect()
    }

    /// Storage key of this field inside a record.
    ///
    /// Folds in the resolved argument values, sorted by argument name. The
    /// alias never takes part.
    pub fn cache_key(&self, variables: &Variables) -> String {
        if self.arguments.is_empty() {
            return self.field_name.clone();
        }
        let resolved = Value::Object(self.resolved_arguments(variables));
        format!("{}({})", self.field_name, canonical_json(&resolved))
    }
}

/// Compact JSON with object keys sorted at every level, whatever the map
/// ordering of the value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (name, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fields selected only when the object's `__typename` matches.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_conditions: Vec<String>,
    pub selections: SelectionSet,
}

/// Selections applied to one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    pub fields: Vec<ResponseField>,
    pub inline_fragments: Vec<InlineFragment>,
}

impl SelectionSet {
    pub fn new(fields: Vec<ResponseField>) -> Self {
        Self {
            fields,
            inline_fragments: Vec::new(),
        }
    }

    pub fn on(mut self, type_conditions: &[&str], selections: SelectionSet) -> Self {
        self.inline_fragments.push(InlineFragment {
            type_conditions: type_conditions.iter().map(|t| t.to_string()).collect(),
            selections,
        });
        self
    }

    /// Flatten base fields and every fragment matching `typename`.
    ///
    /// Fragments are resolved once per object; without a typename only the
    /// base fields apply.
    pub fn fields_for(&self, typename: Option<&str>) -> Vec<&ResponseField> {
        let mut fields: Vec<&ResponseField> = self.fields.iter().collect();
        if let Some(typename) = typename {
            for fragment in &self.inline_fragments {
                if fragment.type_conditions.iter().any(|t| t == typename) {
                    fields.extend(fragment.selections.fields_for(Some(typename)));
                }
            }
        }
        fields
    }
}

/// Operation type, which decides the root record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn root_key(&self) -> &'static str {
        match self {
            OperationKind::Query | OperationKind::Subscription => QUERY_ROOT_KEY,
            OperationKind::Mutation => MUTATION_ROOT_KEY,
        }
    }
}

/// A GraphQL operation with its selection plan and variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub selections: SelectionSet,
    pub variables: Variables,
}

impl Operation {
    pub fn query(name: &str, selections: SelectionSet) -> Self {
        Self {
            name: name.to_string(),
            kind: OperationKind::Query,
            selections,
            variables: Variables::new(),
        }
    }

    pub fn mutation(name: &str, selections: SelectionSet) -> Self {
        Self {
            kind: OperationKind::Mutation,
            ..Self::query(name, selections)
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn root_key(&self) -> &'static str {
        self.kind.root_key()
    }

    /// SHA-256 hex of name and canonical variables; identifies one request.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(canonical_json(&self.variables.to_json()).as_bytes());
        hex::encode(hasher.finalize())
    }
}
