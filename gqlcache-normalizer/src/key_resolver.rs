//! Cache key resolution.
//!
//! A [`CacheKeyResolver`] decides, per object-typed field, whether the
//! object gets its own record (and under which key) or is stored inline in
//! its parent.

use gqlcache_core::{CacheKey, ResponseField, Variables, TYPENAME_FIELD};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Everything a resolver may inspect for one field.
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    pub field: &'a ResponseField,
    pub variables: &'a Variables,
    /// Key of the record the field is stored in.
    pub parent_key: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(field: &'a ResponseField, variables: &'a Variables, parent_key: &'a str) -> Self {
        Self {
            field,
            variables,
            parent_key,
        }
    }

    /// Field arguments with variables replaced by their runtime values.
    pub fn resolved_arguments(&self) -> Map<String, Value> {
        self.field.resolved_arguments(self.variables)
    }
}

/// Strategy for computing record keys.
///
/// Implementations must be deterministic: the same object must always map
/// to the same key, or reads and writes will diverge.
pub trait CacheKeyResolver: Send + Sync {
    /// Key for an object found in a response, computed from its fields.
    fn from_field_record_set(&self, ctx: &KeyContext<'_>, object: &Map<String, Value>) -> CacheKey;

    /// Key derivable from the field's resolved arguments alone.
    ///
    /// Used on reads to jump straight to an entity cached by another
    /// operation.
    fn from_field_arguments(&self, _ctx: &KeyContext<'_>) -> CacheKey {
        CacheKey::NoKey
    }
}

/// Stores every object inline in its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyResolver;

impl CacheKeyResolver for DefaultKeyResolver {
    fn from_field_record_set(&self, _ctx: &KeyContext<'_>, _object: &Map<String, Value>) -> CacheKey {
        CacheKey::NoKey
    }
}

/// Keys objects by `<__typename>:<id>`.
///
/// Objects lacking either field stay inline. Argument redirects map a field
/// name to the type its `id` argument identifies, e.g. `human(id:)` to
/// `Human`.
#[derive(Debug, Clone)]
pub struct TypenameIdResolver {
    id_field: String,
    redirects: HashMap<String, String>,
}

impl Default for TypenameIdResolver {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            redirects: HashMap::new(),
        }
    }
}

impl TypenameIdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different identity field than `id`.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Resolve `field_name(<id_field>: X)` to `typename:X` on reads.
    pub fn with_redirect(mut self, field_name: impl Into<String>, typename: impl Into<String>) -> Self {
        self.redirects.insert(field_name.into(), typename.into());
        self
    }

    fn id_string(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl CacheKeyResolver for TypenameIdResolver {
    fn from_field_record_set(&self, _ctx: &KeyContext<'_>, object: &Map<String, Value>) -> CacheKey {
        let typename = object.get(TYPENAME_FIELD).and_then(Value::as_str);
        let id = object.get(&self.id_field).and_then(Self::id_string);
        match (typename, id) {
            (Some(typename), Some(id)) => CacheKey::from(format!("{}:{}", typename, id)),
            _ => CacheKey::NoKey,
        }
    }

    fn from_field_arguments(&self, ctx: &KeyContext<'_>) -> CacheKey {
        let Some(typename) = self.redirects.get(&ctx.field.field_name) else {
            return CacheKey::NoKey;
        };
        ctx.resolved_arguments()
            .get(&self.id_field)
            .and_then(Self::id_string)
            .map(|id| CacheKey::from(format!("{}:{}", typename, id)))
            .unwrap_or(CacheKey::NoKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlcache_core::{variable, SelectionSet};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_default_resolver_never_keys() {
        let field = ResponseField::object("hero", SelectionSet::default());
        let variables = Variables::new();
        let ctx = KeyContext::new(&field, &variables, "QUERY_ROOT");
        let hero = object(json!({"__typename": "Human", "id": "1000"}));
        assert_eq!(DefaultKeyResolver.from_field_record_set(&ctx, &hero), CacheKey::NoKey);
        assert_eq!(DefaultKeyResolver.from_field_arguments(&ctx), CacheKey::NoKey);
    }

    #[test]
    fn test_typename_id_key() {
        let field = ResponseField::object("hero", SelectionSet::default());
        let variables = Variables::new();
        let ctx = KeyContext::new(&field, &variables, "QUERY_ROOT");
        let resolver = TypenameIdResolver::new();

        let hero = object(json!({"__typename": "Human", "id": "1000", "name": "Luke"}));
        assert_eq!(resolver.from_field_record_set(&ctx, &hero), CacheKey::from("Human:1000"));

        let numeric = object(json!({"__typename": "Starship", "id": 3000}));
        assert_eq!(resolver.from_field_record_set(&ctx, &numeric), CacheKey::from("Starship:3000"));

        let anonymous = object(json!({"name": "Luke"}));
        assert_eq!(resolver.from_field_record_set(&ctx, &anonymous), CacheKey::NoKey);
    }

    #[test]
    fn test_redirect_uses_resolved_values_not_variable_names() {
        let resolver = TypenameIdResolver::new().with_redirect("human", "Human");

        let by_variable = ResponseField::object("human", SelectionSet::default())
            .argument("id", variable("humanId"));
        let variables = Variables::new().with("humanId", "1002");
        let ctx = KeyContext::new(&by_variable, &variables, "QUERY_ROOT");
        assert_eq!(resolver.from_field_arguments(&ctx), CacheKey::from("Human:1002"));

        let by_literal = ResponseField::object("human", SelectionSet::default()).argument("id", "1002");
        let empty = Variables::new();
        let ctx = KeyContext::new(&by_literal, &empty, "QUERY_ROOT");
        assert_eq!(resolver.from_field_arguments(&ctx), CacheKey::from("Human:1002"));

        // Undefined variable resolves to null, which carries no identity.
        let ctx = KeyContext::new(&by_variable, &empty, "QUERY_ROOT");
        assert_eq!(resolver.from_field_arguments(&ctx), CacheKey::NoKey);
    }
}
