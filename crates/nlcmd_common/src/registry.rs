//! Action Registry - the catalog of executable actions
//!
//! Built once at startup with `register`, then frozen behind an `Arc` and
//! shared read-only by the validator, the executor and the router. Nothing
//! mutates it while requests are being handled, so concurrent plan runs only
//! ever take `&self`.

use crate::error::{HandlerError, RegistryError};
use crate::schema::ActionSchema;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Handler Contract
// ============================================================================

/// Parameters after reference resolution and type coercion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    values: BTreeMap<String, Value>,
}

impl ResolvedParams {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Result<&str, HandlerError> {
        match self.values.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(HandlerError::bad_param(name, "expected a string")),
            None => Err(HandlerError::bad_param(name, "missing")),
        }
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Result<i64, HandlerError> {
        self.opt_i64(name)
            .ok_or_else(|| HandlerError::bad_param(name, "expected an integer"))
    }

    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Result<f64, HandlerError> {
        self.values
            .get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::bad_param(name, "expected a number"))
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The one interface every action implements
///
/// Handlers receive type-checked parameters and return a serializable value
/// or a failure. They must not spawn shells or evaluate code; whatever an
/// action does is declared up front by its schema.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, params: &ResolvedParams) -> Result<Value, HandlerError>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ResolvedParams) -> Result<Value, HandlerError> + Send + Sync,
{
    fn execute(&self, params: &ResolvedParams) -> Result<Value, HandlerError> {
        self(params)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A schema bound to its handler
#[derive(Clone)]
pub struct RegisteredAction {
    pub schema: ActionSchema,
    handler: Arc<dyn ActionHandler>,
}

impl RegisteredAction {
    pub fn invoke(&self, params: &ResolvedParams) -> Result<Value, HandlerError> {
        self.handler.execute(params)
    }
}

impl fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Catalog of actions, keyed by id
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
    /// Registration order, so listings and prompts are stable
    order: Vec<String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; ids are unique
    pub fn register<H>(&mut self, schema: ActionSchema, handler: H) -> Result<(), RegistryError>
    where
        H: ActionHandler + 'static,
    {
        self.register_shared(schema, Arc::new(handler))
    }

    /// Register an action whose handler is already shared
    pub fn register_shared(
        &mut self,
        schema: ActionSchema,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), RegistryError> {
        check_schema(&schema)?;

        if self.actions.contains_key(&schema.id) {
            return Err(RegistryError::Duplicate(schema.id));
        }

        tracing::debug!(action = %schema.id, params = schema.params.len(), "Registered action");
        self.order.push(schema.id.clone());
        self.actions
            .insert(schema.id.clone(), RegisteredAction { schema, handler });
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<&RegisteredAction, RegistryError> {
        self.actions
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredAction> {
        self.actions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    /// All schemas, in registration order
    pub fn list(&self) -> Vec<&ActionSchema> {
        self.order
            .iter()
            .filter_map(|id| self.actions.get(id))
            .map(|a| &a.schema)
            .collect()
    }

    /// Owned copy of the catalog, for handing to a planner
    pub fn catalog(&self) -> Vec<ActionSchema> {
        self.list().into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Freeze the registry for shared, read-only use
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn check_schema(schema: &ActionSchema) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        id: schema.id.clone(),
        reason: reason.to_string(),
    };

    if schema.id.trim().is_empty() {
        return Err(invalid("empty id"));
    }
    if schema.id.chars().any(char::is_whitespace) {
        return Err(invalid("id contains whitespace"));
    }

    let mut seen = HashSet::new();
    for param in &schema.params {
        if param.name.is_empty() {
            return Err(invalid("parameter with empty name"));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(invalid(&format!("duplicate parameter '{}'", param.name)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamSpec, ParamType, ResultShape};
    use serde_json::json;

    fn echo_schema(id: &str) -> ActionSchema {
        ActionSchema::new(id, "Echo the message")
            .param(ParamSpec::required("message", ParamType::String))
            .returns(ResultShape::Scalar)
    }

    fn echo(params: &ResolvedParams) -> Result<Value, HandlerError> {
        Ok(json!(params.str("message")?))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_schema("util.echo"), echo).unwrap();

        let action = registry.lookup("util.echo").unwrap();
        assert_eq!(action.schema.id, "util.echo");

        let mut values = BTreeMap::new();
        values.insert("message".to_string(), json!("hi"));
        assert_eq!(action.invoke(&ResolvedParams::new(values)).unwrap(), json!("hi"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_schema("util.echo"), echo).unwrap();

        let err = registry.register(echo_schema("util.echo"), echo).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("util.echo".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = ActionRegistry::new();
        assert_eq!(
            registry.lookup("nope").unwrap_err(),
            RegistryError::NotFound("nope".to_string())
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let mut registry = ActionRegistry::new();
        for id in ["b.second", "a.first", "c.third"] {
            registry.register(echo_schema(id), echo).unwrap();
        }

        let ids: Vec<&str> = registry.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b.second", "a.first", "c.third"]);
        assert_eq!(registry.catalog().len(), 3);
    }

    #[test]
    fn test_invalid_schemas_rejected() {
        let mut registry = ActionRegistry::new();
        assert!(registry.register(echo_schema(" "), echo).is_err());
        assert!(registry.register(echo_schema("has space"), echo).is_err());

        let dup_param = echo_schema("util.dup").param(ParamSpec::optional("message", ParamType::Integer));
        assert!(matches!(
            registry.register(dup_param, echo),
            Err(RegistryError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_shared_registry_concurrent_reads() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_schema("util.echo"), echo).unwrap();
        let shared = registry.into_shared();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&shared);
                std::thread::spawn(move || registry.contains("util.echo"))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_resolved_param_accessors() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), json!("web"));
        values.insert("tail".to_string(), json!(50));
        values.insert("all".to_string(), json!(true));
        let params = ResolvedParams::new(values);

        assert_eq!(params.str("name").unwrap(), "web");
        assert_eq!(params.i64("tail").unwrap(), 50);
        assert_eq!(params.opt_bool("all"), Some(true));
        assert!(params.str("tail").is_err());
        assert!(params.i64("missing").is_err());
        assert_eq!(params.opt_str("missing"), None);
    }
}
