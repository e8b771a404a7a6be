//! Execution context - append-only bindings produced by `store_as`
//!
//! Owned by exactly one executor run. Names are bound in step order and can
//! never be overwritten or removed.

use crate::error::StepFault;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: HashMap<String, Value>,
    order: Vec<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new name; rebinding is refused
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), StepFault> {
        if self.values.contains_key(name) {
            return Err(StepFault::DuplicateBinding(name.to_string()));
        }
        self.order.push(name.to_string());
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Bound names, oldest first
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_and_get() {
        let mut ctx = ExecutionContext::new();
        ctx.bind("files", json!(["a.log", "b.log"])).unwrap();

        assert_eq!(ctx.get("files"), Some(&json!(["a.log", "b.log"])));
        assert!(ctx.contains("files"));
        assert!(ctx.get("other").is_none());
    }

    #[test]
    fn test_rebinding_refused() {
        let mut ctx = ExecutionContext::new();
        ctx.bind("x", json!(1)).unwrap();

        let err = ctx.bind("x", json!(2)).unwrap_err();
        assert_eq!(err, StepFault::DuplicateBinding("x".to_string()));
        assert_eq!(ctx.get("x"), Some(&json!(1)));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_order_preserved() {
        let mut ctx = ExecutionContext::new();
        ctx.bind("z", json!(1)).unwrap();
        ctx.bind("a", json!(2)).unwrap();

        assert_eq!(ctx.names(), &["z".to_string(), "a".to_string()]);
    }
}
