//! Attribute-equality rules between a principal and a request context
//!
//! A permission may carry context rules of the form
//! `principal attribute -> context attribute`, e.g. `{"id": "owner_id"}`
//! meaning "the principal's `id` must equal the context's `owner_id`".
//!
//! Attributes are read through [`AttributeSource`], a small lookup capability
//! the caller supplies. Values are compared as JSON values, so `1` and `"1"`
//! differ. A missing attribute reads as `null`, which means two missing
//! attributes compare equal and the rule passes.

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Named attribute lookup
pub trait AttributeSource: Send + Sync {
    /// Value of the named attribute, or `None` if absent
    fn attribute(&self, name: &str) -> Option<Value>;
}

/// Source with no attributes at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttributes;

impl AttributeSource for NoAttributes {
    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl AttributeSource for HashMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl AttributeSource for BTreeMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl AttributeSource for serde_json::Map<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Objects expose their fields; any other JSON value has no attributes
impl AttributeSource for Value {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|map| map.get(name).cloned())
    }
}

/// Adapts a closure into an [`AttributeSource`]
///
/// ```
/// use rolegate::{AttributeFn, AttributeSource};
/// use serde_json::json;
///
/// let user = AttributeFn(|name: &str| match name {
///     "id" => Some(json!(42)),
///     _ => None,
/// });
/// assert_eq!(user.attribute("id"), Some(json!(42)));
/// ```
pub struct AttributeFn<F>(pub F);

impl<F> AttributeSource for AttributeFn<F>
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn attribute(&self, name: &str) -> Option<Value> {
        (self.0)(name)
    }
}

/// Principal-attribute -> context-attribute equality pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextRules(BTreeMap<String, String>);

impl ContextRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `principal.<principal_attr> == context.<context_attr>`
    pub fn require(mut self, principal_attr: impl Into<String>, context_attr: impl Into<String>) -> Self {
        self.0.insert(principal_attr.into(), context_attr.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Decode rules stored as a JSON object blob
    pub fn from_json(json: &str) -> Result<Self> {
        let json = json.trim();
        if json.is_empty() || json == "null" {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
            .map_err(|e| AuthzError::InvalidArgument(format!("context rules: {}", e)))
    }
}

/// Evaluates context rules
pub struct ContextMatcher;

impl ContextMatcher {
    /// Every rule pair must compare equal; no rules always passes
    pub fn matches(rules: &ContextRules, principal: &dyn AttributeSource, context: &dyn AttributeSource) -> bool {
        rules.iter().all(|(principal_attr, context_attr)| {
            let expected = principal.attribute(principal_attr).unwrap_or(Value::Null);
            let actual = context.attribute(context_attr).unwrap_or(Value::Null);
            expected == actual
        })
    }
}
