use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use gatehub_protocol::{ApiError, FunctionInfo, Invocation, Reply};
use jsonschema::{validator_for, Validator};
use serde_json::Value;

use crate::identity::Identity;

/// A function body. Implementations receive the full invocation and the
/// resolved identity (when the function requires auth) and are fully
/// responsible for producing the reply; the pipeline never inspects it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, invocation: Invocation, identity: Option<Identity>)
        -> Result<Reply, ApiError>;
}

/// Adapter so plain async closures can be registered as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Invocation, Option<Identity>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, ApiError>> + Send + 'static,
{
    async fn call(
        &self,
        invocation: Invocation,
        identity: Option<Identity>,
    ) -> Result<Reply, ApiError> {
        (self.0)(invocation, identity).await
    }
}

/// Everything the pipeline needs to know about one named function.
///
/// Built once at startup and never mutated afterwards. Declaring a required
/// capability implies `requires_auth`; capability order is preserved because
/// the first missing one is named in the denial.
pub struct FunctionSpec {
    pub name: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub requires_auth: bool,
    pub required_capabilities: Vec<String>,
    pub input_schema: Option<Value>,
    pub response_schema: Option<Value>,
    pub handler: Arc<dyn Handler>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self {
            name: name.into(),
            summary: String::new(),
            tags: Vec::new(),
            requires_auth: false,
            required_capabilities: Vec::new(),
            input_schema: None,
            response_schema: None,
            handler: Arc::new(handler),
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn requires_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Require a capability (and therefore authentication).
    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.requires_auth = true;
        self.required_capabilities.push(capability.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    fn info(&self) -> FunctionInfo {
        FunctionInfo {
            name: self.name.clone(),
            summary: self.summary.clone(),
            requires_auth: self.requires_auth,
            required_capabilities: self.required_capabilities.clone(),
            tags: self.tags.clone(),
            input_schema: self.input_schema.clone(),
            response_schema: self.response_schema.clone(),
        }
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .field("required_capabilities", &self.required_capabilities)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("function \"{0}\" is already registered")]
    DuplicateName(String),
    #[error("function \"{name}\" has an invalid input schema: {message}")]
    InvalidSchema { name: String, message: String },
}

/// A registered function with its compiled input validator.
pub struct RegisteredFunction {
    pub spec: FunctionSpec,
    validator: Option<Validator>,
}

impl RegisteredFunction {
    /// Validate a request body against the declared input schema. `Ok` when
    /// no schema was declared.
    pub fn validate_input(&self, body: &Value) -> Result<(), String> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let errors: Vec<String> = validator.iter_errors(body).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

/// Write-once-per-name, read-many function registry.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<RegisteredFunction>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, compiling its input schema. Duplicate names are
    /// rejected to catch wiring bugs at startup.
    pub fn register(&self, spec: FunctionSpec) -> Result<(), RegistryError> {
        let validator = match &spec.input_schema {
            Some(schema) => Some(validator_for(schema).map_err(|e| {
                RegistryError::InvalidSchema {
                    name: spec.name.clone(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateName(spec.name));
        }
        entries.insert(
            spec.name.clone(),
            Arc::new(RegisteredFunction { spec, validator }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredFunction>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Descriptor metadata for every registered function, sorted by name.
    pub fn infos(&self) -> Vec<FunctionInfo> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut infos: Vec<FunctionInfo> = entries.values().map(|f| f.spec.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> impl Handler {
        FnHandler(|_inv: Invocation, _id: Option<Identity>| async {
            Ok(Reply::json(200, json!({})))
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = Registry::new();
        registry.register(FunctionSpec::new("ping", noop())).unwrap();
        let err = registry
            .register(FunctionSpec::new("ping", noop()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }

    #[test]
    fn require_implies_auth_and_preserves_order() {
        let spec = FunctionSpec::new("f", noop())
            .require("users.view")
            .require("users.delete");
        assert!(spec.requires_auth);
        assert_eq!(spec.required_capabilities, ["users.view", "users.delete"]);
    }

    #[test]
    fn input_validation_reports_mismatches() {
        let registry = Registry::new();
        registry
            .register(
                FunctionSpec::new("strict", noop()).input_schema(json!({
                    "type": "object",
                    "properties": { "n": { "type": "integer" } },
                    "required": ["n"]
                })),
            )
            .unwrap();
        let f = registry.get("strict").unwrap();
        assert!(f.validate_input(&json!({ "n": 1 })).is_ok());
        assert!(f.validate_input(&json!({ "n": "one" })).is_err());
        assert!(f.validate_input(&json!({})).is_err());
    }

    #[test]
    fn list_and_infos_are_sorted() {
        let registry = Registry::new();
        registry.register(FunctionSpec::new("zeta", noop())).unwrap();
        registry.register(FunctionSpec::new("alpha", noop())).unwrap();
        assert_eq!(registry.list(), ["alpha", "zeta"]);
        assert_eq!(registry.infos()[0].name, "alpha");
    }

    #[test]
    fn bad_schema_fails_registration() {
        let registry = Registry::new();
        let err = registry
            .register(
                FunctionSpec::new("broken", noop())
                    .input_schema(json!({ "type": "no-such-type" })),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { .. }));
    }
}
